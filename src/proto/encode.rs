//! ICAP response serialization.
//!
//! Embedded HTTP header blocks are serialized into memory first so the
//! `Encapsulated` offsets can be computed from their exact lengths; offsets
//! cannot be patched once bytes have gone out. Bodies are never buffered
//! here; the dispatcher streams them through [`write_chunk`] /
//! [`write_final_chunk`] after the head is flushed.

use bytes::BytesMut;

use crate::{Error, Result, ICAP_VERSION};

pub(crate) use super::chunked::{write_chunk, write_final_chunk};
use super::encaps::{Encapsulated, SectionType};
use super::response::Response;
use super::status::StatusCode;

/// Serialize the status line, ICAP headers, the computed `Encapsulated`
/// header and the embedded header blocks.
///
/// `has_body` tells the encoder whether chunked body data will follow; the
/// caller keeps ownership of the stream itself.
pub(crate) fn encode_head(response: &Response, has_body: bool, dst: &mut BytesMut) -> Result<()> {
    let status = response.status();
    if status == StatusCode::NoContent && has_body {
        return Err(Error::InvalidResponse("204 response must not carry a body"));
    }

    // embedded header blocks first: the offsets derive from their lengths
    let mut sections = BytesMut::new();
    let mut encapsulated = Encapsulated::default();
    if let Some(head) = response.http_request() {
        encapsulated.push(SectionType::ReqHdr, sections.len());
        head.write(&mut sections);
    }
    if let Some(head) = response.http_response() {
        encapsulated.push(SectionType::ResHdr, sections.len());
        head.write(&mut sections);
    }
    let body_section = if has_body {
        if response.http_response().is_some() {
            SectionType::ResBody
        } else if response.http_request().is_some() {
            SectionType::ReqBody
        } else {
            // a body without an embedded head only occurs on OPTIONS
            SectionType::OptBody
        }
    } else {
        SectionType::NullBody
    };
    encapsulated.push(body_section, sections.len());

    dst.extend_from_slice(ICAP_VERSION.as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(status.code_str().as_bytes());
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(response.reason().as_bytes());
    dst.extend_from_slice(b"\r\n");

    for (name, value) in response.headers() {
        if name.as_str().eq_ignore_ascii_case("encapsulated") {
            // structural, always recomputed
            continue;
        }
        dst.extend_from_slice(name.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }

    // 1xx responses are bare status lines, no encapsulation
    if !status.is_informational() {
        dst.extend_from_slice(b"Encapsulated: ");
        dst.extend_from_slice(encapsulated.to_header_value().as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");

    if !status.is_informational() {
        dst.extend_from_slice(&sections);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::decode::ResponseDecoder;
    use crate::proto::request::HttpHead;
    use crate::proto::chunked::{BodyFrame, ChunkedDecoder};

    #[test]
    fn encodes_no_content() {
        let mut dst = BytesMut::new();
        encode_head(&Response::no_content(), false, &mut dst).unwrap();
        assert_eq!(
            &dst[..],
            b"ICAP/1.0 204 No Content\r\nEncapsulated: null-body=0\r\n\r\n"
        );
    }

    #[test]
    fn encodes_continue_without_encapsulated() {
        let mut dst = BytesMut::new();
        encode_head(&Response::new(StatusCode::Continue), false, &mut dst).unwrap();
        assert_eq!(&dst[..], b"ICAP/1.0 100 Continue\r\n\r\n");
    }

    #[test]
    fn rejects_body_on_204() {
        let mut dst = BytesMut::new();
        assert!(matches!(
            encode_head(&Response::no_content(), true, &mut dst),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn offsets_match_serialized_head_lengths() {
        let head = HttpHead::new("HTTP/1.1 200 OK").header("content-length", "5");
        let mut expected_len = BytesMut::new();
        head.write(&mut expected_len);

        let response = Response::new(StatusCode::Ok).with_http_response(head);
        let mut dst = BytesMut::new();
        encode_head(&response, true, &mut dst).unwrap();

        let wire = String::from_utf8(dst.to_vec()).unwrap();
        let expected = format!("Encapsulated: res-hdr=0, res-body={}\r\n", expected_len.len());
        assert!(wire.contains(&expected), "missing `{expected}` in `{wire}`");
    }

    #[test]
    fn round_trips_through_the_parser() {
        let head = HttpHead::new("HTTP/1.1 200 OK")
            .header("content-type", "text/plain")
            .header("content-length", "9");
        let response = Response::new(StatusCode::Ok)
            .header("ISTag", "\"rt-1\"")
            .with_http_response(head.clone());

        let mut wire = BytesMut::new();
        encode_head(&response, true, &mut wire).unwrap();
        write_chunk(&mut wire, b"body ");
        write_chunk(&mut wire, b"text");
        write_final_chunk(&mut wire, None);

        let parsed = ResponseDecoder::new(16 * 1024)
            .decode(&mut wire)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.status, StatusCode::Ok);
        assert_eq!(parsed.reason, "OK");
        assert_eq!(parsed.headers.get("istag").unwrap(), "\"rt-1\"");
        assert_eq!(parsed.http_response.unwrap(), head);
        assert_eq!(
            parsed.encapsulated.body_section(),
            Some(SectionType::ResBody)
        );

        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        loop {
            match decoder.decode(&mut wire).unwrap() {
                Some(BodyFrame::Data(data)) => body.extend_from_slice(&data),
                Some(BodyFrame::End(end)) => {
                    assert!(!end.ieof);
                    break;
                }
                None => panic!("incomplete body on complete wire"),
            }
        }
        assert_eq!(body, b"body text");
        assert!(wire.is_empty());
    }
}
