//! Codec for the `Encapsulated` header (RFC 3507 section 4.4.1).
//!
//! The header declares the byte offset of every embedded section relative to
//! the start of the message body, e.g. `req-hdr=0, req-body=412`. Exactly one
//! body entry (`req-body`, `res-body`, `opt-body` or `null-body`) terminates
//! the list; header sections derive their lengths from the offset that
//! follows them.

use smallvec::SmallVec;

use crate::{Error, Method, Result};

/// A section kind named in an `Encapsulated` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionType {
    ReqHdr,
    ResHdr,
    ReqBody,
    ResBody,
    OptBody,
    NullBody,
}

impl SectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::ReqHdr => "req-hdr",
            SectionType::ResHdr => "res-hdr",
            SectionType::ReqBody => "req-body",
            SectionType::ResBody => "res-body",
            SectionType::OptBody => "opt-body",
            SectionType::NullBody => "null-body",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "req-hdr" => Some(SectionType::ReqHdr),
            "res-hdr" => Some(SectionType::ResHdr),
            "req-body" => Some(SectionType::ReqBody),
            "res-body" => Some(SectionType::ResBody),
            "opt-body" => Some(SectionType::OptBody),
            "null-body" => Some(SectionType::NullBody),
            _ => None,
        }
    }

    /// Whether this entry terminates the encapsulated list.
    pub fn is_body(&self) -> bool {
        matches!(
            self,
            SectionType::ReqBody
                | SectionType::ResBody
                | SectionType::OptBody
                | SectionType::NullBody
        )
    }
}

/// Parsed `Encapsulated` offsets, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encapsulated {
    entries: SmallVec<[(SectionType, usize); 4]>,
}

impl Encapsulated {
    /// Parse a header value such as `req-hdr=0, req-body=412`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut entries: SmallVec<[(SectionType, usize); 4]> = SmallVec::new();
        let mut last_offset = 0usize;
        for part in value.split(',') {
            let part = part.trim();
            let (name, offset) = part
                .split_once('=')
                .ok_or(Error::InvalidEncapsulated("entry is not name=offset"))?;
            let section = SectionType::from_token(name.trim())
                .ok_or(Error::InvalidEncapsulated("unknown section name"))?;
            let offset: usize = offset
                .trim()
                .parse()
                .map_err(|_| Error::InvalidEncapsulated("offset is not a number"))?;
            if entries.iter().any(|(existing, _)| *existing == section) {
                return Err(Error::InvalidEncapsulated("section listed twice"));
            }
            if entries.is_empty() {
                if offset != 0 {
                    return Err(Error::InvalidEncapsulated("first section must start at 0"));
                }
            } else if offset < last_offset {
                return Err(Error::InvalidEncapsulated("offsets must be non-decreasing"));
            }
            last_offset = offset;
            entries.push((section, offset));
        }
        if entries.is_empty() {
            return Err(Error::InvalidEncapsulated("no sections listed"));
        }
        match entries.last() {
            Some((section, _)) if section.is_body() => {}
            _ => {
                return Err(Error::InvalidEncapsulated(
                    "list must end with a body section",
                ))
            }
        }
        if entries.iter().filter(|(s, _)| s.is_body()).count() != 1 {
            return Err(Error::InvalidEncapsulated("more than one body section"));
        }
        Ok(Self { entries })
    }

    /// Check that the declared sections are permitted for `method`, per the
    /// encapsulated-list grammar of RFC 3507 section 4.4.1.
    pub(crate) fn validate_for(&self, method: Method) -> Result<()> {
        use SectionType::*;
        let kinds: SmallVec<[SectionType; 4]> = self.entries.iter().map(|(s, _)| *s).collect();
        let ok = match method {
            Method::ReqMod => matches!(
                kinds[..],
                [ReqBody] | [NullBody] | [ReqHdr, ReqBody] | [ReqHdr, NullBody]
            ),
            Method::RespMod => matches!(
                kinds[..],
                [ResBody]
                    | [NullBody]
                    | [ReqHdr, ResBody]
                    | [ReqHdr, NullBody]
                    | [ResHdr, ResBody]
                    | [ResHdr, NullBody]
                    | [ReqHdr, ResHdr, ResBody]
                    | [ReqHdr, ResHdr, NullBody]
            ),
            Method::Options => matches!(kinds[..], [NullBody] | [OptBody]),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidEncapsulated(
                "section set not permitted for this method",
            ))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(SectionType, usize)] {
        &self.entries
    }

    pub fn offset_of(&self, section: SectionType) -> Option<usize> {
        self.entries
            .iter()
            .find(|(s, _)| *s == section)
            .map(|(_, offset)| *offset)
    }

    /// The terminating body entry, if any sections are declared.
    pub fn body_section(&self) -> Option<SectionType> {
        match self.entries.last() {
            Some((section, _)) if section.is_body() => Some(*section),
            _ => None,
        }
    }

    /// True when actual body chunks follow the header sections
    /// (`null-body` declares that none do).
    pub fn has_body(&self) -> bool {
        matches!(
            self.body_section(),
            Some(SectionType::ReqBody | SectionType::ResBody | SectionType::OptBody)
        )
    }

    /// Lengths of the header sections, derived from consecutive offsets.
    pub(crate) fn header_section_sizes(&self) -> impl Iterator<Item = (SectionType, usize)> + '_ {
        self.entries
            .windows(2)
            .filter(|w| !w[0].0.is_body())
            .map(|w| (w[0].0, w[1].1 - w[0].1))
    }

    pub(crate) fn push(&mut self, section: SectionType, offset: usize) {
        self.entries.push((section, offset));
    }

    /// Serialize back into RFC 3507 header-value form.
    pub fn to_header_value(&self) -> String {
        let mut out = String::new();
        for (i, (section, offset)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(section.as_str());
            out.push('=');
            out.push_str(&offset.to_string());
        }
        out
    }
}
