//! Wire-level ICAP protocol machinery: line tokenization, the
//! `Encapsulated` header codec, the incremental message parser, the chunked
//! body codec with its ICAP `ieof` extension, preview negotiation and the
//! per-connection dispatcher.

mod chunked;
mod conn;
mod decode;
mod dispatch;
mod encaps;
mod encode;
mod preview;
mod request;
mod response;
mod status;
mod tokenize;

pub use self::conn::ConnConfig;
pub use self::decode::{ResponseDecoder, ResponseHead};
pub use self::dispatch::serve_connection;
pub use self::encaps::{Encapsulated, SectionType};
pub use self::request::{HttpHead, Request};
pub use self::response::Response;
pub use self::status::StatusCode;
