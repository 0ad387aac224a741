//! HTTP/1.x request parser.
//!
//! Parsing is incremental: [`RequestDecoder`] is fed the connection buffer
//! after every read and yields a request once its head and body are buffered,
//! scanning each byte only once. [`parse_frame`] and [`parse_request`] are the
//! one-shot forms.

mod decoder;
mod request;
mod method;
mod version;
mod error;

// Re-export public items
pub use decoder::RequestDecoder;
pub use request::HttpRequest;
pub use method::Method;
pub use version::HttpVersion;
pub use error::Error;

pub use request::{parse_frame, parse_request};
