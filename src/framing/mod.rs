//! Multipart framing for MTConnect streaming responses.
//!
//! A streaming `sample` response is one long HTTP body made of MIME-like parts:
//!
//! ```text
//! --<boundary>\r\n
//! Content-type: application/json\r\n
//! Content-length: 1234\r\n
//! \r\n
//! <exactly 1234 bytes of document>\r\n
//! --<boundary>\r\n
//! ...
//! ```
//!
//! Network reads split this at arbitrary points. [`FrameDecoder`] accumulates
//! bytes and hands out complete bodies once their full length has arrived. Body
//! extraction is length-delimited, so a payload that happens to contain the
//! boundary text is never cut short.

mod decoder;
mod headers;

pub use decoder::{DEFAULT_MAX_FRAME_LEN, FrameDecoder};
pub use headers::{PartHeaders, boundary_from_content_type};

use thiserror::Error;

/// Violations of the multipart framing contract.
///
/// None of these can be repaired by reading more bytes from the same
/// connection, so the client abandons streaming when it sees one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("No multipart boundary in content type {content_type:?}")]
    MissingBoundary { content_type: Option<String> },

    #[error("Part header has no Content-Length field")]
    MissingContentLength,

    #[error("Invalid Content-Length value '{value}'")]
    InvalidContentLength { value: String },

    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
}
