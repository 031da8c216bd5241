//! Content-type boundary extraction and part header parsing

use std::collections::HashMap;

use super::FramingError;

/// Extract the multipart boundary token from a `Content-Type` header value.
///
/// Accepts `multipart/x-mixed-replace;boundary=abc`, extra parameters, spaces
/// around the separator and a quoted token. The parameter name is matched
/// case-insensitively.
pub fn boundary_from_content_type(content_type: Option<&str>) -> Result<String, FramingError> {
    let missing =
        || FramingError::MissingBoundary { content_type: content_type.map(str::to_string) };

    let value = content_type.ok_or_else(missing)?;

    for param in value.split(';').skip(1) {
        let Some((name, token)) = param.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("boundary") {
            continue;
        }
        let token = token.trim().trim_matches('"');
        if token.is_empty() {
            return Err(missing());
        }
        return Ok(token.to_string());
    }

    Err(missing())
}

/// Header fields of one multipart part, keyed by lower-cased field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    fields: HashMap<String, String>,
}

impl PartHeaders {
    /// Parse a header block (lines separated by CRLF, no terminating blank line).
    ///
    /// Lines without a colon are ignored. Later duplicates replace earlier ones.
    pub fn parse(block: &str) -> Self {
        let fields = block
            .split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();
        Self { fields }
    }

    /// Look up a field by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The declared body length of this part.
    pub fn content_length(&self) -> Result<usize, FramingError> {
        let raw = self.get("content-length").ok_or(FramingError::MissingContentLength)?;
        raw.parse::<usize>()
            .map_err(|_| FramingError::InvalidContentLength { value: raw.to_string() })
    }
}
