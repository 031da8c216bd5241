//! Incremental multipart frame decoder

use tracing::trace;

use super::{FramingError, PartHeaders};

/// Default upper bound on a single frame body (16 MB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Decodes a multipart byte stream into frame bodies.
///
/// Feed network reads with [`push`](Self::push) and drain complete bodies
/// with [`next_frame`](Self::next_frame) until it returns `Ok(None)`. The
/// decoder lives for one physical connection; create a new one on reconnect.
///
/// ```rust
/// use mtconnect_stream::framing::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new("abc");
/// decoder.push(b"--abc\r\nContent-length: 5\r\n\r\nhel");
/// assert_eq!(decoder.next_frame().unwrap(), None);
///
/// decoder.push(b"lo\r\n--abc\r\n");
/// assert_eq!(decoder.next_frame().unwrap(), Some(b"hello".to_vec()));
/// assert_eq!(decoder.next_frame().unwrap(), None);
/// ```
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    /// `--` followed by the boundary token
    marker: Vec<u8>,
    /// Received bytes not yet consumed
    pending: Vec<u8>,
    /// Body length of the part whose header was consumed, if any
    expected_len: Option<usize>,
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Create a decoder for parts delimited by `boundary` (without the leading `--`).
    pub fn new(boundary: &str) -> Self {
        Self::with_max_frame_len(boundary, DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a decoder that rejects bodies longer than `max_frame_len`.
    pub fn with_max_frame_len(boundary: &str, max_frame_len: usize) -> Self {
        let mut marker = Vec::with_capacity(boundary.len() + 2);
        marker.extend_from_slice(b"--");
        marker.extend_from_slice(boundary.as_bytes());
        Self { marker, pending: Vec::new(), expected_len: None, max_frame_len }
    }

    /// Append a chunk read from the network.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Extract the next complete frame body, if one is available.
    ///
    /// A framing error is reported once: the offending header block is
    /// consumed before the error is returned.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        loop {
            match self.expected_len {
                Some(len) => {
                    if self.pending.len() < len {
                        return Ok(None);
                    }
                    let body: Vec<u8> = self.pending.drain(..len).collect();
                    self.expected_len = None;
                    trace!(len, remaining = self.pending.len(), "Frame complete");
                    return Ok(Some(body));
                }
                None => {
                    if !self.read_header()? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Drain every frame that is complete right now.
    pub fn drain_frames(&mut self) -> Result<Vec<Vec<u8>>, FramingError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Number of buffered bytes not yet handed out.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Whether a part header was read and its body is still incomplete.
    pub fn awaiting_body(&self) -> bool {
        self.expected_len.is_some()
    }

    /// Locate and consume the next part header. Returns `false` when more
    /// bytes are needed.
    fn read_header(&mut self) -> Result<bool, FramingError> {
        let Some(start) = find(&self.pending, &self.marker) else {
            // Keep a tail long enough to hold a marker split across reads.
            let keep = self.marker.len().saturating_sub(1);
            if self.pending.len() > keep {
                let discard = self.pending.len() - keep;
                self.pending.drain(..discard);
            }
            return Ok(false);
        };

        let block_start = start + self.marker.len();
        let Some(offset) = find(&self.pending[block_start..], HEADER_TERMINATOR) else {
            return Ok(false);
        };
        let block_end = block_start + offset;

        let block = String::from_utf8_lossy(&self.pending[block_start..block_end]);
        let headers = PartHeaders::parse(block.trim_start_matches("\r\n"));
        self.pending.drain(..block_end + HEADER_TERMINATOR.len());

        let len = headers.content_length()?;
        if len > self.max_frame_len {
            return Err(FramingError::FrameTooLarge { size: len, max: self.max_frame_len });
        }

        trace!(len, "Part header read");
        self.expected_len = Some(len);
        Ok(true)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
