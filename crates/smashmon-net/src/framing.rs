//! Length-prefixed framing for TCP streams.
//!
//! Every message on the wire is a frame:
//!
//! ```text
//! +--------------------------+-----+--------------------+
//! | length (ASCII decimal)   | '#' |   payload          |
//! |                          |     |   (length bytes)   |
//! +--------------------------+-----+--------------------+
//! ```
//!
//! The length counts payload bytes only and there is no trailing delimiter.
//! A length of 0 is a valid empty frame. Frame boundaries are determined
//! purely by the declared length; the payload is opaque here.

/// Longest accepted length header, in digits. Enough for any `u64`.
pub const MAX_HEADER_LEN: usize = 20;

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 1 MB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The declared or actual payload size.
        size: u64,
        /// The configured maximum.
        max: u32,
    },

    /// The length prefix is not a run of ASCII digits ended by `#`.
    #[error("malformed frame header {header:?}")]
    MalformedHeader {
        /// The offending header bytes, lossily decoded.
        header: String,
    },
}

/// Wrap `payload` in a frame.
pub fn encode_frame(payload: &[u8], config: &FrameConfig) -> Result<Vec<u8>, FrameError> {
    let size = payload.len() as u64;
    if size > u64::from(config.max_payload_size) {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: config.max_payload_size,
        });
    }

    let mut frame = format!("{size}#").into_bytes();
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental frame reassembly.
///
/// Feed raw bytes with [`extend`](Self::extend) in chunks of any size, then
/// call [`next_frame`](Self::next_frame) until it returns `Ok(None)`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    config: FrameConfig,
    buffer: Vec<u8>,
    /// Declared length of the frame whose header has been consumed.
    pending_len: Option<usize>,
}

impl FrameDecoder {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            pending_len: None,
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete payload, if the buffer holds one.
    ///
    /// Never consumes bytes beyond the end of the returned frame. After an
    /// error the stream is out of sync and the decoder should be discarded.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let len = match self.pending_len {
            Some(len) => len,
            None => {
                let Some(hash) = self.buffer.iter().position(|&b| b == b'#') else {
                    self.check_partial_header()?;
                    return Ok(None);
                };
                let len = self.parse_header(&self.buffer[..hash])?;
                self.buffer.drain(..=hash);
                self.pending_len = Some(len);
                len
            }
        };

        if self.buffer.len() < len {
            return Ok(None);
        }

        let payload: Vec<u8> = self.buffer.drain(..len).collect();
        self.pending_len = None;
        Ok(Some(payload))
    }

    fn parse_header(&self, header: &[u8]) -> Result<usize, FrameError> {
        if header.is_empty()
            || header.len() > MAX_HEADER_LEN
            || !header.iter().all(u8::is_ascii_digit)
        {
            return Err(malformed(header));
        }

        // All digits, so the only possible parse failure is overflow.
        let size: u64 = std::str::from_utf8(header)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| malformed(header))?;

        if size > u64::from(self.config.max_payload_size) {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.config.max_payload_size,
            });
        }

        Ok(size as usize)
    }

    /// Fail early on a header that can never become valid.
    fn check_partial_header(&self) -> Result<(), FrameError> {
        if self.buffer.len() > MAX_HEADER_LEN || !self.buffer.iter().all(u8::is_ascii_digit) {
            return Err(malformed(&self.buffer[..self.buffer.len().min(MAX_HEADER_LEN + 1)]));
        }
        Ok(())
    }
}

fn malformed(header: &[u8]) -> FrameError {
    FrameError::MalformedHeader {
        header: String::from_utf8_lossy(header).into_owned(),
    }
}
