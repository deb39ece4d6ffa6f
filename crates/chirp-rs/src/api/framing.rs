//! Splits the streaming response body into records.
//!
//! The filter endpoint sends one JSON object per line, or, with
//! `delimited=length`, each object preceded by a line holding its byte
//! length. Blank lines are keep-alives. Chunks from the network can end
//! anywhere, so bytes are buffered until a full frame is available.
//!
//! Frames are bounded by [`FrameDecoder::max_frame_len`]. A larger length
//! prefix, or a line that grows past the bound without a newline, yields
//! [`FrameTooLarge`] and discards the buffer; the connection is no longer in
//! sync and must be dropped.

use thiserror::Error;

/// Default bound on a single frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// One decoded unit of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A blank keep-alive line.
    KeepAlive,
    /// One record (trimmed of surrounding whitespace).
    Record(String),
}

/// A frame announced or buffered beyond the decoder's bound.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stream frame of {len} bytes exceeds the {max} byte limit")]
pub struct FrameTooLarge {
    /// Announced or buffered length (`usize::MAX` for an unparseable prefix).
    pub len: usize,
    pub max: usize,
}

/// Incremental frame decoder. Feed chunks with [`push`](Self::push) and
/// drain with [`next_frame`](Self::next_frame).
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    expected_len: Option<usize>,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            expected_len: None,
            max_frame_len,
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, `Ok(None)` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameTooLarge> {
        loop {
            if let Some(len) = self.expected_len {
                if self.buffer.len() < len {
                    return Ok(None);
                }
                self.expected_len = None;
                let bytes: Vec<u8> = self.buffer.drain(..len).collect();
                return Ok(Some(to_frame(&bytes)));
            }

            let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > self.max_frame_len {
                    return Err(self.overflow(self.buffer.len()));
                }
                return Ok(None);
            };
            if newline > self.max_frame_len {
                return Err(self.overflow(newline));
            }

            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();

            if text.is_empty() {
                return Ok(Some(Frame::KeepAlive));
            }
            if text.bytes().all(|b| b.is_ascii_digit()) {
                match text.parse::<usize>() {
                    Ok(len) if len <= self.max_frame_len => {
                        self.expected_len = Some(len);
                        continue;
                    }
                    Ok(len) => return Err(self.overflow(len)),
                    Err(_) => return Err(self.overflow(usize::MAX)),
                }
            }
            return Ok(Some(Frame::Record(text.to_string())));
        }
    }

    /// Return any trailing unterminated record once the body has ended.
    pub fn finish(&mut self) -> Option<Frame> {
        self.expected_len = None;
        let rest: Vec<u8> = std::mem::take(&mut self.buffer);
        match to_frame(&rest) {
            Frame::KeepAlive => None,
            record => Some(record),
        }
    }

    fn overflow(&mut self, len: usize) -> FrameTooLarge {
        self.buffer = Vec::new();
        self.expected_len = None;
        FrameTooLarge {
            len,
            max: self.max_frame_len,
        }
    }
}

fn to_frame(bytes: &[u8]) -> Frame {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        Frame::KeepAlive
    } else {
        Frame::Record(text.to_string())
    }
}
