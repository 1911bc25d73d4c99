//! Reassembly of status messages from notification chunks.
//!
//! BLE notifications do not preserve message boundaries: one message may be
//! split over two notifications, or several messages may arrive in one.
//! [`StatusDecoder`] buffers incoming bytes and cuts them into frames:
//! - `p` frames are exactly four bytes (`p` plus the three character field)
//! - `d` frames run to the next line break or the end of the buffered data
//! - line breaks, NULs and spaces between frames are skipped
//! - any other leading byte starts an invalid frame that runs to the next
//!   line break or the end of the buffered data

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::protocol::status::{StatusEvent, PROGRESS_FIELD_LEN, PROGRESS_TAG};

/// How incoming chunks are split into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FramingMode {
    /// Reassemble frames across chunk boundaries.
    #[default]
    Buffered,
    /// Treat every chunk as exactly one message.
    PerChunk,
}

/// A decoded frame together with its raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusFrame {
    /// The frame as received, lossily decoded as UTF-8.
    pub raw: String,
    /// The decoded event.
    pub event: StatusEvent,
}

impl StatusFrame {
    fn decode(bytes: &[u8]) -> Self {
        Self {
            raw: String::from_utf8_lossy(bytes).into_owned(),
            event: StatusEvent::parse(bytes),
        }
    }
}

const PROGRESS_FRAME_LEN: usize = 1 + PROGRESS_FIELD_LEN;

fn is_separator(byte: u8) -> bool {
    matches!(byte, b'\r' | b'\n' | b'\0' | b' ')
}

fn is_line_break(byte: u8) -> bool {
    matches!(byte, b'\r' | b'\n')
}

/// Incremental decoder for the status stream.
#[derive(Debug, Default)]
pub struct StatusDecoder {
    mode: FramingMode,
    buffer: BytesMut,
}

impl StatusDecoder {
    /// Create a decoder using the given framing mode.
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            buffer: BytesMut::new(),
        }
    }

    /// Get the framing mode.
    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Feed a received chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StatusFrame> {
        trace!("Status chunk: {:02X?}", chunk);

        match self.mode {
            FramingMode::PerChunk => {
                if chunk.is_empty() {
                    Vec::new()
                } else {
                    vec![StatusFrame::decode(chunk)]
                }
            }
            FramingMode::Buffered => {
                self.buffer.extend_from_slice(chunk);
                self.drain_frames()
            }
        }
    }

    /// Discard any partially received frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Get the number of buffered bytes waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn drain_frames(&mut self) -> Vec<StatusFrame> {
        let mut frames = Vec::new();

        loop {
            let skip = self
                .buffer
                .iter()
                .take_while(|b| is_separator(**b))
                .count();
            self.buffer.advance(skip);

            let Some(&tag) = self.buffer.first() else {
                break;
            };

            let frame_len = match tag {
                // A line break inside the field ends a short, invalid frame.
                PROGRESS_TAG => match self
                    .buffer
                    .iter()
                    .take(PROGRESS_FRAME_LEN)
                    .position(|b| is_line_break(*b))
                {
                    Some(end) => end,
                    None if self.buffer.len() < PROGRESS_FRAME_LEN => break,
                    None => PROGRESS_FRAME_LEN,
                },
                _ => self
                    .buffer
                    .iter()
                    .position(|b| is_line_break(*b))
                    .unwrap_or(self.buffer.len()),
            };

            let frame = StatusFrame::decode(&self.buffer.split_to(frame_len));
            trace!("Status frame {:?}: {:?}", frame.raw, frame.event);
            frames.push(frame);
        }

        frames
    }
}
