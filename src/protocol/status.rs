//! Status message decoding.
//!
//! The cleaner reports progress as short ASCII messages. The first byte
//! selects the message type:
//! - `p` followed by a three character number: progress in hundredths
//!   (`p050` is 50%)
//! - `d`: the cycle is done
//!
//! Anything else is invalid.

use crate::data::CycleProgress;

/// Tag byte of a progress message.
pub const PROGRESS_TAG: u8 = b'p';
/// Tag byte of a done message.
pub const DONE_TAG: u8 = b'd';
/// Width of the numeric field after the progress tag.
pub const PROGRESS_FIELD_LEN: usize = 3;

/// A decoded status message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusEvent {
    /// Cycle progress, from 0.0 to 1.0.
    Progress(f32),
    /// The cycle finished.
    Done,
    /// The message could not be decoded.
    Invalid,
}

impl StatusEvent {
    /// Decode a single status message.
    ///
    /// Only the tag and, for progress messages, the three field characters
    /// are examined; trailing bytes are ignored.
    pub fn parse(message: &[u8]) -> Self {
        match message.first() {
            Some(&PROGRESS_TAG) => message
                .get(1..=PROGRESS_FIELD_LEN)
                .and_then(parse_progress_field)
                .map(Self::Progress)
                .unwrap_or(Self::Invalid),
            Some(&DONE_TAG) => Self::Done,
            _ => Self::Invalid,
        }
    }

    /// Decode a single status message from text.
    pub fn parse_str(message: &str) -> Self {
        Self::parse(message.as_bytes())
    }

    /// Check if this event ends the cycle.
    pub fn is_completion(&self) -> bool {
        match self {
            Self::Progress(value) => *value >= 1.0,
            Self::Done => true,
            Self::Invalid => false,
        }
    }

    /// Apply this event to a progress model.
    ///
    /// Progress keeps the running flag of `current` unless it completes the
    /// cycle; done forces 1.0; invalid resets to 0.0 and clears the flag.
    pub fn apply(&self, current: CycleProgress) -> CycleProgress {
        match self {
            Self::Progress(value) if *value >= 1.0 => CycleProgress::complete(),
            Self::Progress(value) => CycleProgress {
                value: *value,
                running: current.running,
            },
            Self::Done => CycleProgress::complete(),
            Self::Invalid => CycleProgress::default(),
        }
    }
}

/// Parse the numeric field of a progress message into a fraction.
fn parse_progress_field(field: &[u8]) -> Option<f32> {
    let hundredths: f32 = std::str::from_utf8(field).ok()?.parse().ok()?;

    if !hundredths.is_finite() || !(0.0..=100.0).contains(&hundredths) {
        return None;
    }

    Some(hundredths / 100.0)
}
