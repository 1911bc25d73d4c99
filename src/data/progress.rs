//! Cleaning cycle progress.

/// Progress of the current cleaning cycle as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CycleProgress {
    /// Fraction of the cycle completed, from 0.0 to 1.0.
    pub value: f32,
    /// Whether the device is currently running a cycle.
    pub running: bool,
}

impl CycleProgress {
    /// Progress of a cycle that is under way.
    pub fn running(value: f32) -> Self {
        Self {
            value: value.clamp(0.0, 1.0),
            running: true,
        }
    }

    /// Progress of a finished cycle.
    pub fn complete() -> Self {
        Self {
            value: 1.0,
            running: false,
        }
    }

    /// Check if the cycle has finished.
    pub fn is_complete(&self) -> bool {
        self.value >= 1.0
    }

    /// Get the progress as a whole percentage.
    pub fn percent(&self) -> u8 {
        (self.value.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}
