//! Session state.

/// Lifecycle state of a cleaner session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Scanning for cleaners.
    Scanning,
    /// Waiting for a connection to the selected cleaner.
    Connecting,
    /// Connected and ready to start a cycle.
    Connected,
    /// A cleaning cycle is running.
    Running,
    /// Waiting for the link to close after a disconnect request.
    Disconnecting,
}

impl SessionState {
    /// Check if a link to a cleaner is up.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Running)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Running => write!(f, "Running"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}
