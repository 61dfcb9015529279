//! Error taxonomy for the player.
//!
//! Load failures are terminal and user visible. Persistence and unsupported
//! signal errors are logged and never stop enforcement.

use serde::Serialize;

/// Why a player ended in the terminal `Error` state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum LoadFailure {
    InvalidShareToken,
    VideoNotFound,
    PolicyUnavailable(String),
    SessionUnavailable(String),
    SessionExpired,
    BrowserNotAllowed(String),
}

impl LoadFailure {
    /// Message shown to the viewer. Never retried.
    pub fn message(&self) -> String {
        match self {
            LoadFailure::InvalidShareToken => "This link is not valid.".to_string(),
            LoadFailure::VideoNotFound => "This video is no longer available.".to_string(),
            LoadFailure::PolicyUnavailable(_) | LoadFailure::SessionUnavailable(_) => {
                "The secure player could not be started. Please try again later.".to_string()
            }
            LoadFailure::SessionExpired => "Your access window for this video has ended.".to_string(),
            LoadFailure::BrowserNotAllowed(browser) => {
                format!("This video cannot be played in {}.", browser)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum PlayerError {
    /// Video, session or policy could not be resolved while loading.
    PolicyResolution(LoadFailure),
    /// A session or violation write failed. Logged only.
    PersistenceWrite {
        operation: &'static str,
        message: String,
    },
    /// The surface cannot deliver a signal or honour a command; the rule that
    /// depends on it is skipped.
    UnsupportedSignal {
        capability: &'static str,
        message: String,
    },
}

impl PlayerError {
    pub fn code(&self) -> &'static str {
        match self {
            PlayerError::PolicyResolution(_) => "POLICY_RESOLUTION",
            PlayerError::PersistenceWrite { .. } => "PERSISTENCE_WRITE",
            PlayerError::UnsupportedSignal { .. } => "UNSUPPORTED_SIGNAL",
        }
    }
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::PolicyResolution(failure) => {
                write!(f, "{}: {:?}", self.code(), failure)
            }
            PlayerError::PersistenceWrite { operation, message } => {
                write!(f, "{}: {} failed: {}", self.code(), operation, message)
            }
            PlayerError::UnsupportedSignal {
                capability,
                message,
            } => write!(f, "{}: {} unavailable: {}", self.code(), capability, message),
        }
    }
}

impl std::error::Error for PlayerError {}
