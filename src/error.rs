//! Error types for the ad scheduling engine

use thiserror::Error;

/// Result type alias for plugin construction and configuration
pub type Result<T> = std::result::Result<T, Error>;

/// VAST error code reported when an ad never started within its window.
pub const TIMEOUT_ERROR_CODE: u16 = 402;

/// Fatal errors that prevent the plugin from attaching
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid options (no usable ad source, malformed JSON, ...)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The plugin needs a tokio runtime to drive its breaks
    #[error("No tokio runtime available to drive ad breaks")]
    NoRuntime,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(format!("malformed options: {}", err))
    }
}

/// Recoverable failures raised while running a single ad break.
///
/// Every one of these ends up as exactly one `vast.adError` event followed by
/// either a skip or a cancel of the break.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdError {
    /// The ads subsystem is administratively disabled
    #[error("Ads are not enabled")]
    AdsDisabled,

    /// Ads were canceled for the rest of the session
    #[error("Ads were canceled for this session")]
    AdsCanceled,

    /// A platform guard refused to interrupt content right now
    #[error("{0}")]
    PlaybackGuard(String),

    /// A phase of the break did not complete in time
    #[error("{message}")]
    Timeout { message: String, code: u16 },

    /// The ad response could not be retrieved or parsed
    #[error("Failed to fetch ad response from {locator}: {message}")]
    Fetch { locator: String, message: String },

    /// The integrator reported a playback failure
    #[error("Ad playback failed: {0}")]
    Playback(String),
}

impl AdError {
    /// Timeout raised when no ad started within the cancel window.
    pub fn cancel_timeout() -> Self {
        AdError::Timeout {
            message: "timeout while waiting for the video to start playing".to_string(),
            code: TIMEOUT_ERROR_CODE,
        }
    }

    /// Numeric error code, when the error kind carries one.
    pub fn code(&self) -> Option<u16> {
        match self {
            AdError::Timeout { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the failure should move the sequencer on to the next source.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, AdError::Fetch { .. } | AdError::Playback(_))
    }
}
