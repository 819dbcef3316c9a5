use thiserror::Error;

/// Failures that stop playback and are shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("stream unavailable")]
    StreamUnplayable,
    #[error("could not activate audio output")]
    AudioDeviceActivationFailed,
}

/// Failures while acquiring now-playing text.  Logged, never fatal.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata fetch failed: {0}")]
    FetchFailed(String),
    #[error("metadata parse failed: {0}")]
    ParseFailed(String),
}

impl From<reqwest::Error> for MetadataError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            MetadataError::ParseFailed(e.to_string())
        } else {
            MetadataError::FetchFailed(e.to_string())
        }
    }
}

/// Failures of the weekly alert scheduler.  Logged, never fatal.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification authorization denied: {0}")]
    AuthorizationDenied(String),
    #[error("failed to schedule notification '{identifier}': {reason}")]
    SchedulingFailed { identifier: String, reason: String },
}
