use thiserror::Error;

/// Typed error hierarchy for fbrelay.
///
/// Use at module boundaries (ack registration, profile lookups, sink publishing,
/// platform calls, config validation). Internal/leaf functions can continue using
/// `anyhow::Result`; the `Internal` variant allows seamless conversion via `?`.
///
/// A resolve call that matches nothing is not an error: it returns an empty result.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Duplicate pending ack for recipient {recipient_id}, message {message_id}")]
    DuplicateKey {
        recipient_id: String,
        message_id: String,
    },

    #[error("Profile resolution failed: {0}")]
    ProfileResolution(String),

    #[error("Sink publish failed: {0}")]
    SinkPublish(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform API error ({status}): {message}")]
    Platform { status: u16, message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
