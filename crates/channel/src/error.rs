use thiserror::Error;

/// Errors that can occur while publishing, consuming or settling messages.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A message could not be encoded.
    #[error("Failed to encode reservation message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A payload is not a valid reservation message.
    #[error("Malformed reservation message: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The channel refused the operation.
    #[error("Channel unavailable: {0}")]
    Unavailable(String),
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
