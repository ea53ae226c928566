use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The message was not accepted by the channel.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Cannot decode {expected} from {actual} message: {reason}")]
    Decode {
        expected: &'static str,
        actual: String,
        reason: String,
    },

    #[error("Cannot encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
