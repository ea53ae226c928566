use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Reading the global stream failed.
    #[error("event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// An order or payment event payload no longer matches its type.
    #[error("cannot decode event payload: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
