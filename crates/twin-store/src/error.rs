use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot connect to vector database at {0}")]
    Connection(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("http client: {0}")]
    Http(String),
    #[error("vector database returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    ResponseParsing(String),
    #[error("collection {0:?} does not exist")]
    CollectionNotFound(String),
    #[error("invalid collection name {0:?}")]
    InvalidCollectionName(String),
    #[error("collection {collection:?} holds {actual}-dim vectors, expected {expected}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },
    #[error("collection {collection:?} uses {actual} distance, expected Cosine")]
    DistanceMismatch { collection: String, actual: String },
    #[error("invalid vector: {0}")]
    InvalidVector(String),
}

impl StoreError {
    /// Transient failures worth another attempt: transport errors, throttling, server errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Connection(_) | StoreError::Timeout(_) | StoreError::Http(_) => true,
            StoreError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
