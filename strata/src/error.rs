use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Two in-flight versions of one key collided. The client is expected
    /// to roll back and retry.
    #[error("could not serialize access due to concurrent update")]
    SerializationFailure,

    #[error("not a recognized database file")]
    UnrecognizedFile,

    #[error("corrupted page: {0}")]
    CorruptedPage(String),

    #[error("object of {size} bytes exceeds page capacity of {capacity} bytes")]
    ObjectTooLarge { size: usize, capacity: usize },
}
