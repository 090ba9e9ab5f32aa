use thiserror::Error;

#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Store initialization failed: {message}")]
    InitializationError { message: String },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("{what} already exists")]
    Duplicate { what: &'static str },

    /// No database is configured; every call fails with this.
    #[error("Storage is not configured")]
    Unavailable,
}

pub type StoreResult<T> = Result<T, StoreError>;
