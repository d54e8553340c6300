use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "db")]
    #[error("SurrealDB error: {0}")]
    DbError(#[from] Box<surrealdb::Error>),
    #[error("Failed to open database at {0}")]
    DbOpenError(PathBuf),
    #[error("Item not found.")]
    NotFound,
    #[error("Item not created.")]
    NotCreated,
    #[error("Sidecar I/O error: {0}")]
    SidecarIo(#[from] std::io::Error),
    #[error("Sidecar JSON error: {0}")]
    SidecarJson(#[from] serde_json::Error),
    #[error("Unknown fingerprint dimension: {0}")]
    UnknownDimension(String),
}

#[cfg(feature = "db")]
impl From<surrealdb::Error> for Error {
    #[inline]
    fn from(err: surrealdb::Error) -> Self {
        Self::DbError(Box::new(err))
    }
}

pub type StorageResult<T> = std::result::Result<T, Error>;
