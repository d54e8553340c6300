use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] kindred_storage::errors::Error),
    #[error("Analysis error: {0}")]
    Analysis(#[from] kindred_analysis::errors::AnalysisError),
    #[error("Normalizer is not fitted")]
    NormalizerNotFitted,
    #[error("Fingerprint row was not stored for track {0}")]
    FingerprintNotStored(i64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type CoreResult<T> = std::result::Result<T, Error>;
