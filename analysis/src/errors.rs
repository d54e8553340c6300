use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("Truncated audio file: {0}")]
    Truncated(String),
    #[error("Failed to decode audio: {0}")]
    Decode(String),
    #[error("Decoded samples contain NaN or infinite values")]
    InvalidSamples,
    #[error("Samples are empty or too short")]
    EmptySamples,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("External decoder failed: {0}")]
    ExternalDecoder(String),
    #[error("External decoder timed out after {0} seconds")]
    ExternalDecoderTimeout(u64),
    #[error("Too many or too little features were provided at the end of the analysis")]
    InvalidFeaturesLen,
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
