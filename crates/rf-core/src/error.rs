//! Error types for the spectrum-monitoring engine

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum RfError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Control-plane error: {0}")]
    Control(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("DSP error: {0}")]
    Dsp(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Acquisition starved: ring delivered {got} of {want} bytes")]
    Starved { want: usize, got: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type RfResult<T> = Result<T, RfError>;
