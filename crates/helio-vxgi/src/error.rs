use thiserror::Error;

use crate::pipeline::PipelineState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Allocation failed for '{label}': {reason}")]
    Allocation { label: String, reason: String },

    #[error("Pipeline is {state:?}, expected {expected:?}")]
    InvalidState { state: PipelineState, expected: PipelineState },

    #[error("Unknown resource handle: {0}")]
    UnknownResource(String),

    #[error("Unsupported by backend: {0}")]
    Unsupported(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl Error {
    pub fn allocation(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Allocation { label: label.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
