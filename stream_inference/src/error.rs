use thiserror::Error;
use tonic::Status;

/// Request decode failures. These are scoped to the offending request and
/// never touch shared state.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported datatype tag {0:?}")]
    UnknownDType(String),
    #[error("batch must contain at least one frame")]
    EmptyBatch,
    #[error("frame buffer holds {actual} bytes, expected {expected} for shape {shape:?} ({dtype})")]
    LengthMismatch {
        expected: usize,
        actual: usize,
        shape: [usize; 4],
        dtype: &'static str,
    },
    #[error("invalid frame shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Classifier invocation failures. Fatal to the request, not to the process.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model session failed: {0}")]
    Session(#[from] ort::Error),
    #[error("model output {name:?} has unexpected shape {shape:?}")]
    BadOutputShape { name: String, shape: Vec<usize> },
    #[error("model returned {actual} classes, label mapping has {expected}")]
    ClassCountMismatch { expected: usize, actual: usize },
    #[error("failed to reshape model output: {0}")]
    Reshape(#[from] ndarray::ShapeError),
}

impl From<DecodeError> for Status {
    fn from(err: DecodeError) -> Self {
        Status::invalid_argument(err.to_string())
    }
}

impl From<InferenceError> for Status {
    fn from(err: InferenceError) -> Self {
        Status::internal(err.to_string())
    }
}
