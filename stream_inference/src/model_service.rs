use crate::{codec::FrameArray, error::InferenceError};
use ndarray::Array2;
use tonic::async_trait;

/// Batch-in, probabilities-out classifier boundary. Implementations must be
/// deterministic for fixed weights and input; rows of the returned matrix
/// match the input batch size, columns the class count.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn infer(&self, frames: FrameArray) -> Result<Array2<f32>, InferenceError>;
}
