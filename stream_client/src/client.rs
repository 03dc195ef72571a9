//! Client-side request wrapper: stacks decoded frames into one request,
//! carries a random per-instance client identity so the server can track a
//! smoothing window for this stream, and decodes the response.

use ndarray::{Array2, Array3};
use rand::Rng;
use stream_proto::{
    stream_classifier_client::StreamClassifierClient, wire, FrameBatchRequest,
};
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tonic::{
    transport::{Channel, Error},
    Request, Status,
};

/// Length of the generated lowercase-alphabetic client identity.
pub const CLIENT_ID_LEN: usize = 10;

#[derive(Error, Debug)]
pub enum StreamClientError {
    #[error("Failed to connect to gRPC server: {0}")]
    ConnectionFailed(#[from] Error),
    #[error("Maximum connection retries exceeded.")]
    MaxRetriesExceeded,
    #[error("gRPC request failed: {0}")]
    GrpcRequestFailed(#[from] Status),
    #[error("Cannot build a request from an empty frame list")]
    EmptyBatch,
    #[error("Frames in a batch must share dimensions: {0}")]
    ShapeMismatch(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

pub struct StreamClient {
    client: StreamClassifierClient<Channel>,
    client_id: String,
}

impl StreamClient {
    /// Connects to the inference server, e.g. `http://127.0.0.1:50051`, and
    /// fixes this instance's client identity for the lifetime of the wrapper.
    pub async fn connect(address: &str) -> Result<Self, StreamClientError> {
        let client = Self::get_client(address.to_string()).await?;
        Ok(Self {
            client,
            client_id: random_client_id(CLIENT_ID_LEN),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Raises the gRPC message size limit in both directions, for large
    /// frame batches.
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.client = self
            .client
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);
        self
    }

    async fn get_client(
        address: String,
    ) -> Result<StreamClassifierClient<Channel>, StreamClientError> {
        let mut retry_delay = Duration::from_millis(50);
        let max_retry_delay = Duration::from_secs(1);
        let max_retries = 10;
        let mut retry_count = 0;

        while retry_count < max_retries {
            match timeout(
                Duration::from_secs(1),
                StreamClassifierClient::connect(address.clone()),
            )
            .await
            {
                Ok(Ok(client)) => return Ok(client),
                Ok(Err(e)) => {
                    tracing::error!("Failed to connect to gRPC server: {:?}", e);
                }
                Err(_) => {
                    tracing::error!("Connection timeout");
                }
            }

            retry_count += 1;
            let jitter = rand::random::<f32>() * 0.2 + 0.9;
            sleep(retry_delay.mul_f32(jitter)).await;
            retry_delay = (retry_delay * 2).min(max_retry_delay);
        }

        Err(StreamClientError::MaxRetriesExceeded)
    }

    /// Classifies a batch of decoded frames, each `[width, height, channel]`
    /// with identical dimensions. Returns one label per frame and the
    /// smoothed confidence matrix.
    pub async fn classify(
        &mut self,
        frames: &[Array3<u8>],
    ) -> Result<(Vec<String>, Array2<f32>), StreamClientError> {
        let (buffer, (width, height, channel)) = stack_frames(frames)?;
        let batch = frames.len();

        let request = Request::new(FrameBatchRequest {
            frames: buffer,
            batch: batch as u32,
            width: width as u32,
            height: height as u32,
            channel: channel as u32,
            dtype: wire::DType::Uint8.as_tag().to_string(),
            client_id: self.client_id.clone(),
        });

        let response = self.client.classify(request).await?.into_inner();

        let labels = wire::decode_labels(&response.labels, batch)
            .map_err(StreamClientError::Decode)?;
        let confidences = decode_confidences(&response.confidences, &response.dtype, batch)?;
        Ok((labels, confidences))
    }
}

fn random_client_id(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(b'a' + rng.random_range(0..26)))
        .collect()
}

/// Flattens same-shaped frames into one row-major buffer, rejecting batches
/// with mixed dimensions before anything reaches the server.
fn stack_frames(
    frames: &[Array3<u8>],
) -> Result<(Vec<u8>, (usize, usize, usize)), StreamClientError> {
    let first = frames.first().ok_or(StreamClientError::EmptyBatch)?;
    let dim = first.dim();

    let mut buffer = Vec::with_capacity(frames.len() * first.len());
    for (index, frame) in frames.iter().enumerate() {
        if frame.dim() != dim {
            return Err(StreamClientError::ShapeMismatch(format!(
                "frame {index} has shape {:?}, expected {:?}",
                frame.dim(),
                dim
            )));
        }
        buffer.extend(frame.iter().copied());
    }
    Ok((buffer, dim))
}

fn decode_confidences(
    bytes: &[u8],
    dtype_tag: &str,
    batch: usize,
) -> Result<Array2<f32>, StreamClientError> {
    let dtype = wire::DType::from_tag(dtype_tag).ok_or_else(|| {
        StreamClientError::Decode(format!("unsupported confidence dtype {dtype_tag:?}"))
    })?;
    if bytes.len() % dtype.size_bytes() != 0 {
        return Err(StreamClientError::Decode(format!(
            "confidence buffer of {} bytes is not a multiple of {} ({})",
            bytes.len(),
            dtype.size_bytes(),
            dtype.as_tag()
        )));
    }

    let values: Vec<f32> = match dtype {
        wire::DType::Float32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        wire::DType::Float64 => bytes
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect(),
        other => {
            return Err(StreamClientError::Decode(format!(
                "confidence values must be floating point, got {}",
                other.as_tag()
            )))
        }
    };

    if batch == 0 || values.len() % batch != 0 {
        return Err(StreamClientError::Decode(format!(
            "{} confidence values do not divide into {} rows",
            values.len(),
            batch
        )));
    }
    let columns = values.len() / batch;
    Array2::from_shape_vec((batch, columns), values)
        .map_err(|e| StreamClientError::Decode(e.to_string()))
}
