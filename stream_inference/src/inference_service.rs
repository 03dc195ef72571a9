use crate::{
    codec,
    model_service::ModelService,
    registry::SessionRegistry,
    smoothing::argmax_row,
    state::LabelMapping,
};
use ndarray::Axis;
use std::sync::Arc;
use std::time::Instant;
use stream_proto::{
    stream_classifier_server::StreamClassifier, wire, ClassificationResponse, FrameBatchRequest,
};
use tonic::{async_trait, Request, Response, Status};

#[derive(Clone)]
pub struct InferenceService<M: ModelService> {
    model_service: Arc<M>,
    labels: Arc<LabelMapping>,
    registry: Arc<SessionRegistry>,
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(model_service: M, labels: Arc<LabelMapping>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            model_service: Arc::new(model_service),
            labels,
            registry,
        }
    }
}

#[async_trait]
impl<M: ModelService> StreamClassifier for InferenceService<M> {
    async fn classify(
        &self,
        request: Request<FrameBatchRequest>,
    ) -> Result<Response<ClassificationResponse>, Status> {
        let req = request.into_inner();

        let frames = codec::decode(
            &req.frames,
            req.batch as usize,
            req.width as usize,
            req.height as usize,
            req.channel as usize,
            &req.dtype,
        )
        .map_err(Status::from)?;

        let batch = frames.batch();
        tracing::debug!(
            client_id = %req.client_id,
            batch,
            dtype = frames.dtype().as_tag(),
            "decoded frame batch"
        );

        let started = Instant::now();
        let probs = self.model_service.infer(frames).await.map_err(Status::from)?;
        if probs.nrows() != batch || probs.ncols() != self.labels.num_classes() {
            return Err(Status::internal(format!(
                "classifier returned {}x{} probabilities for batch {} with {} classes",
                probs.nrows(),
                probs.ncols(),
                batch,
                self.labels.num_classes()
            )));
        }

        let session = self.registry.get_or_create(&req.client_id);
        let smoothed = session.smooth(probs);

        let mut labels = Vec::with_capacity(batch);
        let mut confidences = Vec::with_capacity(batch);
        for row in smoothed.axis_iter(Axis(0)) {
            let index = argmax_row(row);
            let name = self
                .labels
                .name(index)
                .ok_or_else(|| Status::internal(format!("no label for class index {index}")))?;
            labels.push(name.to_string());
            confidences.push(row[index]);
        }

        tracing::debug!(
            client_id = %req.client_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            labels = ?labels,
            "classified batch"
        );

        let response = ClassificationResponse {
            labels: wire::encode_labels(&labels),
            confidences: confidences.iter().flat_map(|v| v.to_le_bytes()).collect(),
            dtype: wire::DType::Float32.as_tag().to_string(),
        };
        Ok(Response::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameArray;
    use crate::error::InferenceError;
    use ndarray::Array2;

    #[derive(Clone)]
    struct MockModelService {
        rows: Vec<[f32; 2]>,
    }

    #[async_trait]
    impl ModelService for MockModelService {
        async fn infer(&self, frames: FrameArray) -> Result<Array2<f32>, InferenceError> {
            let batch = frames.batch();
            Ok(Array2::from_shape_fn((batch, 2), |(r, c)| {
                self.rows[r % self.rows.len()][c]
            }))
        }
    }

    #[derive(Clone)]
    struct FailingModelService;

    #[async_trait]
    impl ModelService for FailingModelService {
        async fn infer(&self, _frames: FrameArray) -> Result<Array2<f32>, InferenceError> {
            Err(InferenceError::BadOutputShape {
                name: "output".to_string(),
                shape: vec![],
            })
        }
    }

    fn service<M: ModelService>(model: M) -> InferenceService<M> {
        let labels = LabelMapping::from_labels(vec![
            "program".to_string(),
            "advertisement".to_string(),
        ])
        .unwrap();
        InferenceService::new(
            model,
            Arc::new(labels),
            Arc::new(SessionRegistry::new(5, None)),
        )
    }

    fn frame_request(batch: u32, client_id: &str) -> FrameBatchRequest {
        FrameBatchRequest {
            frames: vec![0u8; batch as usize * 2 * 2 * 3],
            batch,
            width: 2,
            height: 2,
            channel: 3,
            dtype: "uint8".to_string(),
            client_id: client_id.to_string(),
        }
    }

    fn decode_confidences(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[tokio::test]
    async fn first_request_returns_raw_probabilities() {
        let service = service(MockModelService {
            rows: vec![[0.9, 0.1], [0.2, 0.8]],
        });

        let response = service
            .classify(Request::new(frame_request(2, "fresh")))
            .await
            .unwrap()
            .into_inner();

        let labels = wire::decode_labels(&response.labels, 2).unwrap();
        assert_eq!(labels, vec!["program", "advertisement"]);
        assert_eq!(response.dtype, "float32");

        let confidences = decode_confidences(&response.confidences);
        assert!((confidences[0] - 0.9).abs() < 1e-6);
        assert!((confidences[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn repeated_identical_batches_stay_stable() {
        let service = service(MockModelService {
            rows: vec![[0.9, 0.1], [0.2, 0.8]],
        });

        for _ in 0..3 {
            let response = service
                .classify(Request::new(frame_request(2, "steady")))
                .await
                .unwrap()
                .into_inner();
            let confidences = decode_confidences(&response.confidences);
            assert!((confidences[0] - 0.9).abs() < 1e-5);
            assert!((confidences[1] - 0.8).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn clients_smooth_independently() {
        let service = service(MockModelService {
            rows: vec![[0.6, 0.4]],
        });

        for _ in 0..4 {
            service
                .classify(Request::new(frame_request(1, "veteran")))
                .await
                .unwrap();
        }

        // A new id still gets the raw first-request passthrough.
        let response = service
            .classify(Request::new(frame_request(1, "newcomer")))
            .await
            .unwrap()
            .into_inner();
        let confidences = decode_confidences(&response.confidences);
        assert!((confidences[0] - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn malformed_request_is_invalid_argument() {
        let service = service(MockModelService {
            rows: vec![[0.9, 0.1]],
        });

        let mut request = frame_request(2, "broken");
        request.frames.truncate(5);
        let status = service
            .classify(Request::new(request))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let mut request = frame_request(1, "broken");
        request.dtype = "complex128".to_string();
        let status = service
            .classify(Request::new(request))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn decode_failure_leaves_registry_untouched() {
        let service = service(MockModelService {
            rows: vec![[0.9, 0.1]],
        });

        let mut request = frame_request(1, "ghost");
        request.frames.clear();
        assert!(service.classify(Request::new(request)).await.is_err());
        assert!(service.registry.is_empty());
    }

    #[tokio::test]
    async fn inference_failure_is_internal_and_request_scoped() {
        let service = service(FailingModelService);

        let status = service
            .classify(Request::new(frame_request(1, "victim")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(service.registry.is_empty());
    }

    #[tokio::test]
    async fn argmax_tie_breaks_to_lowest_index() {
        let service = service(MockModelService {
            rows: vec![[0.5, 0.5]],
        });

        for _ in 0..5 {
            let response = service
                .classify(Request::new(frame_request(1, "tied")))
                .await
                .unwrap()
                .into_inner();
            let labels = wire::decode_labels(&response.labels, 1).unwrap();
            assert_eq!(labels, vec!["program"]);
        }
    }
}
