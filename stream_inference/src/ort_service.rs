use crate::{
    codec::FrameArray,
    config::ModelConfig,
    error::InferenceError,
    model_service::ModelService,
};
use ndarray::{Array, Array2, Axis, Ix2, Ix4};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tonic::async_trait;

/// Classifier adapter over a pool of ONNX Runtime sessions. Requests pick a
/// session round-robin so independent clients can run inference in parallel
/// up to the pool size.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
    num_classes: usize,
}

impl OrtModelService {
    pub fn new(
        model_config: &ModelConfig,
        num_classes: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        ort::init()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .commit()?;

        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(num_instances, "created ONNX sessions");

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name: model_config.output_name.clone(),
            num_classes,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<Array2<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index].lock();
        tracing::debug!(session = index, "running inference");

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)?;
        let outputs = session.run(ort::inputs![tensor_ref])?;

        let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        let array = ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())?;

        let batch = input.shape()[0];
        if array.ndim() != 2 || array.shape()[0] != batch {
            return Err(InferenceError::BadOutputShape {
                name: self.output_name.clone(),
                shape: array.shape().to_vec(),
            });
        }
        if array.shape()[1] != self.num_classes {
            return Err(InferenceError::ClassCountMismatch {
                expected: self.num_classes,
                actual: array.shape()[1],
            });
        }

        let mut logits = array.into_dimensionality::<Ix2>()?;
        softmax_rows(&mut logits);
        Ok(logits)
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn infer(&self, frames: FrameArray) -> Result<Array2<f32>, InferenceError> {
        let input = to_model_input(&frames);
        self.run_inference(&input)
    }
}

/// Converts a `[batch, width, height, channel]` frame batch into the
/// normalized f32 `[batch, channel, height, width]` layout the classifier
/// expects. Integer dtypes are scaled to [0, 1]; floats pass through.
fn to_model_input(frames: &FrameArray) -> Array<f32, Ix4> {
    let scaled = match frames {
        FrameArray::Uint8(a) => a.mapv(|v| f32::from(v) / 255.0),
        FrameArray::Uint16(a) => a.mapv(|v| f32::from(v) / 65535.0),
        FrameArray::Float32(a) => a.clone(),
        FrameArray::Float64(a) => a.mapv(|v| v as f32),
    };
    scaled.permuted_axes([0, 3, 2, 1]).as_standard_layout().to_owned()
}

fn softmax_rows(logits: &mut Array2<f32>) {
    for mut row in logits.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
}
