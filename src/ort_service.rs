use crate::{
    error::{BoxError, MatchError},
    model_service::{ModelLoader, SimilarityModel},
};
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{path::Path, sync::Mutex};

const LEFT_INPUT: &str = "input_left";
const RIGHT_INPUT: &str = "input_right";

/// Second dimension of a declared input shape, 1 when the shape is flat.
/// Dynamic dimensions come through as negative values.
fn channel_count(dims: &[i64]) -> i64 {
    if dims.len() > 1 {
        dims[1]
    } else {
        1
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrtModelLoader {
    intra_threads: Option<usize>,
}

impl OrtModelLoader {
    pub fn new(intra_threads: Option<usize>) -> Result<Self, ort::Error> {
        ort::init().with_name("slice_matcher").commit()?;
        Ok(Self { intra_threads })
    }
}

impl ModelLoader for OrtModelLoader {
    type Model = OrtSimilarityModel;

    fn load(&self, path: &Path) -> Result<OrtSimilarityModel, BoxError> {
        if !path.exists() {
            return Err(format!("model file not found: {:?}", path).into());
        }

        let mut builder =
            Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
        if let Some(threads) = self.intra_threads {
            builder = builder.with_intra_threads(threads)?;
        }
        let session = builder.commit_from_file(path)?;

        let dims: Vec<i64> = session
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_shape())
            .map(|shape| shape.to_vec())
            .unwrap_or_default();
        let channels = channel_count(&dims);

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or("model declares no outputs")?;

        Ok(OrtSimilarityModel {
            session: Mutex::new(session),
            output_name,
            channels,
        })
    }
}

pub struct OrtSimilarityModel {
    session: Mutex<Session>,
    output_name: String,
    channels: i64,
}

impl SimilarityModel for OrtSimilarityModel {
    fn channels(&self) -> i64 {
        self.channels
    }

    fn similarity(&self, left: &Array4<f32>, right: &Array4<f32>) -> Result<f32, MatchError> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| MatchError::Inference(format!("session mutex poisoned: {}", e)))?;

        let left = TensorRef::from_array_view(left.view())
            .map_err(|e| MatchError::Inference(format!("failed to build tensor: {}", e)))?;
        let right = TensorRef::from_array_view(right.view())
            .map_err(|e| MatchError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![LEFT_INPUT => left, RIGHT_INPUT => right])
            .map_err(|e| MatchError::Inference(format!("inference failed: {}", e)))?;

        let output = &outputs[self.output_name.as_str()];
        let score = match output.try_extract_tensor::<f32>() {
            Ok((_, data)) => single_score(data),
            Err(_) => {
                let (_, data) = output.try_extract_tensor::<f64>().map_err(|e| {
                    MatchError::Inference(format!("failed to extract tensor: {}", e))
                })?;
                single_score(data)
            }
        };
        score
    }
}

/// The model must emit exactly one similarity value, in either float width.
fn single_score<T: Copy + Into<f64>>(data: &[T]) -> Result<f32, MatchError> {
    match data {
        [score] => Ok((*score).into() as f32),
        other => Err(MatchError::Inference(format!(
            "expected a single similarity value, got {} values",
            other.len()
        ))),
    }
}
