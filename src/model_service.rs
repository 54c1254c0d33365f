use crate::error::{BoxError, MatchError};
use ndarray::Array4;
use std::path::Path;

/// A loaded pairwise similarity model.
pub trait SimilarityModel: Send + Sync + 'static {
    /// Channel count declared by the model's first input.
    fn channels(&self) -> i64;

    /// Scores one `(1, C, H, W)` pair, `left` being the target crop.
    fn similarity(&self, left: &Array4<f32>, right: &Array4<f32>) -> Result<f32, MatchError>;
}

pub trait ModelLoader: Send + Sync + 'static {
    type Model: SimilarityModel;

    fn load(&self, path: &Path) -> Result<Self::Model, BoxError>;
}
