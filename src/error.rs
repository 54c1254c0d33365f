use std::path::PathBuf;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the matching pipeline. These are reported to clients as data
/// (`success: false`), never as an HTTP error status.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Unknown variant: {0}")]
    UnknownVariant(String),
    #[error("Failed to load model for variant {variant} from {path:?}")]
    ModelLoad {
        variant: String,
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("Invalid base64 image payload")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("Error decoding image")]
    InvalidImage(#[from] image::ImageError),
    #[error("Image is {width}px wide, no 200px candidate slice fits")]
    NoCandidates { width: u32 },
    #[error("Inference failed: {0}")]
    Inference(String),
}

impl MatchError {
    /// Message followed by its `Caused by:` chain.
    pub fn traceback(self) -> String {
        format!("{:?}", anyhow::Error::new(self))
    }
}
