mod error;
mod match_service;
mod model_service;
mod ort_service;
mod registry;
mod routes;
mod scorer;
mod server;
mod transform;

pub mod config;

pub use error::MatchError;
pub use match_service::{MatchResult, MatchService, SIMILARITY_SCALE};
pub use model_service::{ModelLoader, SimilarityModel};
pub use ort_service::OrtModelLoader;
pub use registry::ModelRegistry;
pub use server::{start_server, HttpServer};
