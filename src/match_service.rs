use crate::{
    config::ScoringConfig,
    error::MatchError,
    model_service::{ModelLoader, SimilarityModel},
    registry::ModelRegistry,
    scorer,
    transform::{build_transform, SLICE_SIZE},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, GenericImageView};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;

/// Raw model scores are divided by this before being reported.
pub const SIMILARITY_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub best_match_index: usize,
    pub similarity_score: f64,
}

/// Decodes a base64 image payload, optionally wrapped in a `data:` URI.
pub fn decode_image_payload(payload: &str) -> Result<DynamicImage, MatchError> {
    let encoded = match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    let encoded: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD.decode(encoded)?;
    Ok(image::load_from_memory(&bytes)?)
}

pub struct MatchService<L: ModelLoader> {
    registry: ModelRegistry<L>,
    scoring: ScoringConfig,
}

impl<L: ModelLoader> MatchService<L> {
    pub fn new(registry: ModelRegistry<L>, scoring: ScoringConfig) -> Self {
        Self { registry, scoring }
    }

    pub fn registry(&self) -> &ModelRegistry<L> {
        &self.registry
    }

    fn rng(&self) -> StdRng {
        match self.scoring.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Finds the top-strip tile that best matches the target crop.
    pub fn match_image(&self, payload: &str, variant: &str) -> Result<MatchResult, MatchError> {
        let image = decode_image_payload(payload)?;
        let model = self.registry.ensure_loaded(variant)?;

        let (width, height) = image.dimensions();
        if width < SLICE_SIZE {
            return Err(MatchError::NoCandidates { width });
        }

        let pipeline = build_transform(model.channels(), self.scoring.color_jitter);
        tracing::debug!(
            "Matching {}x{} image with variant {} ({} channel(s))",
            width,
            height,
            variant,
            pipeline.channels()
        );

        let tensors = pipeline.apply(&image, &mut self.rng());
        let best = scorer::score(model.as_ref(), &tensors.target, &tensors.candidates)?
            .ok_or_else(|| {
                MatchError::Inference("no candidate produced a comparable score".to_string())
            })?;

        Ok(MatchResult {
            best_match_index: best.index,
            similarity_score: f64::from(best.score) / SIMILARITY_SCALE,
        })
    }
}
