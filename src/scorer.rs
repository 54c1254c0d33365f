use crate::{error::MatchError, model_service::SimilarityModel};
use ndarray::Array4;

/// Best candidate and its raw model output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    pub index: usize,
    pub score: f32,
}

/// Runs the model once per candidate against the target and keeps the
/// highest score. Ties keep the earliest candidate. Returns `None` when no
/// score beats negative infinity, including the empty case.
pub fn score<M: SimilarityModel + ?Sized>(
    model: &M,
    target: &Array4<f32>,
    candidates: &[Array4<f32>],
) -> Result<Option<BestMatch>, MatchError> {
    let mut best_score = f32::NEG_INFINITY;
    let mut best_index = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let similarity = model.similarity(target, candidate)?;
        tracing::debug!("Candidate {}: similarity={:.5}", index, similarity);

        if similarity > best_score {
            best_score = similarity;
            best_index = Some(index);
        }
    }

    Ok(best_index.map(|index| BestMatch {
        index,
        score: best_score,
    }))
}
