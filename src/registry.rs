use crate::{
    config::ModelConfig,
    error::MatchError,
    model_service::{ModelLoader, SimilarityModel},
};
use parking_lot::Mutex;
use std::{collections::HashMap, path::PathBuf, sync::Arc};

struct VariantSlot<M> {
    path: PathBuf,
    // Held for the whole load so concurrent first requests load once.
    model: Mutex<Option<Arc<M>>>,
}

/// Process-wide cache of loaded models, one slot per configured variant.
pub struct ModelRegistry<L: ModelLoader> {
    loader: L,
    slots: HashMap<String, VariantSlot<L::Model>>,
}

impl<L: ModelLoader> ModelRegistry<L> {
    pub fn new(loader: L, model_config: &ModelConfig) -> Self {
        let slots = model_config
            .variants
            .iter()
            .map(|variant| {
                let slot = VariantSlot {
                    path: model_config.get_variant_path(variant),
                    model: Mutex::new(None),
                };
                (variant.name.clone(), slot)
            })
            .collect();

        Self { loader, slots }
    }

    pub fn variants(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Returns the cached model for `variant`, loading it on first use.
    /// Failed loads are not cached.
    pub fn ensure_loaded(&self, variant: &str) -> Result<Arc<L::Model>, MatchError> {
        let slot = self
            .slots
            .get(variant)
            .ok_or_else(|| MatchError::UnknownVariant(variant.to_string()))?;

        let mut cached = slot.model.lock();
        if let Some(model) = cached.as_ref() {
            return Ok(model.clone());
        }

        let model = self
            .loader
            .load(&slot.path)
            .map_err(|source| MatchError::ModelLoad {
                variant: variant.to_string(),
                path: slot.path.clone(),
                source,
            })?;
        tracing::info!(
            "Model for {} expects {} channel(s)",
            variant,
            model.channels()
        );

        let model = Arc::new(model);
        *cached = Some(model.clone());
        Ok(model)
    }

    /// Best-effort eager load of every variant. Failures are logged only.
    pub fn preload(&self) {
        let mut variants: Vec<&str> = self.variants().collect();
        variants.sort_unstable();

        for variant in variants {
            match self.ensure_loaded(variant) {
                Ok(_) => tracing::info!("Loaded ONNX model for variant: {}", variant),
                Err(e) => tracing::error!(
                    "Failed to load ONNX model for variant {}: {}",
                    variant,
                    e.traceback()
                ),
            }
        }
    }
}
