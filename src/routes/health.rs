use crate::{model_service::ModelLoader, server::SharedState};
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    variants: Vec<String>,
}

pub async fn healthcheck<L: ModelLoader>(State(state): State<SharedState<L>>) -> Json<Health> {
    let mut variants: Vec<String> = state
        .match_service
        .registry()
        .variants()
        .map(str::to_string)
        .collect();
    variants.sort_unstable();

    Json(Health {
        status: "Available",
        variants,
    })
}
