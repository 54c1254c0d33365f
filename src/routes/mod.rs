mod health;
mod match_image;

use crate::{model_service::ModelLoader, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes<L: ModelLoader>() -> Router<SharedState<L>> {
    Router::new()
        .route("/health", get(health::healthcheck::<L>))
        .route("/match_image", post(match_image::match_image::<L>))
}
