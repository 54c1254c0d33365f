use crate::{
    error::MatchError,
    match_service::MatchResult,
    model_service::ModelLoader,
    server::SharedState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<MatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl MatchResponse {
    fn matched(result: MatchResult) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            traceback: None,
        }
    }

    fn failed(error: String, traceback: Option<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            traceback,
        }
    }
}

impl From<MatchError> for MatchResponse {
    fn from(err: MatchError) -> Self {
        let error = err.to_string();
        Self::failed(error, Some(err.traceback()))
    }
}

#[derive(Error, Debug)]
pub enum MatchImageError {
    #[error("No data provided")]
    NoData,
    #[error("No image provided")]
    NoImage,
    #[error("No variant provided")]
    NoVariant,
    #[error("{message}")]
    Body { status: StatusCode, message: String },
    #[error("Matching task failed")]
    Task(#[source] JoinError),
}

impl IntoResponse for MatchImageError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            MatchImageError::Task(_) => {
                let err = anyhow::Error::new(self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    MatchResponse::failed(format!("{:#}", err), Some(format!("{:?}", err))),
                )
            }
            MatchImageError::Body { status, message } => {
                (status, MatchResponse::failed(message, None))
            }
            _ => (
                StatusCode::BAD_REQUEST,
                MatchResponse::failed(self.to_string(), None),
            ),
        };
        (status, Json(body)).into_response()
    }
}

fn is_empty(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn required_field(data: &Value, field: &str) -> Option<String> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Pipeline failures are answered with 200 and `success: false`; only a bad
/// request body or a failed worker changes the status code. A body that
/// cannot be read at all keeps the status axum assigns it (413 over the limit).
#[instrument(skip(state, payload))]
pub async fn match_image<L: ModelLoader>(
    State(state): State<SharedState<L>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<MatchResponse>, MatchImageError> {
    let Json(data) = payload.map_err(|rejection| match rejection {
        JsonRejection::BytesRejection(e) => {
            tracing::warn!("Could not read request body: {}", e.body_text());
            MatchImageError::Body {
                status: e.status(),
                message: e.body_text(),
            }
        }
        other => {
            tracing::debug!("Rejected request body: {}", other);
            MatchImageError::NoData
        }
    })?;
    if is_empty(&data) {
        return Err(MatchImageError::NoData);
    }

    let image = required_field(&data, "image").ok_or(MatchImageError::NoImage)?;
    let variant = required_field(&data, "variant").ok_or(MatchImageError::NoVariant)?;

    let match_service = state.match_service.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let outcome = match_service.match_image(&image, &variant);
        (variant, outcome)
    })
    .await
    .map_err(MatchImageError::Task)?;

    let response = match outcome {
        (variant, Ok(result)) => {
            tracing::debug!(
                "Variant {}: best_match_index={}, similarity_score={:.5}",
                variant,
                result.best_match_index,
                result.similarity_score
            );
            MatchResponse::matched(result)
        }
        (variant, Err(err)) => {
            tracing::warn!("Variant {}: matching failed: {}", variant, err);
            MatchResponse::from(err)
        }
    };

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use crate::{
        match_service::tests::{noise_png_base64, png_base64, service},
        server::HttpServer,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(channels: i64, scores: &[f32]) -> Router {
        HttpServer::router(Arc::new(service(channels, scores)), None)
    }

    async fn post_raw(app: Router, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/match_image")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post(app: Router, body: Value) -> (StatusCode, Value) {
        post_raw(app, &body.to_string()).await
    }

    #[tokio::test]
    async fn test_match_image_success() {
        let body = json!({"image": png_base64(400, 400), "variant": "waterIconCup"});
        let (status, response) = post(app(1, &[0.9, 0.3]), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);
        assert_eq!(response["result"]["best_match_index"], 0);
        let score = response["result"]["similarity_score"].as_f64().unwrap();
        assert!((score - 0.009).abs() < 1e-9);
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn test_missing_image() {
        let (status, response) = post(app(1, &[0.5]), json!({"variant": "waterIconCup"})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response, json!({"success": false, "error": "No image provided"}));
    }

    #[tokio::test]
    async fn test_missing_variant() {
        let image = png_base64(400, 400);
        for body in [
            json!({"image": image}),
            json!({"image": image, "variant": ""}),
            json!({"image": image, "variant": null}),
        ] {
            let (status, response) = post(app(1, &[0.5]), body.clone()).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
            assert_eq!(response, json!({"success": false, "error": "No variant provided"}));
        }
    }

    #[tokio::test]
    async fn test_body_over_two_mib_is_accepted() {
        let body = json!({"image": noise_png_base64(1600, 400), "variant": "waterIconCup"});
        let body = body.to_string();
        assert!(body.len() > 2 * 1024 * 1024);

        let (status, response) = post_raw(app(1, &[0.9, 0.3]), &body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);
        assert_eq!(response["result"]["best_match_index"], 0);
    }

    #[tokio::test]
    async fn test_configured_body_limit_returns_413() {
        let app = HttpServer::router(Arc::new(service(1, &[0.5])), Some(1024));
        let body = json!({"image": png_base64(400, 400), "variant": "waterIconCup"});
        let (status, response) = post(app, body).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response["success"], false);
        assert_ne!(response["error"], "No data provided");
    }

    #[tokio::test]
    async fn test_worker_panic_returns_500_with_traceback() {
        let body = json!({"image": png_base64(400, 400), "variant": "waterIconCup"});
        let (status, response) = post(app(1, &[]), body).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response["success"], false);
        assert!(response.get("result").is_none());
        let error = response["error"].as_str().unwrap();
        assert!(error.starts_with("Matching task failed"));
        let traceback = response["traceback"].as_str().unwrap();
        assert!(traceback.contains("Caused by:"));
        assert!(traceback.contains("panicked"));
    }

    #[tokio::test]
    async fn test_empty_and_invalid_bodies() {
        for body in ["{}", "null", "{not json"] {
            let (status, response) = post_raw(app(1, &[0.5]), body).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
            assert_eq!(response["success"], false);
            assert_eq!(response["error"], "No data provided");
        }
    }

    #[tokio::test]
    async fn test_unknown_variant_is_reported_as_data() {
        let body = json!({"image": png_base64(400, 400), "variant": "iconRotate"});
        let (status, response) = post(app(1, &[0.5]), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], false);
        assert_eq!(response["error"], "Unknown variant: iconRotate");
        assert!(response["traceback"].as_str().unwrap().contains("iconRotate"));
    }

    #[tokio::test]
    async fn test_malformed_base64_is_reported_as_data() {
        let body = json!({"image": "%%%not-base64%%%", "variant": "waterIconCup"});
        let (status, response) = post(app(1, &[0.5]), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], false);
        assert_eq!(response["error"], "Invalid base64 image payload");
        assert!(response["traceback"].as_str().unwrap().contains("Caused by:"));
    }

    #[tokio::test]
    async fn test_narrow_image_is_reported_as_data() {
        let body = json!({"image": png_base64(120, 400), "variant": "waterIconCup"});
        let (status, response) = post(app(1, &[0.5]), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], false);
        assert!(response["error"].as_str().unwrap().contains("120px"));
        assert!(response.get("result").is_none());
    }

    #[tokio::test]
    async fn test_healthcheck_lists_variants() {
        let response = app(1, &[0.5])
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            health,
            json!({"status": "Available", "variants": ["broken", "waterIconCup"]})
        );
    }
}
