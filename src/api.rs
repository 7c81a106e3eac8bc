//! HTTP classifier API served in front of a [`LocalClassifier`].

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::classifier::ClassifyRequest;
use crate::classifier::http::API_KEY_HEADER;
use crate::classifier::local::LocalClassifier;

#[derive(Clone)]
pub struct ApiState {
    pub classifier: LocalClassifier,
    /// Required `x-api-key` value; `None` disables the check.
    pub api_key: Option<SecretString>,
}

/// Build the classifier API router.
pub fn api_routes(classifier: LocalClassifier, api_key: Option<SecretString>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/classify", post(classify))
        .route("/policy/apply", post(apply_policy))
        .layer(cors)
        .with_state(ApiState {
            classifier,
            api_key,
        })
}

fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.api_key else {
        return Ok(());
    };
    let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if provided == Some(expected.expose_secret()) {
        Ok(())
    } else {
        warn!("Rejected request with missing or invalid API key");
        Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "detail": "Invalid API key" })),
        )
            .into_response())
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let model = state.classifier.model();
    let head = model.head();
    Json(serde_json::json!({
        "status": "ok",
        "head_type": head.head_type(),
        "num_labels": head.num_outputs(),
        "labels": head.labels(),
        "sensitive_index": state.classifier.normalizer().sensitive_index(),
        "model_version": model.version(),
    }))
}

// ── Classification ──────────────────────────────────────────────────────

async fn classify(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<ClassifyRequest>,
) -> Response {
    if let Err(rejected) = authorize(&state, &headers) {
        return rejected;
    }

    let classifier = state.classifier.clone();
    let evaluated = tokio::task::spawn_blocking(move || classifier.evaluate(&request)).await;

    match evaluated {
        Ok(Ok(response)) => {
            debug!(label = %response.label, score = response.score, "Classified request");
            (StatusCode::OK, Json(serde_json::json!(response))).into_response()
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Scoring failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "detail": e.to_string() })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "detail": format!("scoring task failed: {e}") })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct PolicyRequest {
    score: f64,
}

async fn apply_policy(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<PolicyRequest>,
) -> Response {
    if let Err(rejected) = authorize(&state, &headers) {
        return rejected;
    }
    let action = state.classifier.thresholds().decide(body.score);
    (
        StatusCode::OK,
        Json(serde_json::json!({ "action": action.wire_name() })),
    )
        .into_response()
}
