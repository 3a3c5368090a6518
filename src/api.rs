use crate::cache::CachePolicy;
use crate::engine::AnalyticsEngine;
use crate::error::AnalyticsError;
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

// ========== Request/Response Types ==========

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsParams {
    #[serde(default)]
    pub debug: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub drug: Option<String>,
}

impl AnalyticsParams {
    fn flag(value: &Option<String>) -> bool {
        matches!(value.as_deref().map(str::trim), Some("1") | Some("true") | Some("yes"))
    }

    pub fn debug(&self) -> bool {
        Self::flag(&self.debug)
    }

    pub fn policy(&self) -> CachePolicy {
        CachePolicy::from_flags(self.debug(), Self::flag(&self.refresh))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drug: Option<String>,
}

// ========== Error Handling ==========

/// An [`AnalyticsError`] tagged with the pipeline step that raised it.
struct AppError {
    step: &'static str,
    error: AnalyticsError,
}

impl AppError {
    fn at(step: &'static str) -> impl FnOnce(AnalyticsError) -> Self {
        move |error| Self { step, error }
    }
}

fn status_for(error: &AnalyticsError) -> StatusCode {
    match error {
        AnalyticsError::NotFound { .. } => StatusCode::NOT_FOUND,
        AnalyticsError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AnalyticsError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        AnalyticsError::UpstreamUnavailable { .. } | AnalyticsError::UpstreamShapeInvalid { .. } => {
            StatusCode::BAD_GATEWAY
        }
        AnalyticsError::SchemaResolution { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);
        let details = self.error.details();
        tracing::error!(
            step = self.step,
            at = %Utc::now(),
            kind = self.error.kind(),
            status = status.as_u16(),
            details = %details,
            "{}",
            self.error
        );

        let (candidates, drug) = match &self.error {
            AnalyticsError::SchemaResolution { candidates, .. } => (Some(candidates.clone()), None),
            AnalyticsError::NotFound { drug } => (None, Some(drug.clone())),
            _ => (None, None),
        };
        let body = ErrorBody {
            error: self.error.to_string(),
            details,
            candidates,
            drug,
        };

        let mut response = (status, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

/// JSON with a cache header matching the request's cache policy.
fn cached_json<T: Serialize>(body: T, params: &AnalyticsParams, engine: &AnalyticsEngine) -> Response {
    let cache_control = if params.debug() {
        "no-store".to_string()
    } else {
        format!("public, s-maxage={}", engine.settings().cache_ttl.as_secs())
    };

    let mut response = Json(body).into_response();
    if let Ok(value) = HeaderValue::from_str(&cache_control) {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    response
}

// ========== Handlers ==========

async fn health_check(State(engine): State<Arc<AnalyticsEngine>>) -> impl IntoResponse {
    Json(engine.health())
}

async fn word_cloud(
    State(engine): State<Arc<AnalyticsEngine>>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Response, AppError> {
    let report = engine
        .word_cloud(params.policy())
        .await
        .map_err(AppError::at("wordcloud"))?;
    Ok(cached_json(report, &params, &engine))
}

async fn clusters(
    State(engine): State<Arc<AnalyticsEngine>>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Response, AppError> {
    let report = engine
        .clusters(params.policy())
        .await
        .map_err(AppError::at("clusters"))?;
    Ok(cached_json(report, &params, &engine))
}

async fn signals(
    State(engine): State<Arc<AnalyticsEngine>>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Response, AppError> {
    if let Some(drug) = &params.drug {
        if drug.len() > 200 {
            return Err(AppError::at("signals")(AnalyticsError::InvalidRequest(
                "drug name is too long".to_string(),
            )));
        }
    }

    let report = engine
        .signals(params.drug.as_deref(), params.policy())
        .await
        .map_err(AppError::at("signals"))?;
    Ok(cached_json(report, &params, &engine))
}

// ========== Router ==========

/// `OPTIONS` requests never reach a handler; the CORS layer answers them
/// with an empty 200.
pub fn create_router(engine: Arc<AnalyticsEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/wordcloud", get(word_cloud))
        .route("/api/clusters", get(clusters))
        .route("/api/signals", get(signals))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}
