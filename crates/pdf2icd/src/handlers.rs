use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use icd_types::{ConceptId, DiagnosisCode, MatchResult, Mention, PageClassification};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::resolve::{CancelFlag, ResolveError, Resolver};
use crate::triage::{PageContent, TriageConfig, classify_document};

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
    pub triage: TriageConfig,
    /// Largest number of mentions or pages accepted in one request.
    pub max_batch: usize,
}

#[derive(Deserialize)]
pub struct LookupQuery {
    pub term: String,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub mentions: Vec<Mention>,
    pub fuzzy_limit: Option<usize>,
    pub fuzzy_threshold: Option<u32>,
}

#[derive(Deserialize)]
pub struct TriageRequest {
    pub pages: Vec<PageContent>,
    /// Replaces the server thresholds for this request.
    pub thresholds: Option<TriageConfig>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    terms: usize,
    concepts: usize,
    codes: usize,
    dangling_concepts: usize,
    fuzzy_candidates: usize,
    cached_fuzzy_lookups: usize,
    fuzzy_limit: usize,
    fuzzy_threshold: u8,
}

#[derive(Serialize)]
pub struct LookupResponse {
    term: String,
    normalized: String,
    concepts: Vec<ConceptCodes>,
}

#[derive(Serialize)]
struct ConceptCodes {
    concept: ConceptId,
    codes: Vec<DiagnosisCode>,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    results: Vec<MatchResult>,
}

#[derive(Serialize)]
pub struct TriageResponse {
    pages: Vec<PageClassification>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/stats", get(stats))
        .route("/v1/lookup", get(lookup))
        .route("/v1/resolve", post(resolve))
        .route("/v1/triage", post(triage))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let resolver = &state.resolver;
    let index = resolver.index();
    let config = resolver.config();
    Json(StatsResponse {
        terms: index.term_count(),
        concepts: index.concept_count(),
        codes: index.code_count(),
        dangling_concepts: index.dangling_concepts(),
        fuzzy_candidates: resolver.candidates().len(),
        cached_fuzzy_lookups: resolver.cache_len(),
        fuzzy_limit: config.fuzzy_limit,
        fuzzy_threshold: config.fuzzy_threshold,
    })
}

async fn lookup(
    State(state): State<AppState>,
    Query(params): Query<LookupQuery>,
) -> Result<Json<LookupResponse>, ApiError> {
    if params.term.trim().is_empty() {
        return Err(ApiError::bad_request("term is required"));
    }
    let index = state.resolver.index();
    let normalized = state.resolver.normalize(&params.term);
    let concepts = index
        .lookup_term(&normalized)
        .iter()
        .map(|concept| ConceptCodes {
            concept: concept.clone(),
            codes: index.lookup_concept(concept).iter().cloned().collect(),
        })
        .collect();
    Ok(Json(LookupResponse {
        term: params.term,
        normalized,
        concepts,
    }))
}

// Cancels the batch if the request future is dropped before it finishes.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn resolve(
    State(state): State<AppState>,
    request: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let Json(request) = request?;
    if request.mentions.len() > state.max_batch {
        return Err(ApiError::bad_request(format!(
            "at most {} mentions per request",
            state.max_batch
        )));
    }
    let config = state
        .resolver
        .config()
        .with_overrides(request.fuzzy_limit, request.fuzzy_threshold)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let guard = CancelOnDrop(CancelFlag::new());
    let cancel = guard.0.clone();
    let resolver = Arc::clone(&state.resolver);
    let mentions = request.mentions;
    let count = mentions.len();
    let results = tokio::task::spawn_blocking(move || {
        resolver.resolve_batch_with_config(mentions, &config, &cancel)
    })
    .await
    .map_err(|e| {
        error!("resolve task failed: {e}");
        ApiError::Internal
    })?
    .map_err(|e| match e {
        ResolveError::Cancelled => ApiError::Internal,
    })?;
    drop(guard);

    let resolved = results.iter().filter(|r| r.is_resolved()).count();
    info!("resolved {resolved} of {count} mentions");
    Ok(Json(ResolveResponse { results }))
}

async fn triage(
    State(state): State<AppState>,
    request: Result<Json<TriageRequest>, JsonRejection>,
) -> Result<Json<TriageResponse>, ApiError> {
    let Json(request) = request?;
    if request.pages.len() > state.max_batch {
        return Err(ApiError::bad_request(format!(
            "at most {} pages per request",
            state.max_batch
        )));
    }
    let config = request.thresholds.unwrap_or(state.triage);
    config
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(TriageResponse {
        pages: classify_document(&request.pages, &config),
    }))
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        ApiError::BadRequest(msg.into())
    }
}

// Malformed bodies get the same JSON error shape as other bad requests.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                let body = Json(ErrorResponse { error: msg });
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            ApiError::Internal => {
                let body = Json(json!({ "error": "internal server error" }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}
