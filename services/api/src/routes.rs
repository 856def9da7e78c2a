use crate::infra::{AppState, UpdateReceipt};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use estate_access::access::{
    request_unlock, AccessSnapshot, DenialReason, GeoPoint, LocationError, LocationSample,
};
use estate_access::error::AppError;
use estate_access::listings::Estate;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchQuery {
    #[serde(default)]
    pub(crate) q: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EstateView {
    #[serde(flatten)]
    pub(crate) estate: Estate,
    pub(crate) saved: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SavedToggleResponse {
    pub(crate) id: String,
    pub(crate) saved: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionView {
    pub(crate) session_id: String,
    pub(crate) estate_id: String,
    pub(crate) target: GeoPoint,
    pub(crate) radius_meters: f64,
    pub(crate) snapshot: AccessSnapshot,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SampleRequest {
    pub(crate) latitude: f64,
    pub(crate) longitude: f64,
    #[serde(default)]
    pub(crate) accuracy_meters: f64,
    #[serde(default)]
    pub(crate) captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UnlockResponse {
    pub(crate) granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<DenialReason>,
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) owner_dial_uri: Option<String>,
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/estates", get(list_estates))
        .route("/api/v1/estates/:estate_id", get(get_estate))
        .route("/api/v1/estates/:estate_id/saved", post(toggle_saved))
        .route("/api/v1/estates/:estate_id/sessions", post(open_session))
        .route("/api/v1/saved", get(list_saved))
        .route(
            "/api/v1/sessions/:session_id",
            get(session_status).delete(close_session),
        )
        .route("/api/v1/sessions/:session_id/samples", post(push_sample))
        .route("/api/v1/sessions/:session_id/errors", post(push_error))
        .route("/api/v1/sessions/:session_id/unlock", post(unlock))
        .with_state(state)
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready", "open_sessions": state.sessions.len() })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(metrics) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub(crate) async fn list_estates(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<EstateView>> {
    let needle = query.q.unwrap_or_default();
    let views = state
        .catalog
        .search(&needle)
        .into_iter()
        .map(|estate| EstateView {
            saved: state.saved.is_saved(estate.id.as_str()),
            estate: estate.clone(),
        })
        .collect();
    Json(views)
}

pub(crate) async fn get_estate(
    State(state): State<AppState>,
    Path(estate_id): Path<String>,
) -> Result<Json<EstateView>, AppError> {
    let estate = state.estate(&estate_id)?.clone();
    Ok(Json(EstateView {
        saved: state.saved.is_saved(&estate_id),
        estate,
    }))
}

pub(crate) async fn toggle_saved(
    State(state): State<AppState>,
    Path(estate_id): Path<String>,
) -> Result<Json<SavedToggleResponse>, AppError> {
    state.estate(&estate_id)?;
    // The toggle holds the store lock across an fsynced write.
    let store = state.saved.clone();
    let id = estate_id.clone();
    let saved = tokio::task::spawn_blocking(move || store.toggle(&id)).await??;
    Ok(Json(SavedToggleResponse {
        id: estate_id,
        saved,
    }))
}

pub(crate) async fn list_saved(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "saved": state.saved.saved_ids() }))
}

pub(crate) async fn open_session(
    State(state): State<AppState>,
    Path(estate_id): Path<String>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let estate = state.estate(&estate_id)?;
    let active = state.sessions.open(
        estate,
        state.geofence.radius_meters,
        state.geofence.watch_options(),
    )?;
    let target = active.session.target();
    Ok((
        StatusCode::CREATED,
        Json(SessionView {
            session_id: active.session_id.clone(),
            estate_id: active.estate_id.clone(),
            target: target.point(),
            radius_meters: target.radius_meters(),
            snapshot: active.session.snapshot(),
        }),
    ))
}

pub(crate) async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let active = state.sessions.get(&session_id)?;
    let target = active.session.target();
    Ok(Json(SessionView {
        session_id: active.session_id.clone(),
        estate_id: active.estate_id.clone(),
        target: target.point(),
        radius_meters: target.radius_meters(),
        snapshot: active.session.snapshot(),
    }))
}

pub(crate) async fn push_sample(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SampleRequest>,
) -> Result<Json<UpdateReceipt>, AppError> {
    let active = state.sessions.get(&session_id)?;
    let point = GeoPoint::new(request.latitude, request.longitude)?;
    let sample = LocationSample::new(
        point,
        request.accuracy_meters,
        request.captured_at.unwrap_or_else(Utc::now),
    );
    Ok(Json(active.push_sample(sample).await))
}

pub(crate) async fn push_error(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(error): Json<LocationError>,
) -> Result<Json<UpdateReceipt>, AppError> {
    let active = state.sessions.get(&session_id)?;
    Ok(Json(active.push_error(error).await))
}

pub(crate) async fn unlock(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    let active = state.sessions.get(&session_id)?;
    let response = match request_unlock(active.session.state()) {
        Ok(grant) => {
            let message = match state.actuator.unlock(&active.estate_id, grant) {
                Ok(message) => message,
                Err(err) => {
                    let payload = json!({ "granted": true, "error": err.to_string() });
                    return Ok((StatusCode::BAD_GATEWAY, Json(payload)).into_response());
                }
            };
            let body = UnlockResponse {
                granted: true,
                reason: None,
                message,
                owner_dial_uri: None,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(denied) => {
            let owner_dial_uri = match denied.reason {
                DenialReason::TooFar => state
                    .estate(&active.estate_id)?
                    .owner_contact(state.geofence.fallback_owner_phone.as_deref())
                    .map(|contact| contact.dial_uri()),
                DenialReason::NoLocation => None,
            };
            let body = UnlockResponse {
                granted: false,
                reason: Some(denied.reason),
                message: denied.reason.message().to_string(),
                owner_dial_uri,
            };
            (StatusCode::FORBIDDEN, Json(body)).into_response()
        }
    };
    Ok(response)
}

pub(crate) async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let snapshot = state.sessions.close(&session_id).await?;
    Ok(Json(json!({ "session_id": session_id, "final": snapshot })))
}
