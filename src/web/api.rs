//! Defines the Axum API routes and handlers.

use crate::controller::{ControllerError, ControllerStatus, HistorySample, ThermalController, Tunings};
use crate::scheduler::{ScheduleError, ScheduleStatus, Scheduler};
use crate::web::models::{
    ErrorResponse, OkResponse, ScheduleRequest, SetTemperatureRequest, TuningsRequest,
};
use axum::{
    Form, Json, Router,
    extract::{FromRequest, Request, State, rejection::JsonRejection},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;

#[derive(Clone)]
pub struct AppState {
    pub controller: ThermalController,
    pub scheduler: Scheduler,
}

/// Failure reported to HTTP clients as `{ok: false, error}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(error) => (StatusCode::BAD_REQUEST, error),
            ApiError::Internal(error) => (StatusCode::INTERNAL_SERVER_ERROR, error),
        };
        (status, Json(ErrorResponse { ok: false, error })).into_response()
    }
}

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        match e {
            ControllerError::OutOfRange { .. } => ApiError::BadRequest(e.to_string()),
            ControllerError::Transport(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Request body given either as JSON or as an urlencoded form.
pub struct JsonOrForm<T>(pub T);

impl<T, S> FromRequest<S> for JsonOrForm<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            Ok(Self(value))
        } else {
            let Json(value) = Json::<T>::from_request(req, state).await?;
            Ok(Self(value))
        }
    }
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/history", get(get_history))
        .route("/on", post(relays_on))
        .route("/off", post(relays_off))
        .route("/set", post(set_temperature))
        .route("/tunings", get(get_tunings).post(set_tunings))
        .route("/schedule", get(get_schedule).post(set_schedule))
        .with_state(state)
}

async fn get_status(State(state): State<AppState>) -> Json<ControllerStatus> {
    Json(state.controller.status().await)
}

async fn get_history(State(state): State<AppState>) -> Json<Vec<HistorySample>> {
    Json(state.controller.history().await)
}

async fn relays_on(State(state): State<AppState>) -> ApiResult<OkResponse> {
    state.controller.enable_relays().await?;
    Ok(Json(OkResponse::ok()))
}

async fn relays_off(State(state): State<AppState>) -> ApiResult<OkResponse> {
    state.controller.disable_relays().await?;
    Ok(Json(OkResponse::ok()))
}

async fn set_temperature(
    State(state): State<AppState>,
    JsonOrForm(payload): JsonOrForm<SetTemperatureRequest>,
) -> ApiResult<OkResponse> {
    let temperature = payload
        .temperature
        .filter(|t| *t >= 0.0)
        .ok_or_else(|| {
            ApiError::BadRequest("Parameter 'temperature' must be a non-negative number".to_string())
        })?;
    state.controller.set_target_temperature(temperature).await?;
    Ok(Json(OkResponse::ok()))
}

async fn get_tunings(State(state): State<AppState>) -> Json<Tunings> {
    Json(state.controller.tunings().await)
}

async fn set_tunings(
    State(state): State<AppState>,
    JsonOrForm(payload): JsonOrForm<TuningsRequest>,
) -> ApiResult<OkResponse> {
    let (Some(kp), Some(ki), Some(kd)) = (payload.kp, payload.ki, payload.kd) else {
        return Err(ApiError::BadRequest(
            "Parameters 'Kp', 'Ki', and 'Kd' must be numbers".to_string(),
        ));
    };
    state.controller.set_tunings(Tunings { kp, ki, kd }).await;
    Ok(Json(OkResponse::ok()))
}

async fn get_schedule(State(state): State<AppState>) -> Json<ScheduleStatus> {
    Json(state.scheduler.status().await)
}

async fn set_schedule(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let Json(payload) = payload?;
    match payload.schedule {
        Some(steps) => state.scheduler.set_schedule(&steps).await?,
        None => state.scheduler.clear_schedule().await,
    }
    Ok(Json(OkResponse::ok()))
}
