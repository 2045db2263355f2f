use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::commands::{AddressVerdict, CommandError, ConfigurationReport};
use crate::lifecycle::ProcessState;
use crate::torrc::SettingsUpdate;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: String,
    pub tor_state: ProcessState,
    pub tor_ready: bool,
    pub partial_counter: i64,
    pub full_counter: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddressRequest {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let status = match self {
            CommandError::StartFailed => StatusCode::CONFLICT,
            CommandError::Torrc(_) | CommandError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let status = state.gate.status();
    let (partial_counter, full_counter) = state
        .restarter
        .as_ref()
        .map(|r| r.counters())
        .unwrap_or_default();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        tor_state: status.state(),
        tor_ready: status.is_ready(),
        partial_counter,
        full_counter,
    })
}

pub async fn get_config(State(state): State<AdminState>) -> Result<Json<ConfigurationReport>, CommandError> {
    state.gate.get_configuration().await.map(Json)
}

pub async fn put_config(
    State(state): State<AdminState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<ConfigurationReport>, CommandError> {
    state.gate.set_configuration(update).await.map(Json)
}

pub async fn start_proxy(State(state): State<AdminState>) -> Result<StatusCode, CommandError> {
    state.gate.start().await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn stop_proxy(State(state): State<AdminState>) -> StatusCode {
    state.gate.stop().await;
    StatusCode::ACCEPTED
}

pub async fn check_address(
    State(state): State<AdminState>,
    Json(request): Json<AddressRequest>,
) -> Json<AddressVerdict> {
    Json(state.gate.check_address(&request.address).await)
}
