use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::{
    device::InvalidAddress, registry::RegistryError, schedules::ScheduleError, shelly::RpcError,
};

/// Error returned by every handler: an HTTP status plus a message rendered as
/// `{"error": "..."}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

fn rpc_status(e: &RpcError) -> StatusCode {
    match e {
        RpcError::Unreachable(_) => StatusCode::GATEWAY_TIMEOUT,
        RpcError::Transport(_) => StatusCode::BAD_GATEWAY,
        RpcError::NotFound { .. } => StatusCode::NOT_FOUND,
    }
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        let status = match &e {
            RegistryError::UnknownDevice(_) => StatusCode::NOT_FOUND,
            RegistryError::AlreadyRegistered(_) => StatusCode::CONFLICT,
            RegistryError::InvalidSettings(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RegistryError::Rpc(rpc) => rpc_status(rpc),
            RegistryError::Schedule(s) => match s {
                ScheduleError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                ScheduleError::CreateRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ScheduleError::NotFound(_) => StatusCode::NOT_FOUND,
                ScheduleError::Rpc(rpc) => rpc_status(rpc),
            },
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<InvalidAddress> for AppError {
    fn from(e: InvalidAddress) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: e.to_string(),
        }
    }
}
