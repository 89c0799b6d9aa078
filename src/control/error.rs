use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::TunnelError;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps `TunnelError` onto an HTTP response. `Cancelled` never reaches a
/// handler as an `Err` — callers map it to a 200 outcome themselves.
pub struct ApiError(pub TunnelError);

impl From<TunnelError> for ApiError {
    fn from(error: TunnelError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Spec §6: client errors (bad body, invalid transition) -> 400,
        // internal/upstream errors -> 500. `Cancelled` never surfaces here.
        let status = match &self.0 {
            TunnelError::InvalidSchema(_) => StatusCode::BAD_REQUEST,
            TunnelError::UnknownProvider(_) => StatusCode::BAD_REQUEST,
            TunnelError::UnknownVpnProtocol(_) => StatusCode::BAD_REQUEST,
            TunnelError::NoServers => StatusCode::BAD_REQUEST,
            TunnelError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            TunnelError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
            TunnelError::ProviderUnreachable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TunnelError::TooManyRequests => StatusCode::INTERNAL_SERVER_ERROR,
            TunnelError::BadHttpStatus(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TunnelError::TunnelCrashed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TunnelError::Cancelled => StatusCode::OK,
            TunnelError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TunnelError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TunnelError::ParseError(_) => StatusCode::BAD_REQUEST,
            TunnelError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}
