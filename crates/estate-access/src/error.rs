use crate::access::{InvalidInput, LocationError};
use crate::config::ConfigError;
use crate::listings::CatalogError;
use crate::saved::SavedStoreError;
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Task(tokio::task::JoinError),
    InvalidInput(InvalidInput),
    Location(LocationError),
    Saved(SavedStoreError),
    Catalog(CatalogError),
    EstateNotFound(String),
    SessionNotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Task(err) => write!(f, "background task failed: {}", err),
            AppError::InvalidInput(err) => write!(f, "invalid input: {}", err),
            AppError::Location(err) => write!(f, "location error: {}", err),
            AppError::Saved(err) => write!(f, "saved listings error: {}", err),
            AppError::Catalog(err) => write!(f, "catalog error: {}", err),
            AppError::EstateNotFound(id) => write!(f, "estate '{}' not found", id),
            AppError::SessionNotFound(id) => write!(f, "session '{}' not found", id),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Task(err) => Some(err),
            AppError::InvalidInput(err) => Some(err),
            AppError::Location(err) => Some(err),
            AppError::Saved(err) => Some(err),
            AppError::Catalog(err) => Some(err),
            AppError::EstateNotFound(_) | AppError::SessionNotFound(_) => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::EstateNotFound(_) | AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Location(_) => StatusCode::CONFLICT,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Task(_)
            | AppError::Saved(_)
            | AppError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Task(value)
    }
}

impl From<InvalidInput> for AppError {
    fn from(value: InvalidInput) -> Self {
        Self::InvalidInput(value)
    }
}

impl From<LocationError> for AppError {
    fn from(value: LocationError) -> Self {
        Self::Location(value)
    }
}

impl From<SavedStoreError> for AppError {
    fn from(value: SavedStoreError) -> Self {
        Self::Saved(value)
    }
}

impl From<CatalogError> for AppError {
    fn from(value: CatalogError) -> Self {
        Self::Catalog(value)
    }
}
