use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Stable error codes returned to API clients, per the `detail.code` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    ServerNotRunning,
    ServerRunning,
    ServerNotInstalled,
    ConfigNotFound,
    SettingUnknown,
    SettingEnvManaged,
    SettingValueInvalid,
    SettingUpdateFailed,
    VersionNotFound,
    JobNotFound,
    ModNotFound,
    ModAlreadyInstalled,
    InvalidSlug,
    ExternalApiError,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::ServerNotRunning => "SERVER_NOT_RUNNING",
            ErrorCode::ServerRunning => "SERVER_RUNNING",
            ErrorCode::ServerNotInstalled => "SERVER_NOT_INSTALLED",
            ErrorCode::ConfigNotFound => "CONFIG_NOT_FOUND",
            ErrorCode::SettingUnknown => "SETTING_UNKNOWN",
            ErrorCode::SettingEnvManaged => "SETTING_ENV_MANAGED",
            ErrorCode::SettingValueInvalid => "SETTING_VALUE_INVALID",
            ErrorCode::SettingUpdateFailed => "SETTING_UPDATE_FAILED",
            ErrorCode::VersionNotFound => "VERSION_NOT_FOUND",
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
            ErrorCode::ModNotFound => "MOD_NOT_FOUND",
            ErrorCode::ModAlreadyInstalled => "MOD_ALREADY_INSTALLED",
            ErrorCode::InvalidSlug => "INVALID_SLUG",
            ErrorCode::ExternalApiError => "EXTERNAL_API_ERROR",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::ServerNotRunning
            | ErrorCode::ServerRunning
            | ErrorCode::SettingValueInvalid
            | ErrorCode::SettingEnvManaged
            | ErrorCode::InvalidSlug
            | ErrorCode::ModAlreadyInstalled => StatusCode::BAD_REQUEST,
            ErrorCode::ServerNotInstalled => StatusCode::BAD_REQUEST,
            ErrorCode::ConfigNotFound
            | ErrorCode::VersionNotFound
            | ErrorCode::JobNotFound
            | ErrorCode::ModNotFound => StatusCode::NOT_FOUND,
            ErrorCode::SettingUnknown => StatusCode::BAD_REQUEST,
            ErrorCode::SettingUpdateFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ExternalApiError => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The single typed error threaded through every core component.
///
/// Every fallible core operation returns `Result<T, AppError>`; the HTTP
/// adapter is the only place that turns this into a status code + envelope.
#[derive(Debug, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Constructor helpers, one per taxonomy row, mirroring the small
/// free-function-per-kind style used throughout this codebase's error module.
pub mod kind {
    use super::{AppError, ErrorCode};

    pub fn unauthorized(message: impl Into<String>) -> AppError {
        AppError::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> AppError {
        AppError::new(ErrorCode::Forbidden, message)
    }

    pub fn server_not_running(message: impl Into<String>) -> AppError {
        AppError::new(ErrorCode::ServerNotRunning, message)
    }

    pub fn server_running(message: impl Into<String>) -> AppError {
        AppError::new(ErrorCode::ServerRunning, message)
    }

    pub fn server_not_installed(message: impl Into<String>) -> AppError {
        AppError::new(ErrorCode::ServerNotInstalled, message)
    }

    pub fn config_not_found(message: impl Into<String>) -> AppError {
        AppError::new(ErrorCode::ConfigNotFound, message)
    }

    pub fn setting_unknown(key: &str) -> AppError {
        AppError::new(ErrorCode::SettingUnknown, format!("Unknown setting: {key}"))
    }

    pub fn setting_env_managed(key: &str, env_var: &str) -> AppError {
        AppError::new(
            ErrorCode::SettingEnvManaged,
            format!("Setting '{key}' is managed by environment variable {env_var}"),
        )
    }

    pub fn setting_value_invalid(message: impl Into<String>) -> AppError {
        AppError::new(ErrorCode::SettingValueInvalid, message)
    }

    pub fn setting_update_failed(message: impl Into<String>) -> AppError {
        AppError::new(ErrorCode::SettingUpdateFailed, message)
    }

    pub fn version_not_found(version: &str) -> AppError {
        AppError::new(ErrorCode::VersionNotFound, format!("Version not found: {version}"))
    }

    pub fn job_not_found(id: &str) -> AppError {
        AppError::new(ErrorCode::JobNotFound, format!("Job not found: {id}"))
    }

    pub fn mod_not_found(slug: &str) -> AppError {
        AppError::new(ErrorCode::ModNotFound, format!("Mod not found: {slug}"))
    }

    pub fn mod_already_installed(slug: &str, current_version: &str) -> AppError {
        AppError::new(
            ErrorCode::ModAlreadyInstalled,
            format!("Mod '{slug}' is already installed at version {current_version}"),
        )
    }

    pub fn invalid_slug(slug: &str) -> AppError {
        AppError::new(ErrorCode::InvalidSlug, format!("Invalid mod slug: {slug}"))
    }

    pub fn external_api(message: impl Into<String>) -> AppError {
        AppError::new(ErrorCode::ExternalApiError, message)
    }

    pub fn internal(message: impl Into<String>) -> AppError {
        AppError::new(ErrorCode::Internal, message)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        kind::internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        kind::internal(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        kind::external_api(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    detail: ErrorDetail,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        tracing::warn!(code = self.code.as_str(), message = %self.message, "request failed");
        let body = ErrorEnvelope {
            detail: ErrorDetail { code: self.code.as_str(), message: self.message },
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
