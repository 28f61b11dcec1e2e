use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use devlink_core::{CoreError, ErrorResponse};
use thiserror::Error;

/// Registry service specific errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Metrics error: {0}")]
    MetricsError(String),
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl RegistryError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::InvalidRequest(_) => "INVALID_REQUEST",
            RegistryError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            RegistryError::RegistryUnavailable(_) => "REGISTRY_UNAVAILABLE",
            RegistryError::StorageError(_) => "STORAGE_ERROR",
            RegistryError::SerializationError(_) => "SERIALIZATION_ERROR",
            RegistryError::MetricsError(_) => "METRICS_ERROR",
            RegistryError::Timeout(_) => "TIMEOUT",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::InvalidRequest(_) | RegistryError::SerializationError(_) => {
                StatusCode::BAD_REQUEST
            }
            RegistryError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::RegistryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RegistryError::StorageError(_) | RegistryError::MetricsError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match self {
            RegistryError::InvalidRequest(msg)
            | RegistryError::InstanceNotFound(msg)
            | RegistryError::RegistryUnavailable(msg)
            | RegistryError::StorageError(msg)
            | RegistryError::SerializationError(msg)
            | RegistryError::MetricsError(msg)
            | RegistryError::Timeout(msg) => msg.clone(),
        }
    }
}

impl From<CoreError> for RegistryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidRecord(msg) => RegistryError::InvalidRequest(msg),
            CoreError::UnregisteredBinding(msg) => RegistryError::InstanceNotFound(msg),
            CoreError::RegistryUnavailable(msg) => RegistryError::RegistryUnavailable(msg),
            CoreError::SerializationError(msg) => RegistryError::SerializationError(msg),
            CoreError::StorageError(msg) => RegistryError::StorageError(msg),
            CoreError::Timeout(msg) => RegistryError::Timeout(msg),
            CoreError::TunnelHandshakeMalformed(msg) | CoreError::UpstreamReset(msg) => {
                RegistryError::InvalidRequest(msg)
            }
        }
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RegistryError::Timeout(err.to_string())
        } else {
            RegistryError::RegistryUnavailable(err.to_string())
        }
    }
}

impl From<RegistryError> for ErrorResponse {
    fn from(err: RegistryError) -> Self {
        ErrorResponse::new(err.error_code(), err.message())
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorResponse::from(self))).into_response()
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::InstanceNotFound("billing".to_string());
        assert_eq!(err.to_string(), "Instance not found: billing");
    }

    #[test]
    fn test_registry_error_conversion_to_error_response() {
        let err = RegistryError::InvalidRequest("bad name".to_string());
        let error_response: ErrorResponse = err.into();
        assert_eq!(error_response.error_code, "INVALID_REQUEST");
        assert_eq!(error_response.message, "bad name");
    }

    #[test]
    fn test_core_error_maps_to_registry_error() {
        let err: RegistryError = CoreError::InvalidRecord("port 0".to_string()).into();
        assert!(matches!(err, RegistryError::InvalidRequest(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: RegistryError = CoreError::RegistryUnavailable("squatter".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_registry_error_into_response_status() {
        let response = RegistryError::InstanceNotFound("billing".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = RegistryError::StorageError("disk full".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_io_error_is_storage_error() {
        let err: RegistryError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
    }
}
