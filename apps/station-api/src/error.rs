use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::auth::AuthError;
use crate::store::StoreError;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Request-level failures. Per-node fan-out failures never reach this type;
/// they are folded into the dashboard response instead.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Bad request: {0}")]
    Validation(String),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("{context}")]
    Upstream {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ServiceError {
    pub fn upstream(context: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Upstream { context, source }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Auth(err) => err.into(),
            ServiceError::Validation(message) => {
                AppError::bad_request(format!("Bad request: {message}"))
            }
            ServiceError::MethodNotAllowed => AppError::method_not_allowed(),
            ServiceError::Upstream { context, source } => {
                tracing::error!(error = %source, context, "store error");
                AppError::internal(context)
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match &err {
            AuthError::MissingCredential => AppError::bad_request(err.to_string()),
            AuthError::InvalidCredential { .. } => AppError::unauthorized(err.to_string()),
            AuthError::Lookup(source) => {
                tracing::error!(error = %source, "api key lookup failed");
                AppError::internal(err.to_string())
            }
        }
    }
}
