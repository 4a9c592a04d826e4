//! Error responses.
//!
//! # Responsibilities
//! - Map handler and middleware failures to HTTP status codes
//! - Render every error in the same JSON envelope: `{"error": ...}`
//! - Turn handler panics into a 500 that closes the connection
//!
//! # Design Decisions
//! - Internal details are logged, never sent to the client

use std::any::Any;
use std::collections::BTreeMap;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::lifecycle::tasks::panic_message;

/// Field name → problem, as returned for 422 responses.
pub type FieldErrors = BTreeMap<&'static str, &'static str>;

const INTERNAL_MESSAGE: &str = "the server encountered a problem and could not process your request";

/// Every error a request can end in.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("internal error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("the requested resource could not be found")]
    NotFound,

    #[error("the {0} method is not supported for this resource")]
    MethodNotAllowed(Method),

    #[error("{0}")]
    BadRequest(String),

    #[error("failed validation")]
    FailedValidation(FieldErrors),

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("the request took too long to process")]
    RequestTimeout,
}

impl ApiError {
    pub fn internal(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ApiError::Internal(err.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::EditConflict => StatusCode::CONFLICT,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
        }
    }

    fn body(&self) -> Value {
        match self {
            ApiError::Internal(_) => json!({ "error": INTERNAL_MESSAGE }),
            ApiError::FailedValidation(fields) => json!({ "error": fields }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            tracing::error!(error = %e, "Request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

/// Response for a handler that panicked.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!(panic = %panic_message(payload.as_ref()), "Handler panicked");
    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": INTERNAL_MESSAGE })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
