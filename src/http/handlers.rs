//! Request handlers.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tower::{timeout::error::Elapsed, BoxError};

use crate::http::response::{ApiError, FieldErrors};
use crate::http::server::AppState;
use crate::users::tokens::validate_plaintext;
use crate::users::{password, validate_registration, Scope, UserError, WelcomeMessage};

pub async fn healthcheck(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "available",
        "system_info": {
            "environment": state.config.listener.environment,
            "version": env!("CARGO_PKG_VERSION"),
        }
    }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Register a user and send the welcome mail in the background.
///
/// The response does not wait for delivery. A failed send is logged by the
/// task runner and never reaches the client.
pub async fn register_user(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(input) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    validate_registration(&input.name, &input.email, &input.password)
        .map_err(ApiError::FailedValidation)?;

    let password_hash = password::hash(input.password, state.config.passwords.cost)
        .await
        .map_err(ApiError::internal)?;

    let user = state
        .users
        .insert(&input.name, &input.email, password_hash)
        .map_err(user_error)?;

    let token = state.users.issue_token(
        user.id,
        state.config.tokens.activation_ttl(),
        Scope::Activation,
    );

    let message = WelcomeMessage {
        recipient: user.email.clone(),
        user_id: user.id,
        activation_token: token.plaintext,
    };
    state
        .tasks
        .run_fallible("welcome-email", state.mailer.send_welcome(message));

    tracing::info!(user_id = user.id, "User registered");
    Ok((StatusCode::CREATED, Json(json!({ "user": user }))))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivateRequest {
    #[serde(default)]
    pub token: String,
}

pub async fn activate_user(
    State(state): State<AppState>,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(input) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    validate_plaintext(&input.token).map_err(ApiError::FailedValidation)?;

    let user = state
        .users
        .consume_token(Scope::Activation, &input.token)
        .map_err(|e| match e {
            UserError::RecordNotFound => {
                let mut fields = FieldErrors::new();
                fields.insert("token", "invalid or expired token");
                ApiError::FailedValidation(fields)
            }
            other => user_error(other),
        })?;

    let user = state
        .users
        .activate(user.id, user.version)
        .map_err(user_error)?;
    state.users.delete_tokens_for_user(user.id, Scope::Activation);

    tracing::info!(user_id = user.id, "User activated");
    Ok(Json(json!({ "user": user })))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

pub async fn method_not_allowed(method: Method) -> ApiError {
    ApiError::MethodNotAllowed(method)
}

/// Map errors raised by the middleware stack (request timeout) to responses.
pub async fn middleware_error(err: BoxError) -> ApiError {
    if err.is::<Elapsed>() {
        ApiError::RequestTimeout
    } else {
        ApiError::Internal(err)
    }
}

fn user_error(err: UserError) -> ApiError {
    match err {
        UserError::Invalid(fields) => ApiError::FailedValidation(fields),
        UserError::DuplicateEmail => {
            let mut fields = FieldErrors::new();
            fields.insert("email", "a user with this email address already exists");
            ApiError::FailedValidation(fields)
        }
        UserError::RecordNotFound => ApiError::NotFound,
        UserError::EditConflict => ApiError::EditConflict,
    }
}
