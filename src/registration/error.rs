use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

use crate::registration::dto::ErrorResponse;
use crate::registration::repo::StoreError;
use crate::token::TokenError;

/// Message shown for every confirmation failure. The precise reason only
/// goes to the server log.
pub const INVALID_LINK_MESSAGE: &str = "Invalid or expired confirmation link";

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("user already exists")]
    AlreadyRegistered,

    #[error("registration failed: {0}")]
    Internal(#[source] anyhow::Error),
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists => RegistrationError::AlreadyRegistered,
            StoreError::Backend(e) => RegistrationError::Internal(e),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfirmationError {
    #[error("invalid confirmation token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("confirmed identity has no user record")]
    UnknownIdentity,

    #[error("confirmation failed: {0}")]
    Internal(#[source] anyhow::Error),
}

impl From<StoreError> for ConfirmationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Backend(e) => ConfirmationError::Internal(e),
            other => ConfirmationError::Internal(anyhow::Error::new(other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResendError {
    #[error("no user record for identity")]
    UnknownIdentity,

    #[error("user is already active")]
    AlreadyActive,

    #[error("resend failed: {0}")]
    Internal(#[source] anyhow::Error),
}

impl From<StoreError> for ResendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Backend(e) => ResendError::Internal(e),
            other => ResendError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Everything a registration handler can answer with.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(&'static str),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, (*msg).to_string()),
            ApiError::Registration(RegistrationError::AlreadyRegistered) => {
                (StatusCode::BAD_REQUEST, "User already exists".to_string())
            }
            ApiError::Confirmation(
                ConfirmationError::InvalidToken(_) | ConfirmationError::UnknownIdentity,
            ) => (StatusCode::BAD_REQUEST, INVALID_LINK_MESSAGE.to_string()),
            ApiError::Registration(RegistrationError::Internal(_))
            | ApiError::Confirmation(ConfirmationError::Internal(_))
            | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
