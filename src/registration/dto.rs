use serde::{Deserialize, Serialize};

use crate::token::ConfirmationToken;

/// Request body for registration. Accepts `{email, password}` or
/// `{identity, credential}`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(alias = "identity")]
    pub email: String,
    #[serde(alias = "credential")]
    pub password: String,
}

/// Returned with `201 Created` once the pending record exists.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub email: String,
    /// Only present when the server is configured to expose tokens (dev/test).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<ConfirmationToken>,
}

/// Query string of the confirmation link.
#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub message: String,
    pub email: String,
}

/// Request body for resending the confirmation mail.
#[derive(Debug, Deserialize)]
pub struct ResendRequest {
    #[serde(alias = "identity")]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
