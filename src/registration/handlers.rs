use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    registration::{
        dto::{
            ConfirmQuery, ConfirmResponse, MessageResponse, RegisterRequest, RegisterResponse,
            ResendRequest,
        },
        error::{ApiError, ResendError, INVALID_LINK_MESSAGE},
        mailer::confirmation_url,
        password::hash_password,
        services::{is_valid_email, MIN_PASSWORD_LEN},
    },
    state::AppState,
    token::{ConfirmationToken, Identity},
};

pub fn registration_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/confirm", get(confirm))
        .route("/resend", post(resend))
}

/// Hand the link to the mail transport without waiting for delivery.
fn dispatch_confirmation(state: &AppState, identity: Identity, token: &ConfirmationToken) {
    let url = confirmation_url(&state.config.confirmation.base_url, token);
    let mailer = Arc::clone(&state.mailer);
    tokio::spawn(async move {
        match mailer.send(&identity, &url).await {
            Ok(()) => debug!(identity = %identity, "confirmation mail handed off"),
            Err(e) => error!(
                error = %e,
                identity = %identity,
                "confirmation mail failed; user stays pending until resend"
            ),
        }
    });
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        warn!(status = %rejection.status(), reason = %rejection.body_text(), "request body rejected");
        ApiError::BadRequest("Invalid request body")
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let payload = json_body(payload)?;

    // Identity::new caps the length, so check it before anything logs the address.
    let identity = Identity::new(normalize_email(&payload.email)).map_err(|_| {
        warn!(len = payload.email.len(), "email empty or too long");
        ApiError::BadRequest("Invalid email")
    })?;

    if !is_valid_email(identity.as_str()) {
        warn!(email = %identity, "invalid email");
        return Err(ApiError::BadRequest("Invalid email"));
    }

    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ApiError::BadRequest("Password too short"));
    }

    let credential = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        ApiError::Internal(e)
    })?;

    let token = state.registrar.register(&identity, &credential).await?;
    dispatch_confirmation(&state, identity.clone(), &token);

    info!(identity = %identity, "registration accepted");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Check your inbox to confirm your registration".into(),
            email: identity.into_string(),
            token: state.config.confirmation.expose_token.then_some(token),
        }),
    ))
}

#[instrument(skip_all)]
pub async fn confirm(
    State(state): State<AppState>,
    query: Result<Query<ConfirmQuery>, QueryRejection>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        warn!(reason = %rejection.body_text(), "confirmation query rejected");
        ApiError::BadRequest(INVALID_LINK_MESSAGE)
    })?;

    let identity = state
        .registrar
        .confirm(&query.token, state.config.confirmation.max_age())
        .await?;

    Ok(Json(ConfirmResponse {
        message: "Registration confirmed, you can now sign in".into(),
        email: identity.into_string(),
    }))
}

/// Any well-formed request gets 202 so the endpoint cannot be used to
/// look up accounts.
#[instrument(skip(state, payload))]
pub async fn resend(
    State(state): State<AppState>,
    payload: Result<Json<ResendRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let payload = json_body(payload)?;
    let accepted = (
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If the account is awaiting confirmation, a new link is on its way".into(),
        }),
    );

    let email = normalize_email(&payload.email);
    let Ok(identity) = Identity::new(email) else {
        return Ok(accepted);
    };

    match state.registrar.resend(&identity).await {
        Ok(token) => dispatch_confirmation(&state, identity, &token),
        Err(ResendError::UnknownIdentity) => debug!(identity = %identity, "resend for unknown identity"),
        Err(ResendError::AlreadyActive) => debug!(identity = %identity, "resend for active user"),
        Err(e) => error!(error = %e, identity = %identity, "resend failed"),
    }
    Ok(accepted)
}
