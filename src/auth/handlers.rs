use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, PublicUser,
            RefreshRequest, RegisterRequest, ResetPasswordRequest, VerifyAccountRequest,
        },
        password::{hash_password, verify_password},
        session::{AuthUser, SessionKeys},
        tokens,
    },
    error::{ApiError, ApiResult},
    mailer,
    state::AppState,
    users::repo::{self, User},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route(
            "/generate-verification-token",
            post(generate_verification_token),
        )
        .route("/verify-account", put(verify_account))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", put(reset_password))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_password_length(password: &str) -> ApiResult<()> {
    if password.len() < 8 {
        return Err(ApiError::validation("Password too short"));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::validation("Invalid email"));
    }
    check_password_length(&payload.password)?;

    if repo::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::conflict("User already registered"));
    }

    let hash = hash_password(&payload.password)?;

    // Two registrations can still race past the lookup; the unique
    // constraint settles it and reports the same conflict.
    let user = match repo::create(
        &state.db,
        &payload.first_name,
        &payload.last_name,
        &payload.email,
        &hash,
    )
    .await
    {
        Ok(u) => u,
        Err(e) if repo::is_duplicate_email(&e) => {
            return Err(ApiError::conflict("User already registered"));
        }
        Err(e) => return Err(ApiError::Internal(e.into())),
    };

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    payload.email = payload.email.trim().to_lowercase();

    // Unknown email and wrong password are the same observable failure.
    let user = repo::find_by_email(&state.db, &payload.email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid login credentials"))?;

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::unauthorized("Invalid login credentials"));
    }

    let keys = SessionKeys::from_ref(&state);
    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let keys = SessionKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;

    let user = repo::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    Ok(Json(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state))]
pub async fn generate_verification_token(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<MessageResponse>> {
    let user = repo::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let raw = tokens::new_action_token();
    repo::store_verification_token(
        &state.db,
        user.id,
        &tokens::hash_action_token(&raw),
        tokens::action_token_expiry(),
    )
    .await?;

    let html = format!(
        "If you were requested to verify your account, verify now within 10 minutes, \
         otherwise ignore this message. \
         <a href=\"{}/verify-account/{}\">Click to verify</a>",
        state.config.mail.link_base, raw
    );
    mailer::dispatch(
        state.mailer.clone(),
        state.config.mail.notify_to.clone(),
        "Verify Account".into(),
        html.clone(),
    );

    info!(user_id = %user.id, "verification token issued");
    Ok(Json(MessageResponse { message: html }))
}

#[derive(Debug, Serialize)]
pub struct VerifiedResponse {
    pub message: String,
    pub data: User,
}

#[instrument(skip(state, payload))]
pub async fn verify_account(
    State(state): State<AppState>,
    Json(payload): Json<VerifyAccountRequest>,
) -> ApiResult<Json<VerifiedResponse>> {
    let hashed = tokens::hash_action_token(&payload.token);
    let user = repo::consume_verification_token(&state.db, &hashed)
        .await?
        .ok_or_else(|| ApiError::not_found("Token expired, try again later"))?;

    info!(user_id = %user.id, "account verified");
    Ok(Json(VerifiedResponse {
        message: "Account verified successfully".into(),
        data: user,
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    payload.email = payload.email.trim().to_lowercase();

    let user = repo::find_by_email(&state.db, &payload.email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let raw = tokens::new_action_token();
    repo::store_reset_token(
        &state.db,
        user.id,
        &tokens::hash_action_token(&raw),
        tokens::action_token_expiry(),
    )
    .await?;

    let html = format!(
        "If you were requested to reset your password, reset now within 10 minutes, \
         otherwise ignore this message. \
         <a href=\"{}/reset-password/{}\">Click to reset</a>",
        state.config.mail.link_base, raw
    );
    mailer::dispatch(
        state.mailer.clone(),
        user.email.clone(),
        "Reset Password".into(),
        html,
    );

    info!(user_id = %user.id, "password reset token issued");
    Ok(Json(MessageResponse {
        message: format!("A password reset email has been sent to {}", user.email),
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    check_password_length(&payload.password)?;

    let hashed = tokens::hash_action_token(&payload.token);
    let new_hash = hash_password(&payload.password)?;
    let user = repo::consume_reset_token(&state.db, &hashed, &new_hash)
        .await?
        .ok_or_else(|| ApiError::not_found("Token expired, try again later"))?;

    info!(user_id = %user.id, "password reset");
    Ok(Json(MessageResponse {
        message: "Password updated successfully".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last@sub.domain.org"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("spaces in@x.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn password_length_policy() {
        assert!(check_password_length("1234567").is_err());
        assert!(check_password_length("12345678").is_ok());
    }
}
