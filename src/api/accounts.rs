//! `/api/accounts`: registration, login, password reset, profile, addresses,
//! login security and device sessions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::api::extract::{AuthUser, StaffUser};
use crate::api::AppState;
use crate::domain::aggregates::{AddressFields, Customer};
use crate::services::accounts::{
    AddressView, DeletionReport, LoginInput, LoginResponse, PasswordResetConfirm, ProfileUpdate, RefreshResponse,
    RegisterInput,
};
use crate::services::security::{SecurityDashboard, SecurityStatus};
use crate::services::ClientInfo;
use crate::ShopError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register/", post(register))
        .route("/verify-email/:token/", get(verify_email))
        .route("/token/", post(login))
        .route("/token/refresh/", post(refresh))
        .route("/password-reset/", post(request_password_reset))
        .route("/password-reset/:token/", post(confirm_password_reset))
        .route("/customer/", get(profile).put(update_profile))
        .route("/customer/addresses/", get(list_addresses).post(add_address))
        .route("/customer/addresses/:id/", put(update_address).delete(delete_address))
        .route("/delete-account/", post(delete_account))
        .route("/unlock/:token/", get(unlock))
        .route("/resend-code/", post(resend_code))
        .route("/security/status/", post(security_status))
        .route("/security/dashboard/", get(security_dashboard))
        .route("/sessions/", get(list_sessions))
        .route("/sessions/current/", get(current_session))
        .route("/sessions/:id/", delete(revoke_session))
        .route("/sessions/revoke-all/", post(revoke_all_sessions))
}

// =============================================================================
// Registration & tokens
// =============================================================================

async fn register(State(state): State<AppState>, Json(input): Json<RegisterInput>) -> ApiResult<(StatusCode, Json<Value>)> {
    let customer = state.accounts.register(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Registration successful! Please check your email to verify your account.",
            "user_id": customer.id,
            "email": customer.email,
        })),
    ))
}

async fn verify_email(State(state): State<AppState>, Path(token): Path<String>) -> ApiResult<Json<Value>> {
    let token = Uuid::parse_str(token.trim()).map_err(|_| ShopError::Validation("Invalid verification link".to_string()))?;
    let customer = state.accounts.verify_email(token).await?;
    Ok(Json(json!({"success": true, "message": "Email verified successfully", "email": customer.email})))
}

async fn login(State(state): State<AppState>, client: ClientInfo, Json(input): Json<LoginInput>) -> ApiResult<Json<LoginResponse>> {
    Ok(Json(state.accounts.login(input, &client).await?))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

async fn refresh(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    Ok(Json(state.accounts.refresh(&req.refresh, &client).await?))
}

// =============================================================================
// Profile & addresses
// =============================================================================

async fn profile(user: AuthUser) -> Json<Customer> { Json(user.customer) }

async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Json<Customer>> {
    Ok(Json(state.accounts.update_profile(&user.customer, update).await?))
}

async fn list_addresses(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let addresses = state.accounts.addresses(user.customer.id).await?;
    Ok(Json(json!({"addresses": addresses})))
}

async fn add_address(
    State(state): State<AppState>,
    user: AuthUser,
    Json(fields): Json<AddressFields>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (address, created) = state.accounts.add_address(user.customer.id, fields).await?;
    let (status, detail) = if created {
        (StatusCode::CREATED, "Address created successfully.")
    } else {
        (StatusCode::OK, "Address already exists.")
    };
    Ok((status, Json(json!({"detail": detail, "address_id": address.id}))))
}

async fn update_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(fields): Json<AddressFields>,
) -> ApiResult<Json<AddressView>> {
    let address = state.accounts.update_address(user.customer.id, id, fields).await?;
    Ok(Json(AddressView::from(address)))
}

async fn delete_address(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    state.accounts.delete_address(user.customer.id, id).await?;
    Ok(Json(json!({"detail": "Address deleted successfully."})))
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    #[serde(default)]
    pub password: Option<String>,
}

async fn delete_account(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<DeleteAccountRequest>,
) -> ApiResult<Json<Value>> {
    let report: DeletionReport = state.accounts.delete_account(&user.customer, req.password.as_deref()).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Your account has been permanently deleted.",
        "details": report,
    })))
}

// =============================================================================
// Login security
// =============================================================================

async fn unlock(State(state): State<AppState>, Path(token): Path<String>) -> ApiResult<Json<Value>> {
    let outcome = state.security.unlock(&token).await?;
    Ok(Json(json!({"success": true, "message": outcome.message(), "email": outcome.email()})))
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: String,
}

impl EmailRequest {
    fn email(&self) -> ApiResult<String> {
        let email = self.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(ShopError::Validation("Email is required".to_string()).into());
        }
        Ok(email)
    }
}

async fn request_password_reset(State(state): State<AppState>, Json(req): Json<EmailRequest>) -> ApiResult<Json<Value>> {
    state.accounts.request_password_reset(&req.email()?).await?;
    Ok(Json(json!({"message": "If an account exists for this email, password reset instructions have been sent."})))
}

async fn confirm_password_reset(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(input): Json<PasswordResetConfirm>,
) -> ApiResult<Json<Value>> {
    let token = Uuid::parse_str(token.trim()).map_err(|_| ShopError::Validation("Invalid password reset link.".to_string()))?;
    let sessions_revoked = state.accounts.reset_password(token, input).await?;
    Ok(Json(json!({
        "message": "Your password has been reset successfully!",
        "sessions_revoked": sessions_revoked,
    })))
}

async fn resend_code(State(state): State<AppState>, client: ClientInfo, Json(req): Json<EmailRequest>) -> ApiResult<Json<Value>> {
    state.security.resend_code(&req.email()?, &client.ip).await?;
    Ok(Json(json!({"message": "Verification code sent successfully"})))
}

async fn security_status(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(req): Json<EmailRequest>,
) -> ApiResult<Json<SecurityStatus>> {
    Ok(Json(state.security.status(&req.email()?, &client.ip).await?))
}

async fn security_dashboard(State(state): State<AppState>, _staff: StaffUser) -> ApiResult<Json<SecurityDashboard>> {
    Ok(Json(state.security.dashboard().await?))
}

// =============================================================================
// Sessions
// =============================================================================

async fn list_sessions(State(state): State<AppState>, user: AuthUser, client: ClientInfo) -> ApiResult<Json<Value>> {
    let sessions = state.sessions.list(user.customer.id, &user.claims.jti, &client.ip).await?;
    Ok(Json(json!({"total": sessions.len(), "sessions": sessions})))
}

async fn current_session(State(state): State<AppState>, user: AuthUser, client: ClientInfo) -> ApiResult<Json<Value>> {
    let (session, active) = state.sessions.current(user.customer.id, &user.claims.jti, &client.ip).await?;
    let session = session.ok_or(ShopError::NotFound("Session"))?;
    Ok(Json(json!({"session": session, "total_active_sessions": active})))
}

async fn revoke_session(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let session = state.sessions.revoke(user.customer.id, id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Session revoked: {}", session.device_display()),
        "revoked_session": {"id": session.id, "revoked_at": session.revoked_at},
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeAllRequest {
    #[serde(default)]
    pub include_current: bool,
}

async fn revoke_all_sessions(
    State(state): State<AppState>,
    user: AuthUser,
    client: ClientInfo,
    body: Option<Json<RevokeAllRequest>>,
) -> ApiResult<Json<Value>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let revoked = state.sessions.revoke_all(&user.customer, &user.claims.jti, &client.ip, req.include_current).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Revoked {revoked} session(s)"),
        "revoked_count": revoked,
        "include_current": req.include_current,
    })))
}
