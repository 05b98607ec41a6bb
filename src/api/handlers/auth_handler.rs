use axum::{
    Json,
    extract::{Extension, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tracing::{debug, info};

use crate::{
    api::{app_state::AppState, dto::auth_dto::*},
    error::AppError,
    security::{
        auth::{AuthContext, Credentials},
        middleware::ClientIp,
        validation::{Sanitizable, Validatable, validators},
    },
};

fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    Credentials::from_authorization_header(header)
        .bearer
        .ok_or_else(|| AppError::AuthRequired("Bearer token required".to_string()))
}

pub async fn login(
    State(state): State<AppState>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    Json(mut request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.sanitize();
    request.validate()?;
    debug!("Login attempt: {}", request.username);

    let response = state
        .gate
        .auth()
        .login(&request.username, &request.password, &client_ip)
        .await?;

    Ok(Json(ApiResponse::ok(response)))
}

pub async fn refresh(
    State(state): State<AppState>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    Json(mut request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.sanitize();
    request.validate()?;

    let grant = state
        .gate
        .auth()
        .refresh_access_token(&request.refresh_token, &client_ip)?;

    Ok(Json(ApiResponse::ok(grant)))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();

    state
        .gate
        .auth()
        .logout(&token, request.refresh_token.as_deref());

    Ok(Json(ApiResponse::empty()))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let revoked_sessions = state
        .gate
        .auth()
        .change_password(&context.subject, &request.old_password, &request.new_password)
        .await?;

    Ok(Json(ApiResponse::ok(ChangePasswordResponse { revoked_sessions })))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    let mut effective_permissions = state
        .gate
        .authorizer()
        .permissions_for(&context.role, &context.subject);
    effective_permissions.extend(context.permissions.iter().cloned());
    effective_permissions.sort();
    effective_permissions.dedup();

    Ok(Json(ApiResponse::ok(MeResponse {
        context,
        effective_permissions,
    })))
}

pub async fn create_account(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(mut request): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.sanitize();
    request.validate()?;

    validators::validate_role(&request.role, &state.gate.authorizer().known_roles())?;

    let account = state
        .gate
        .auth()
        .create_account(&request.username, &request.password, &request.role)
        .await?;

    info!(
        created_by = %context.subject,
        username = %account.username,
        role = %account.role,
        "Account created"
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(account))))
}
