/// Authentication Routes
///
/// Signup, login, token refresh, logout, the caller's profile and password
/// change. Handlers are thin: the flows live in [`AuthService`].

use actix_web::{web, HttpResponse};

use crate::auth::{
    AuthService, ChangePasswordRequest, Identity, LoginRequest, RefreshRequest, SignupRequest,
};
use crate::error::{AppError, ErrorContext};
use crate::models::ProfileUpdate;
use crate::request_metadata::RequestMetadata;

fn logged(context: &ErrorContext) -> impl Fn(AppError) -> AppError + '_ {
    move |e| {
        context.log_error(&e);
        e
    }
}

/// POST /signup
///
/// Create an account in the requested (or configured default) organization.
///
/// # Errors
/// - 400: validation failure, duplicate email, unknown or inactive organization
/// - 5xx: datastore unavailable
pub async fn signup(
    form: web::Json<SignupRequest>,
    auth: web::Data<AuthService>,
    meta: RequestMetadata,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_signup");
    let response = auth
        .signup(form.into_inner(), &meta)
        .await
        .map_err(logged(&context))?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %response.user.id,
        "Signup completed"
    );

    Ok(HttpResponse::Ok().json(response))
}

/// POST /login
///
/// # Errors
/// - 401: unknown email or wrong password (indistinguishable)
/// - 423: account temporarily locked
/// - 403: account not active
pub async fn login(
    form: web::Json<LoginRequest>,
    auth: web::Data<AuthService>,
    meta: RequestMetadata,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");
    let response = auth
        .login(form.into_inner(), &meta)
        .await
        .map_err(logged(&context))?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %response.user.id,
        "Login completed"
    );

    Ok(HttpResponse::Ok().json(response))
}

/// POST /refresh
///
/// Exchange a refresh token for a new access token.
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");
    let tokens = auth
        .refresh(&form.refresh_token)
        .await
        .map_err(logged(&context))?;

    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /logout
///
/// Revokes every session of the caller. Always 200 for a valid bearer token.
pub async fn logout(
    identity: web::ReqData<Identity>,
    auth: web::Data<AuthService>,
    meta: RequestMetadata,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_logout").with_user_id(identity.user_id().to_string());
    let revoked = auth
        .logout(&identity, &meta)
        .await
        .map_err(logged(&context))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Successfully logged out",
        "sessions_revoked": revoked,
    })))
}

/// GET /me
pub async fn get_current_user(identity: web::ReqData<Identity>) -> HttpResponse {
    HttpResponse::Ok().json(identity.user.profile())
}

/// PUT /me
///
/// Partial update of the caller's own profile. Role and status are not
/// accepted here.
pub async fn update_current_user(
    form: web::Json<ProfileUpdate>,
    identity: web::ReqData<Identity>,
    auth: web::Data<AuthService>,
    meta: RequestMetadata,
) -> Result<HttpResponse, AppError> {
    let context =
        ErrorContext::new("user_profile_update").with_user_id(identity.user_id().to_string());
    let profile = auth
        .update_profile(&identity, form.into_inner(), &meta)
        .await
        .map_err(logged(&context))?;

    Ok(HttpResponse::Ok().json(profile))
}

/// POST /change-password
///
/// # Errors
/// - 400: wrong current password, weak or mismatched new password
pub async fn change_password(
    form: web::Json<ChangePasswordRequest>,
    identity: web::ReqData<Identity>,
    auth: web::Data<AuthService>,
    meta: RequestMetadata,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("password_change").with_user_id(identity.user_id().to_string());
    auth.change_password(&identity, form.into_inner(), &meta)
        .await
        .map_err(logged(&context))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Password changed successfully. Please log in again."
    })))
}
