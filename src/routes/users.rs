use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::{AuthService, Identity, MAX_PAGE_SIZE};
use crate::error::{AppError, ErrorContext};
use crate::models::AuditLogFilter;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    MAX_PAGE_SIZE
}

/// GET /users
///
/// Users of the caller's organization. Requires hospital_admin or above.
pub async fn list_users(
    query: web::Query<PageQuery>,
    identity: web::ReqData<Identity>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("list_users").with_user_id(identity.user_id().to_string());
    let page = auth
        .list_organization_users(&identity, query.offset, query.limit)
        .await
        .map_err(|e| {
            context.log_error(&e);
            e
        })?;

    Ok(HttpResponse::Ok().json(page))
}

/// GET /audit-logs
///
/// Requires the `audit_logs.read` permission.
pub async fn list_audit_logs(
    query: web::Query<AuditLogFilter>,
    identity: web::ReqData<Identity>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("list_audit_logs").with_user_id(identity.user_id().to_string());
    let page = auth
        .list_audit_logs(&identity, query.into_inner())
        .await
        .map_err(|e| {
            context.log_error(&e);
            e
        })?;

    Ok(HttpResponse::Ok().json(page))
}
