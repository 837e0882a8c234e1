use actix_web::HttpResponse;

/// Liveness probe. Does not touch the datastore.
pub async fn health_check() -> HttpResponse {
    tracing::debug!("Health check endpoint called");
    HttpResponse::Ok().finish()
}
