use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::time::Duration;

use crate::auth::{spawn_session_sweeper, AuthService, CredentialHasher, TokenCodec};
use crate::configuration::{SessionSettings, Settings};
use crate::error::{AppError, ValidationError};
use crate::logger::LoggerMiddleware;
use crate::middleware::BearerAuth;
use crate::routes::{
    change_password, get_current_user, health_check, list_audit_logs, list_users, login, logout,
    refresh, signup, update_current_user,
};
use crate::store::AuthStores;

const JSON_BODY_LIMIT: usize = 64 * 1024;

/// Wire the orchestrator from configuration and a set of stores.
pub fn build_auth_service(
    configuration: &Settings,
    hasher: CredentialHasher,
    stores: AuthStores,
) -> AuthService {
    AuthService::new(
        hasher,
        TokenCodec::from_settings(&configuration.jwt),
        stores,
        configuration.jwt.clone(),
        configuration.signup.clone(),
    )
}

/// Start the HTTP server and the session sweeper.
///
/// Must be called from within a tokio runtime.
pub fn run(
    listener: TcpListener,
    auth: AuthService,
    sessions: &SessionSettings,
) -> Result<Server, std::io::Error> {
    let auth = web::Data::new(auth);

    spawn_session_sweeper(
        auth.stores().sessions.clone(),
        Duration::from_secs(sessions.sweep_interval_seconds.max(1)),
    );

    let server = HttpServer::new(move || {
        let json_config = web::JsonConfig::default()
            .limit(JSON_BODY_LIMIT)
            .error_handler(|err, _req| {
                AppError::Validation(ValidationError::Invalid(format!(
                    "Invalid request body: {}",
                    err
                )))
                .into()
            });
        let query_config = web::QueryConfig::default().error_handler(|err, _req| {
            AppError::Validation(ValidationError::Invalid(format!("Invalid query: {}", err))).into()
        });

        App::new()
            .wrap(LoggerMiddleware)
            .app_data(json_config)
            .app_data(query_config)
            .app_data(auth.clone())
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/signup", web::post().to(signup))
            .route("/login", web::post().to(login))
            .route("/refresh", web::post().to(refresh))
            // Bearer-authenticated routes
            .service(
                web::resource("/logout")
                    .wrap(BearerAuth)
                    .route(web::post().to(logout)),
            )
            .service(
                web::resource("/me")
                    .wrap(BearerAuth)
                    .route(web::get().to(get_current_user))
                    .route(web::put().to(update_current_user)),
            )
            .service(
                web::resource("/change-password")
                    .wrap(BearerAuth)
                    .route(web::post().to(change_password)),
            )
            .service(
                web::resource("/users")
                    .wrap(BearerAuth)
                    .route(web::get().to(list_users)),
            )
            .service(
                web::resource("/audit-logs")
                    .wrap(BearerAuth)
                    .route(web::get().to(list_audit_logs)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
