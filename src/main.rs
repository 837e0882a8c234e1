use medinventory_auth::auth::CredentialHasher;
use medinventory_auth::configuration::get_configuration;
use medinventory_auth::startup::{build_auth_service, run};
use medinventory_auth::store::{AuthStores, PgAuthStore};
use medinventory_auth::telemetry::init_telemetry;
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    if configuration.signup.default_organization_id.is_none() {
        tracing::warn!("No default organization configured; signups must name an organization_id");
    }

    tracing::info!("Attempting to connect to database");
    let db = &configuration.database;
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .acquire_timeout(Duration::from_secs(db.acquire_timeout_seconds))
        .connect(&db.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;
    tracing::info!("Database connection pool created successfully");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run migrations: {}", e);
            std::io::Error::new(std::io::ErrorKind::Other, "Migration error")
        })?;

    let store = Arc::new(PgAuthStore::new(
        pool,
        Duration::from_secs(db.query_timeout_seconds),
    ));
    let auth = build_auth_service(
        &configuration,
        CredentialHasher::default(),
        AuthStores::shared(store),
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, auth, &configuration.sessions)?;
    tracing::info!("Server started successfully");

    server.await
}
