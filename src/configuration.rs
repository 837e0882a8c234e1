use config::ConfigError;
use uuid::Uuid;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub signup: SignupSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
    /// Upper bound for a single datastore round trip.
    #[serde(default = "default_timeout_seconds")]
    pub query_timeout_seconds: u64,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// JWT authentication settings
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64, // seconds (30 minutes)
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry: i64, // seconds (1 day)
    #[serde(default = "default_remember_me_expiry")]
    pub remember_me_refresh_token_expiry: i64, // seconds (7 days)
    /// Issue a fresh refresh token on every refresh and retire the old one.
    #[serde(default)]
    pub rotate_refresh_tokens: bool,
}

impl JwtSettings {
    pub fn refresh_expiry(&self, remember_me: bool) -> i64 {
        if remember_me {
            self.remember_me_refresh_token_expiry
        } else {
            self.refresh_token_expiry
        }
    }
}

/// Tenant resolution and activation policy for self-service signup
#[derive(serde::Deserialize, Clone, Debug)]
pub struct SignupSettings {
    /// Organization assigned when the request names none. Without it,
    /// signups that omit `organization_id` are rejected.
    #[serde(default)]
    pub default_organization_id: Option<Uuid>,
    /// Promote new accounts straight to `active` instead of leaving them
    /// `pending` until verified.
    #[serde(default = "default_true")]
    pub auto_activate: bool,
}

impl Default for SignupSettings {
    fn default() -> Self {
        Self {
            default_organization_id: None,
            auto_activate: true,
        }
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct SessionSettings {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_timeout_seconds() -> u64 {
    5
}

fn default_access_token_expiry() -> i64 {
    30 * 60
}

fn default_refresh_token_expiry() -> i64 {
    24 * 60 * 60
}

fn default_remember_me_expiry() -> i64 {
    7 * 24 * 60 * 60
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// Load settings from `configuration.yaml` (optional) and `APP__*` environment
/// variables, e.g. `APP__JWT__SECRET`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
