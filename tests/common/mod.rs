#![allow(dead_code)]

use medinventory_auth::auth::{CredentialHasher, Role};
use medinventory_auth::configuration::{get_configuration, Settings};
use medinventory_auth::models::Organization;
use medinventory_auth::startup::{build_auth_service, run};
use medinventory_auth::store::{AuthStores, InMemoryStore};
use medinventory_auth::telemetry::try_init_test_telemetry;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::Arc;

pub const PASSWORD: &str = "abc123";

pub struct TestApp {
    pub address: String,
    pub store: Arc<InMemoryStore>,
    pub organization: Organization,
    pub client: reqwest::Client,
}

pub fn test_configuration(organization: &Organization) -> Settings {
    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.jwt.secret = "integration-test-secret-that-is-long-enough".to_string();
    configuration.jwt.rotate_refresh_tokens = false;
    configuration.signup.default_organization_id = Some(organization.id);
    configuration.signup.auto_activate = true;
    configuration
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Spawn the server on a random port against a fresh in-memory store.
pub async fn spawn_app_with(customize: impl FnOnce(&mut Settings)) -> TestApp {
    try_init_test_telemetry();

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let store = Arc::new(InMemoryStore::new());
    let organization = Organization::new("City General Hospital");
    store.insert_organization(organization.clone());
    store.grant_permissions(Role::StaffUser, &["inventory.read"]);
    store.grant_permissions(Role::HospitalAdmin, &["inventory.read", "users.read"]);
    store.grant_permissions(Role::Auditor, &["inventory.read", "audit_logs.read"]);

    let mut configuration = test_configuration(&organization);
    customize(&mut configuration);

    let auth = build_auth_service(
        &configuration,
        CredentialHasher::with_params(1024, 1, 1).expect("valid argon2 params"),
        AuthStores::shared(store.clone()),
    );
    let server = run(listener, auth, &configuration.sessions).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        store,
        organization,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_authed(&self, path: &str, token: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", self.address, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_authed(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(&format!("{}{}", self.address, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn put_authed(&self, path: &str, token: &str, body: &Value) -> reqwest::Response {
        self.client
            .put(&format!("{}{}", self.address, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn signup(&self, email: &str) -> reqwest::Response {
        self.post_json(
            "/signup",
            &json!({
                "email": email,
                "password": PASSWORD,
                "confirm_password": PASSWORD,
                "first_name": "Asha",
                "last_name": "Rao"
            }),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.post_json(
            "/login",
            &json!({ "email": email, "password": password, "remember_me": false }),
        )
        .await
    }

    /// Sign up and return the parsed auth payload.
    pub async fn signup_ok(&self, email: &str) -> Value {
        let response = self.signup(email).await;
        assert_eq!(200, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    /// Log in and return the access and refresh tokens.
    pub async fn login_tokens(&self, email: &str) -> (String, String) {
        let response = self.login(email, PASSWORD).await;
        assert_eq!(200, response.status().as_u16());
        let body: Value = response.json().await.expect("Failed to parse response");
        tokens_of(&body)
    }
}

pub fn tokens_of(body: &Value) -> (String, String) {
    (
        body["tokens"]["access_token"].as_str().unwrap().to_string(),
        body["tokens"]["refresh_token"].as_str().unwrap().to_string(),
    )
}
