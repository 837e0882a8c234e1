/// Client details recorded on sessions and audit entries
use actix_web::{dev::Payload, FromRequest, HttpRequest};
use std::future::{ready, Ready};

const MAX_USER_AGENT_LEN: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMetadata {
    /// Client IP is the first `X-Forwarded-For` entry, then `X-Real-IP`,
    /// then the socket peer.
    pub fn from_http_request(req: &HttpRequest) -> Self {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let ip_address = header("X-Forwarded-For")
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| header("X-Real-IP").map(str::to_string))
            .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()));

        let user_agent =
            header("User-Agent").map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());

        Self {
            ip_address,
            user_agent,
        }
    }
}

impl FromRequest for RequestMetadata {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(RequestMetadata::from_http_request(req)))
    }
}
