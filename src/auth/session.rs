/// Session token hashing and background expiry
///
/// Sessions never store raw tokens, only the SHA-256 of the access and
/// refresh tokens currently bound to them.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::store::SessionStore;

/// Hex-encoded SHA-256 of a token
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Periodically move stale active sessions to `expired`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_session_sweeper(sessions: Arc<dyn SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match sessions.expire_sessions(Utc::now()).await {
                Ok(0) => {}
                Ok(expired) => tracing::info!(expired, "Expired stale sessions"),
                Err(e) => tracing::error!(error = %e, "Session sweep failed"),
            }
        }
    })
}
