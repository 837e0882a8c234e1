/// Middleware module
///
/// Bearer-token identity resolution for protected resources.

mod bearer_auth;

pub use bearer_auth::{bearer_token, BearerAuth};
