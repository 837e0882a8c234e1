/// Typed records for tenants, accounts, sessions and the audit trail.
///
/// Stores hand these out already validated; nothing downstream reads
/// persisted data by string key.

mod audit;
mod organization;
mod session;
mod user;

pub use audit::{AuditLogEntry, AuditLogFilter, NewAuditLogEntry};
pub use organization::Organization;
pub use session::{NewSession, Session, SessionStatus};
pub use user::{NewUser, ProfileUpdate, User, UserProfile, UserStatus};
