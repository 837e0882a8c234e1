mod auth;
mod health_check;
mod users;

pub use auth::{
    change_password, get_current_user, login, logout, refresh, signup, update_current_user,
};
pub use health_check::health_check;
pub use users::{list_audit_logs, list_users, PageQuery};
