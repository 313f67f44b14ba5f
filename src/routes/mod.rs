mod auth;
mod health_check;

pub use auth::{
    active_sessions, forgot_password, get_current_user, login, logout, logout_all, logout_device,
    refresh, register, reset_password,
};
pub use health_check::health_check;
