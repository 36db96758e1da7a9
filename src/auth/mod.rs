use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod dto;
pub mod handlers;
pub mod password;
pub mod session;
pub mod tokens;

pub use session::AuthUser;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
