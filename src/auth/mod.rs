//! Authentication: JWT tokens, user accounts, login/register endpoints and
//! the bearer-token middleware protecting the API.

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod user_store;

pub use api::AuthState;
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use models::{Claims, User};
pub use user_store::UserStore;
