mod auth;
pub mod handlers;
pub mod response;
mod routes;

pub use auth::AuthUser;
pub use routes::create_router;
