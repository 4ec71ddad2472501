mod admin;
mod auth;
mod public;
mod user;

pub use admin::admin_routes;
pub use auth::auth_routes;
pub use public::public_routes;
pub use user::user_routes;
