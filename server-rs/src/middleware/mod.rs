pub mod admin;
pub mod auth;
pub mod guards;
pub mod rate_limit;

pub use admin::*;
pub use auth::*;
pub use guards::*;
pub use rate_limit::*;
