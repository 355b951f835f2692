mod address_limit;
mod admin_auth;

pub use address_limit::*;
pub use admin_auth::*;
