//! Authorization and forwarding of calls to upstream AI providers.

mod auth;
mod forward;
mod providers;

pub use auth::*;
pub use forward::*;
pub use providers::*;
