mod activation;
mod license;
mod proxy_credential;
mod usage;
mod verification;

pub use activation::*;
pub use license::*;
pub use proxy_credential::*;
pub use usage::*;
pub use verification::*;
