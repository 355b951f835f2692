//! Per-license quota enforcement and per-address throttling.

mod address;
pub mod quota;

pub use address::AddressLimiter;
pub use quota::{QuotaExceeded, QuotaStatus, QuotaWindow, UsagePeriod};
