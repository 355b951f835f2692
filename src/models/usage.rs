use serde::Serialize;

/// Call totals for one license at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub daily: i64,
    pub monthly: i64,
}
