pub mod activation;
pub mod config;
pub mod crypto;
pub mod db;
pub mod delivery;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod rate_limit;
pub mod tiers;
pub mod util;
