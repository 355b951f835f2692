use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use keygate::config::Config;
use keygate::db::{AppState, create_pool, queries};
use keygate::handlers;
use keygate::tiers::{TierRegistry, TierTable};

const CODE_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Parser)]
#[command(name = "keygate")]
#[command(author, version, about = "License activation and API key protection gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Validate a tier file and print the effective limits of every tier
    CheckTiers { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keygate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command.unwrap_or(Command::Serve) {
        Command::Serve => serve(Config::from_env()).await,
        Command::CheckTiers { path } => check_tiers(&path),
    }
}

fn check_tiers(path: &Path) -> anyhow::Result<()> {
    let table = TierTable::load(path)
        .with_context(|| format!("invalid tier file {}", path.display()))?;

    for (name, tier) in table.iter() {
        let resolved = table.resolve(name)?;
        let redirect = if resolved.redirected {
            format!(" -> {}", resolved.name)
        } else {
            String::new()
        };
        println!(
            "{}{}: daily={} monthly={} devices={}{}",
            name,
            redirect,
            resolved.limits.daily,
            resolved.limits.monthly,
            resolved.limits.devices,
            if tier.deprecated { " (deprecated)" } else { "" }
        );
    }
    println!("{} tiers OK", table.len());
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting keygate v{}", env!("CARGO_PKG_VERSION"));

    let pool = create_pool(&config.database_path)
        .with_context(|| format!("failed to open database {}", config.database_path))?;
    let tiers = TierRegistry::from_path(&config.tiers_path);
    let addr = config.addr();
    let sweep_interval = config.sweep_interval();

    let state = AppState::new(pool, config, tiers)?;

    tracing::info!(
        mode = %state.config.mode,
        providers = ?state.providers.names(),
        tiers = state.tiers.current().len(),
        admin = state.config.admin_token.is_some(),
        "Gateway configured"
    );

    state.address_limiter.clone().spawn_sweeper(sweep_interval);

    let purge_pool = state.db.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CODE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = purge_pool
                .get()
                .map_err(keygate::error::AppError::from)
                .and_then(|conn| queries::purge_verification_codes(&conn));
            match purged {
                Ok(0) => {}
                Ok(n) => tracing::info!(purged = n, "Purged verification codes"),
                Err(e) => tracing::error!(error = %e, "Failed to purge verification codes"),
            }
        }
    });

    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
