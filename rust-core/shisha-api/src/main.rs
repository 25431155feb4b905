// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! Shisha tracker API server binary
//!
//! Reads its configuration from the environment, optionally applies the
//! relational schema, and serves the HTTP API.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use shisha_api::ServerConfig;

/// Shisha tracker HTTP API server.
#[derive(Parser, Debug)]
#[command(name = "shisha-api", version, about = "HTTP API server for the shisha tracker")]
struct Cli {
    /// Apply the relational schema and exit without serving.
    #[arg(long)]
    migrate_only: bool,

    /// Apply the relational schema before serving (same as MIGRATE_ON_START=true).
    #[arg(long)]
    migrate_on_start: bool,

    /// Emit logs as JSON lines (same as LOG_FORMAT=json).
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = json || std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = ServerConfig::from_env().context("reading configuration")?;
    config.migrate_on_start |= cli.migrate_on_start;

    if cli.migrate_only {
        tracing::info!(backend = ?config.backend, "running migrations only");
        shisha_api::run_migrations(&config)
            .await
            .context("applying schema")?;
        tracing::info!("migrations complete, exiting");
        return Ok(());
    }

    tracing::info!(
        backend = ?config.backend,
        "Starting shisha API server on {}",
        config.bind_addr()
    );

    shisha_api::serve(config).await.context("serving API")?;

    Ok(())
}
