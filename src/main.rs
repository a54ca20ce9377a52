use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod advisor;
mod charts;
mod config;
mod db;
mod models;
mod server;
mod shape;

#[derive(Parser)]
#[command(name = "expedition-metrics")]
#[command(about = "Expedition biometrics charting and advisory API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve,
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic sample data
    Seed,
    /// Import metric rows of one kind from a CSV file
    Import {
        #[arg(long, value_enum)]
        kind: db::MetricKind,
        #[arg(long)]
        csv: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::Serve => {
            charts::register_fonts()?;
            let advisor = advisor::Advisor::new(
                config.gigachat_api_url.clone(),
                config.require_auth_key()?.to_string(),
                config.gigachat_model.clone(),
            );
            let state = Arc::new(server::AppState { pool, advisor });

            let listener = tokio::net::TcpListener::bind(&config.bind_addr)
                .await
                .with_context(|| format!("failed to bind {}", config.bind_addr))?;
            tracing::info!("listening on {}", config.bind_addr);
            axum::serve(listener, server::router(state)).await?;
        }
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { kind, csv } => {
            let inserted = db::import_csv(&pool, kind, &csv).await?;
            println!("Inserted {inserted} rows from {}.", csv.display());
        }
    }

    Ok(())
}
