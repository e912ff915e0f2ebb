// Main entry point for the document processing API server

mod config;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use routes::{build_router, AppState};
use statute_pipeline::{OpenAiOracle, PipelineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,statute_pipeline=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting statute processing API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Build the oracle client
    let mut oracle = OpenAiOracle::new(config.openai_api_key.clone());
    if let Some(base_url) = &config.openai_base_url {
        oracle = oracle.with_base_url(base_url.clone());
    }
    if let Some(model) = &config.extraction_model {
        oracle = oracle.with_model(model.clone());
    }

    let mut pipeline_config = PipelineConfig::default();
    if let Some(model) = &config.extraction_model {
        pipeline_config = pipeline_config.with_extraction_model(model.clone());
    }

    let state = AppState {
        db_pool: pool,
        oracle: Arc::new(oracle),
        pipeline_config,
    };
    let app = build_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
