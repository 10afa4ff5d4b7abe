pub mod config;
pub mod contact;
pub mod extract;
pub mod llm;
pub mod mailer;
pub mod models;
pub mod pipeline;
pub mod places;
pub mod scraping;
pub mod session;
mod utils;
pub mod views;
pub mod web;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{ConfigStore, Settings};

pub use pipeline::{EventAgent, PipelineReport};

pub async fn run() -> Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("ignoring unreadable .env file: {err}");
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,event_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env().context("failed to load configuration")?;
    tracing::info!(
        addr = %settings.listen_addr,
        maps = settings.maps_api_key.is_some(),
        browser = ?settings.browser,
        llm = ?llm::LlmTarget::from_env(),
        "starting event agent"
    );

    let addr = settings.listen_addr;
    let app = web::router(web::AppState::new(settings, ConfigStore::load()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("open http://{addr}/ in a browser");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
