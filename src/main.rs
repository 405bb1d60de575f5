mod api;
mod config;
mod error;
mod models;
mod query;
mod render;
mod transform;
mod warehouse;

use std::sync::Arc;

use anyhow::Result;
use axum::{routing::get, Router};
use config::Config;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use warehouse::{BigQueryClient, Warehouse};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub warehouse: Arc<dyn Warehouse>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/display_sankey", get(api::display_sankey))
        .route(
            "/from_source/{source_node}",
            get(api::display_sankey_from_source),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "navflow_sankey=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let warehouse = BigQueryClient::from_config(&config);
    info!(
        project = %config.project_id,
        table = %config.events_table,
        "BigQuery client configured"
    );

    let state = AppState {
        config: config.clone(),
        warehouse: Arc::new(warehouse),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("navflow-sankey listening on {}", config.bind_addr);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
