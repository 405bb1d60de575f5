use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse},
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::{
    error::SankeyError,
    query::TransitionQuery,
    render::{render_fragment, wrap_page, SankeyStyle},
    transform::build_sankey_graph,
    AppState,
};

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

pub async fn display_sankey(State(state): State<AppState>) -> Result<Html<String>, SankeyError> {
    let query = TransitionQuery::Top {
        limit: state.config.top_transitions,
    };
    let rows = state.warehouse.fetch_transitions(&query).await?;
    let graph = build_sankey_graph(&rows);
    info!(
        nodes = graph.nodes.len(),
        links = graph.links.len(),
        "Rendering transition overview"
    );

    let fragment = render_fragment(
        &graph,
        &SankeyStyle::overview(),
        &state.config.plotly_js_url,
        &mut rand::thread_rng(),
    )?;
    Ok(Html(wrap_page(&fragment)))
}

pub async fn display_sankey_from_source(
    State(state): State<AppState>,
    Path(source_node): Path<String>,
) -> Result<Html<String>, SankeyError> {
    let query = TransitionQuery::FromSource {
        source: source_node.clone(),
    };
    let rows = state.warehouse.fetch_transitions(&query).await?;
    let graph = build_sankey_graph(&rows);
    info!(
        source = %source_node,
        nodes = graph.nodes.len(),
        links = graph.links.len(),
        "Rendering transitions from source"
    );

    let fragment = render_fragment(
        &graph,
        &SankeyStyle::from_source(&source_node),
        &state.config.plotly_js_url,
        &mut rand::thread_rng(),
    )?;
    Ok(Html(fragment))
}
