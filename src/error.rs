use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::render::error_fragment;

#[derive(Debug, Error)]
pub enum SankeyError {
    #[error("{0:#}")]
    Query(#[from] anyhow::Error),
    #[error("{0}")]
    Schema(String),
    #[error("{0}")]
    Render(String),
}

impl SankeyError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::Schema(_) => "schema",
            Self::Render(_) => "render",
        }
    }
}

impl IntoResponse for SankeyError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        error!(kind = self.kind(), "Sankey request failed: {message}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(error_fragment(&message)),
        )
            .into_response()
    }
}
