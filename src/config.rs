use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::{bail, Result};

pub const DEFAULT_EVENTS_TABLE: &str = "analytics.navigation_events";
pub const DEFAULT_BQ_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_TOKEN_COMMAND: &str = "gcloud auth application-default print-access-token";
/// Upper bound on rows returned by the overview query.
pub const MAX_TOP_TRANSITIONS: u32 = 20;
pub const DEFAULT_PLOTLY_JS_URL: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub credentials_path: Option<PathBuf>,
    pub project_id: String,
    pub events_table: String,
    pub location: Option<String>,
    pub bq_base_url: String,
    pub access_token: Option<String>,
    pub token_command: String,
    pub request_timeout_seconds: u64,
    pub top_transitions: u32,
    pub plotly_js_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_raw =
            env::var("NAVFLOW_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_addr = normalize(&bind_raw)
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let credentials_path = non_empty_var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from);

        let Some(project_id) =
            non_empty_var("NAVFLOW_BQ_PROJECT_ID").or_else(|| non_empty_var("GOOGLE_CLOUD_PROJECT"))
        else {
            bail!("NAVFLOW_BQ_PROJECT_ID (or GOOGLE_CLOUD_PROJECT) must be set.");
        };

        let events_table = non_empty_var("NAVFLOW_EVENTS_TABLE")
            .unwrap_or_else(|| DEFAULT_EVENTS_TABLE.to_string());
        validate_table_identifier(&events_table)?;

        let location = non_empty_var("NAVFLOW_BQ_LOCATION");

        let bq_base_url = non_empty_var("NAVFLOW_BQ_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BQ_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let access_token = non_empty_var("NAVFLOW_BQ_ACCESS_TOKEN");
        let token_command = non_empty_var("NAVFLOW_BQ_TOKEN_COMMAND")
            .unwrap_or_else(|| DEFAULT_TOKEN_COMMAND.to_string());

        let request_timeout_seconds = env::var("NAVFLOW_BQ_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(60);

        let top_transitions =
            parse_top_transitions(env::var("NAVFLOW_TOP_TRANSITIONS").ok().as_deref());

        let plotly_js_url = non_empty_var("NAVFLOW_PLOTLY_JS_URL")
            .unwrap_or_else(|| DEFAULT_PLOTLY_JS_URL.to_string());

        Ok(Self {
            bind_addr,
            credentials_path,
            project_id,
            events_table,
            location,
            bq_base_url,
            access_token,
            token_command,
            request_timeout_seconds,
            top_transitions,
            plotly_js_url,
        })
    }
}

/// Table names are interpolated into SQL, so only plain identifier characters pass.
pub fn validate_table_identifier(table: &str) -> Result<()> {
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() < 2 || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        bail!("Events table `{table}` must look like dataset.table or project.dataset.table.");
    }
    let valid = table
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        bail!("Events table `{table}` contains characters outside [A-Za-z0-9_.-].");
    }
    Ok(())
}

/// Smaller overviews are allowed; anything above the cap is clamped to it.
pub fn parse_top_transitions(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
        .map(|v| v.min(MAX_TOP_TRANSITIONS))
        .unwrap_or(MAX_TOP_TRANSITIONS)
}

fn normalize(raw: &str) -> String {
    raw.trim().trim_matches('"').trim_matches('\'').to_string()
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| normalize(&v))
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{parse_top_transitions, validate_table_identifier, MAX_TOP_TRANSITIONS};

    #[test]
    fn accepts_qualified_table_names() {
        assert!(validate_table_identifier("analytics.navigation_events").is_ok());
        assert!(validate_table_identifier("odin-backup-1.onehub.onehub_analytics").is_ok());
    }

    #[test]
    fn rejects_injection_shaped_table_names() {
        assert!(validate_table_identifier("events").is_err());
        assert!(validate_table_identifier("a.b`; DROP TABLE x; --").is_err());
        assert!(validate_table_identifier("a..b").is_err());
        assert!(validate_table_identifier("a.b.c.d").is_err());
    }

    #[test]
    fn top_transitions_never_exceed_twenty() {
        assert_eq!(parse_top_transitions(None), MAX_TOP_TRANSITIONS);
        assert_eq!(parse_top_transitions(Some("500")), 20);
        assert_eq!(parse_top_transitions(Some(" 10 ")), 10);
        assert_eq!(parse_top_transitions(Some("0")), 20);
        assert_eq!(parse_top_transitions(Some("lots")), 20);
    }
}
