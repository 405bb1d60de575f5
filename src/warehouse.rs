use std::{future::Future, path::PathBuf, pin::Pin};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::Config,
    error::SankeyError,
    models::{JobReference, QueryRequest, QueryResponse, TableRow, TableSchema, TransitionRow},
    query::TransitionQuery,
};

const MAX_RESULT_FETCHES: usize = 200;
const REQUIRED_COLUMNS: [&str; 3] = ["Source", "Target", "Value"];

pub type TransitionsFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<TransitionRow>, SankeyError>> + Send + 'a>>;

/// Read-only access to aggregated navigation transitions.
pub trait Warehouse: Send + Sync {
    fn fetch_transitions<'a>(&'a self, query: &'a TransitionQuery) -> TransitionsFuture<'a>;
}

#[derive(Debug, Clone)]
pub enum TokenSource {
    Static(String),
    Command {
        command: String,
        credentials_path: Option<PathBuf>,
    },
}

impl TokenSource {
    async fn access_token(&self) -> Result<String> {
        let (command_line, credentials_path) = match self {
            Self::Static(token) => return Ok(token.clone()),
            Self::Command {
                command,
                credentials_path,
            } => (command, credentials_path),
        };

        let mut parts = command_line.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("Access token command is empty");
        };
        let mut command = Command::new(program);
        command.args(parts);
        if let Some(path) = credentials_path {
            command.env("GOOGLE_APPLICATION_CREDENTIALS", path);
        }

        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to execute `{command_line}`"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Access token command failed: {}", stderr.trim());
        }

        let token = String::from_utf8(output.stdout)
            .context("Access token command output was not UTF-8")?
            .trim()
            .to_string();
        if token.is_empty() {
            bail!("Access token command returned an empty token");
        }
        Ok(token)
    }
}

#[derive(Debug, Clone)]
pub struct BigQueryClient {
    base_url: String,
    project_id: String,
    events_table: String,
    location: Option<String>,
    timeout_seconds: u64,
    token: TokenSource,
}

impl BigQueryClient {
    pub fn from_config(config: &Config) -> Self {
        let token = match &config.access_token {
            Some(token) => TokenSource::Static(token.clone()),
            None => TokenSource::Command {
                command: config.token_command.clone(),
                credentials_path: config.credentials_path.clone(),
            },
        };
        Self {
            base_url: config.bq_base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            events_table: config.events_table.clone(),
            location: config.location.clone(),
            timeout_seconds: config.request_timeout_seconds,
            token,
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout_seconds.saturating_mul(1000)
    }

    fn build_request(&self, query: &TransitionQuery) -> QueryRequest {
        let parameters = query.parameters();
        QueryRequest {
            query: query.sql(&self.events_table),
            use_legacy_sql: false,
            parameter_mode: (!parameters.is_empty()).then(|| "NAMED".to_string()),
            query_parameters: parameters,
            timeout_ms: self.timeout_ms(),
            location: self.location.clone(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    async fn run(&self, query: &TransitionQuery) -> Result<Vec<TransitionRow>, SankeyError> {
        let token = self.token.access_token().await?;
        let request = self.build_request(query);

        let url = format!("{}/projects/{}/queries", self.base_url, self.project_id);
        let body = serde_json::to_string(&request).context("Failed to encode BigQuery request")?;
        let first = execute_curl_json(
            "POST",
            &url,
            &token,
            self.timeout_seconds,
            Some(body),
            &[],
        )
        .await?;
        let first = decode_response(first)?;

        let token = token.as_str();
        let collected = collect_pages(first, |job, page_token| {
            let url = format!(
                "{}/projects/{}/queries/{}",
                self.base_url, self.project_id, job.job_id
            );
            let mut params = vec![("timeoutMs", self.timeout_ms().to_string())];
            if let Some(location) = job.location.or_else(|| self.location.clone()) {
                params.push(("location", location));
            }
            if let Some(page_token) = page_token {
                params.push(("pageToken", page_token));
            }
            debug!(job_id = %job.job_id, "Fetching BigQuery results");
            let timeout_seconds = self.timeout_seconds;
            async move {
                let raw =
                    execute_curl_json("GET", &url, token, timeout_seconds, None, &params).await?;
                decode_response(raw)
            }
        })
        .await?;

        let Some(schema) = collected.schema else {
            return Err(SankeyError::Schema(
                "Query result did not include a schema.".to_string(),
            ));
        };
        let transitions = decode_rows(&schema, &collected.rows, query)?;
        info!(
            rows = transitions.len(),
            pages = collected.fetches,
            "BigQuery transitions fetched"
        );
        Ok(transitions)
    }
}

#[derive(Debug, Default)]
pub struct CollectedPages {
    pub schema: Option<TableSchema>,
    pub rows: Vec<TableRow>,
    pub fetches: usize,
}

/// Follows an incomplete or paged job until every row has been fetched.
///
/// `fetch_next` receives the job reference and the page token (if any) of the last response.
pub async fn collect_pages<F, Fut>(
    first: QueryResponse,
    mut fetch_next: F,
) -> Result<CollectedPages, SankeyError>
where
    F: FnMut(JobReference, Option<String>) -> Fut,
    Fut: Future<Output = Result<QueryResponse>>,
{
    let mut page = first;
    let mut collected = CollectedPages {
        schema: page.schema.take(),
        rows: std::mem::take(&mut page.rows),
        fetches: 1,
    };

    while !page.job_complete || page.page_token.is_some() {
        if collected.fetches >= MAX_RESULT_FETCHES {
            return Err(SankeyError::Query(anyhow::anyhow!(
                "BigQuery job did not finish after {} result requests",
                collected.fetches
            )));
        }
        let Some(job) = page.job_reference.clone() else {
            return Err(SankeyError::Query(anyhow::anyhow!(
                "BigQuery response is missing a job reference"
            )));
        };

        let mut next = fetch_next(job.clone(), page.page_token.take()).await?;
        // Rows only arrive once the job completes; later pages repeat the schema.
        if collected.schema.is_none() {
            collected.schema = next.schema.take();
        }
        collected.rows.append(&mut next.rows);
        next.job_reference = next.job_reference.or(Some(job));
        page = next;
        collected.fetches += 1;
    }

    Ok(collected)
}

impl Warehouse for BigQueryClient {
    fn fetch_transitions<'a>(&'a self, query: &'a TransitionQuery) -> TransitionsFuture<'a> {
        Box::pin(self.run(query))
    }
}

fn decode_response(raw: Value) -> Result<QueryResponse> {
    let response = serde_json::from_value::<QueryResponse>(raw)
        .context("Failed to decode BigQuery query response")?;
    if let Some(first) = response.errors.first() {
        bail!(
            "BigQuery job failed: {}",
            first
                .message
                .as_deref()
                .or(first.reason.as_deref())
                .unwrap_or("unknown error")
        );
    }
    Ok(response)
}

/// Maps BigQuery rows onto transitions, failing when a required column is absent.
pub fn decode_rows(
    schema: &TableSchema,
    rows: &[TableRow],
    query: &TransitionQuery,
) -> Result<Vec<TransitionRow>, SankeyError> {
    let position = |name: &str| schema.fields.iter().position(|f| f.name == name);
    let (Some(source_col), Some(target_col), Some(value_col)) = (
        position(REQUIRED_COLUMNS[0]),
        position(REQUIRED_COLUMNS[1]),
        position(REQUIRED_COLUMNS[2]),
    ) else {
        return Err(SankeyError::Schema(
            "Query result must contain 'Source', 'Target', and 'Value' columns.".to_string(),
        ));
    };

    let mut transitions = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let transition = TransitionRow::new(
            string_cell(cell(row, source_col), "Source", idx)?,
            string_cell(cell(row, target_col), "Target", idx)?,
            count_cell(cell(row, value_col), idx)?,
        );
        if query.admits(&transition) {
            transitions.push(transition);
        }
    }

    if let Some(limit) = query.row_limit() {
        transitions.truncate(limit);
    }
    Ok(transitions)
}

fn cell(row: &TableRow, col: usize) -> &Value {
    static NULL: Value = Value::Null;
    row.f.get(col).map(|c| &c.v).unwrap_or(&NULL)
}

fn string_cell(value: &Value, column: &str, row: usize) -> Result<String, SankeyError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SankeyError::Schema(format!("Row {row} has a non-string {column} value")))
}

fn count_cell(value: &Value, row: usize) -> Result<u64, SankeyError> {
    // INT64 columns are returned as JSON strings.
    value
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| value.as_u64())
        .ok_or_else(|| SankeyError::Schema(format!("Row {row} has a non-integer Value")))
}

async fn execute_curl_json(
    method: &str,
    url: &str,
    token: &str,
    timeout_seconds: u64,
    body: Option<String>,
    query: &[(&str, String)],
) -> Result<Value> {
    let mut command = Command::new("curl");
    command
        .arg("-sS")
        .arg("--max-time")
        .arg(timeout_seconds.saturating_add(10).to_string())
        .arg("-H")
        .arg(format!("Authorization: Bearer {token}"))
        .arg("-H")
        .arg("Content-Type: application/json");

    if query.is_empty() {
        command.arg("-X").arg(method);
    } else {
        command.arg("-G");
        for (key, value) in query {
            command.arg("--data-urlencode").arg(format!("{key}={value}"));
        }
    }
    if let Some(body) = body {
        command.arg("-d").arg(body);
    }
    command.arg(url);

    let output = command
        .output()
        .await
        .with_context(|| format!("Failed to execute curl for {url}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("BigQuery request failed: {}", stderr.trim());
    }

    let stdout = String::from_utf8(output.stdout).context("BigQuery response was not UTF-8")?;
    let parsed = serde_json::from_str::<Value>(&stdout).with_context(|| {
        format!(
            "Failed to parse BigQuery JSON response for {url}: {}",
            stdout.trim()
        )
    })?;
    reject_error_payload(parsed)
}

fn reject_error_payload(parsed: Value) -> Result<Value> {
    if let Some(error) = parsed.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        bail!("BigQuery returned error: {message}");
    }

    Ok(parsed)
}
