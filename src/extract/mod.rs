pub mod value;
pub mod window;

use anyhow::{Context, Result};
use google_cloud_bigquery::client::google_cloud_auth::credentials::CredentialsFile;
use google_cloud_bigquery::client::{Client, ClientConfig};
use google_cloud_bigquery::http::job::get_query_results::GetQueryResultsRequest;
use google_cloud_bigquery::http::job::query::QueryRequest;
use google_cloud_bigquery::http::tabledata::list::Tuple;
use serde_json::json;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::config::BigQueryConfig;
use value::{columns, decode_row, Column, RowRecord};
use window::TimeWindow;

/// Source addresses are fixed for this pipeline; only credentials vary.
const SOURCE_DATASET: &str = "analytics";
const SOURCE_TABLE: &str = "events_*";

/// Log a progress line every this many yielded rows.
const PROGRESS_EVERY: u64 = 1_000;

/// Build the windowed events query. The filter column `_table_suffix` selects
/// the daily wildcard shards between the window's bounds.
pub fn build_query(project_id: &str, window: TimeWindow) -> String {
    let (lower, upper) = window.suffix_bounds();
    format!(
        "select * from `{project_id}.{SOURCE_DATASET}.{SOURCE_TABLE}` \
         where _table_suffix between '{lower}' and '{upper}'"
    )
}

/// Authenticate with a service account assembled from the configured
/// credential fields. Returns the client and the effective project id.
pub async fn authenticate(cfg: &BigQueryConfig) -> Result<(Client, String)> {
    let credentials: CredentialsFile = serde_json::from_value(json!({
        "type": "service_account",
        "project_id": cfg.project_id,
        "private_key": cfg.private_key,
        "client_email": cfg.client_email,
        "token_uri": cfg.token_uri,
    }))
    .context("assembling service account credentials")?;

    let (config, project_id) = ClientConfig::new_with_credentials(credentials)
        .await
        .context("authenticating to BigQuery")?;
    let client = Client::new(config)
        .await
        .context("building BigQuery client")?;
    let project_id = project_id.unwrap_or_else(|| cfg.project_id.clone());
    Ok((client, project_id))
}

/// Run the windowed events query and return the lazy row stream.
///
/// One query per call; no retries. Any transport or query failure propagates
/// to the caller.
pub async fn query_events(cfg: &BigQueryConfig, window: TimeWindow) -> Result<RowStream> {
    let (client, project_id) = authenticate(cfg).await?;

    let sql = build_query(&project_id, window);
    let (lower, upper) = window.suffix_bounds();
    info!(
        month = window.month,
        year = window.year,
        %lower,
        %upper,
        "querying events window"
    );

    let request = QueryRequest {
        query: sql,
        use_legacy_sql: false,
        ..Default::default()
    };
    let resp = client
        .job()
        .query(&project_id, &request)
        .await
        .context("executing BigQuery query")?;

    let mut stream = RowStream {
        client,
        project_id,
        location: cfg.location.clone(),
        job_id: resp.job_reference.job_id.clone(),
        page_token: resp.page_token.clone(),
        columns: resp.schema.as_ref().map(|s| columns(s)).unwrap_or_default(),
        pending: resp.rows.unwrap_or_default().into(),
        yielded: 0,
        done: resp.job_complete && resp.page_token.is_none(),
    };

    // A large query may not have finished when the initial call returns;
    // drain result pages until the schema is known.
    while stream.columns.is_empty() && !stream.done {
        stream.fetch_next_page().await?;
    }

    Ok(stream)
}

/// Lazy, single-pass stream of result rows. Rows are pulled page by page from
/// the remote job; nothing beyond the current page is buffered.
pub struct RowStream {
    client: Client,
    project_id: String,
    location: Option<String>,
    job_id: String,
    page_token: Option<String>,
    columns: Vec<Column>,
    pending: VecDeque<Tuple>,
    yielded: u64,
    done: bool,
}

impl RowStream {
    /// The result columns, available once the query has produced its schema.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Pull the next row, fetching further result pages as needed. Returns
    /// `None` once the window is exhausted. A failed stream yields nothing
    /// further.
    pub async fn next(&mut self) -> Result<Option<RowRecord>> {
        loop {
            if let Some(tuple) = self.pending.pop_front() {
                let row = match decode_row(&self.columns, &tuple) {
                    Ok(row) => row,
                    Err(e) => return Err(self.poison(e)),
                };
                self.yielded += 1;
                if self.yielded % PROGRESS_EVERY == 0 {
                    info!(rows = self.yielded, "loading rows");
                }
                return Ok(Some(row));
            }
            if self.done {
                return Ok(None);
            }
            if let Err(e) = self.fetch_next_page().await {
                return Err(self.poison(e));
            }
        }
    }

    fn poison(&mut self, e: anyhow::Error) -> anyhow::Error {
        self.pending.clear();
        self.done = true;
        e
    }

    async fn fetch_next_page(&mut self) -> Result<()> {
        let request = GetQueryResultsRequest {
            page_token: self.page_token.clone(),
            location: self.location.clone(),
            ..Default::default()
        };
        let resp = self
            .client
            .job()
            .get_query_results(&self.project_id, &self.job_id, &request)
            .await
            .context("fetching query results page")?;

        if self.columns.is_empty() {
            if let Some(schema) = resp.schema.as_ref() {
                self.columns = columns(schema);
            }
        }

        let rows = resp.rows.unwrap_or_default();
        debug!(rows = rows.len(), "fetched result page");
        self.pending.extend(rows);
        self.page_token = resp.page_token;
        self.done = resp.job_complete && self.page_token.is_none();
        Ok(())
    }
}
