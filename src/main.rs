use anyhow::Result;
use chrono::Utc;
use eventsync::{config, dbt, duck, extract};
use eventsync::extract::window::TimeWindow;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Destination addresses, mirroring the source side: fixed for this pipeline.
const DEST_DATASET: &str = "bigquery_data";
const DEST_TABLE: &str = "events";

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) load config ──────────────────────────────────────────────
    let cfg = config::load()?;

    // ─── 3) compute the extraction window at call time ───────────────
    let window = TimeWindow::previous_month(Utc::now().date_naive());
    info!(month = window.month, year = window.year, "extraction window");

    // ─── 4) stream rows from BigQuery into DuckDB ────────────────────
    let mut rows = extract::query_events(&cfg.bigquery, window).await?;
    let conn = duck::open_disk_db(&cfg.duckdb.path)?;
    let mut sink = duck::EventSink::create(&conn, DEST_DATASET, DEST_TABLE, rows.columns())?;
    while let Some(row) = rows.next().await? {
        sink.append(&row)?;
    }
    let loaded = sink.finish()?;
    info!(
        rows = loaded,
        db = %cfg.duckdb.path.display(),
        table = DEST_TABLE,
        "load complete"
    );

    // ─── 5) run dbt models over the loaded data ──────────────────────
    if cfg.dbt.enabled {
        let models = dbt::run(&cfg.dbt).await?;
        info!(models = models.len(), "dbt run complete");
    }

    info!("all done");
    Ok(())
}
