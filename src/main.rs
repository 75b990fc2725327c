use std::io::{IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use records_pager::config::{resolve_db_path, DB_PATH_ENV};
use records_pager::infra::sqlite::schema::init_db;
use records_pager::{
    ListSink, LoaderConfig, PaginationController, QuerySpec, Row, SqliteRowSourceFactory, Value,
    WorkerPool,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Prints each delivered row as a tab separated line.
struct StdoutSink<W: Write> {
    out: W,
    failure: Option<String>,
}

impl<W: Write> ListSink for StdoutSink<W> {
    fn on_batch(&mut self, rows: Vec<Row>) {
        for row in rows {
            let line = row
                .values()
                .iter()
                .map(render_value)
                .collect::<Vec<_>>()
                .join("\t");
            if writeln!(self.out, "{line}").is_err() {
                self.failure = Some("stdout closed".to_string());
                return;
            }
        }
    }

    fn on_finished(&mut self, total_for_page: usize) {
        info!(rows = total_for_page, "page loaded");
    }

    fn on_error(&mut self, message: &str) {
        self.failure = Some(message.to_string());
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(value) => value.to_string(),
        Value::Real(value) => value.to_string(),
        Value::Text(value) => value.replace(['\t', '\n'], " "),
        Value::Blob(value) => format!("<{} bytes>", value.len()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none())
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_path = resolve_db_path(std::env::var(DB_PATH_ENV).ok().as_deref())?;
    init_db(&db_path)?;
    let filter = std::env::args().skip(1).collect::<Vec<_>>().join(" ");

    let config = LoaderConfig::default();
    let pool = Arc::new(WorkerPool::new(config.max_concurrent_workers)?);
    let factory = Arc::new(SqliteRowSourceFactory::resources(&db_path));
    let sink = StdoutSink {
        out: std::io::stdout().lock(),
        failure: None,
    };
    let mut controller = PaginationController::new(config, pool.clone(), factory, sink)?;

    info!(path = %db_path.display(), filter = %filter, "listing records");
    controller.set_query(QuerySpec::filter(filter))?;
    loop {
        if !controller.wait_idle(PAGE_TIMEOUT) {
            bail!("page load did not finish within {PAGE_TIMEOUT:?}");
        }
        if let Some(message) = controller.sink_mut().failure.take() {
            bail!("failed to list records: {message}");
        }
        if !controller.load_next_page()? {
            break;
        }
    }

    controller
        .sink_mut()
        .out
        .flush()
        .context("failed to flush stdout")?;
    info!(rows = controller.rows_loaded(), "done");
    drop(controller);
    pool.shutdown_and_join();
    Ok(())
}
