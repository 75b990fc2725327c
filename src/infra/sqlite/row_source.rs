use std::path::PathBuf;

use anyhow::{Context, Result};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, ToSql};
use tracing::{debug, warn};

use crate::domain::entities::query::{PageRequest, QuerySpec};
use crate::domain::entities::row::{Row, Value};
use crate::error::{LoaderResult, SourceError};
use crate::infra::sqlite::queries::{build_request_query, PageQuery, QueryTemplate};
use crate::infra::sqlite::schema::open_read_connection;
use crate::usecase::ports::row_source::{RowSource, RowSourceFactory};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            Value::Real(value) => ToSqlOutput::Borrowed(ValueRef::Real(*value)),
            Value::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Value::Blob(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
        })
    }
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(value) => Value::Integer(value),
            SqlValue::Real(value) => Value::Real(value),
            SqlValue::Text(value) => Value::Text(value),
            SqlValue::Blob(value) => Value::Blob(value),
        }
    }
}

/// Opens one read connection per page request against a records database.
pub struct SqliteRowSourceFactory {
    db_path: PathBuf,
    template: QueryTemplate,
}

impl SqliteRowSourceFactory {
    pub fn new(db_path: impl Into<PathBuf>, template: QueryTemplate) -> Self {
        Self {
            db_path: db_path.into(),
            template,
        }
    }

    pub fn resources(db_path: impl Into<PathBuf>) -> Self {
        Self::new(db_path, QueryTemplate::educational_resources())
    }

    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }
}

impl RowSourceFactory for SqliteRowSourceFactory {
    fn open(&self, request: &PageRequest) -> Result<Box<dyn RowSource>, SourceError> {
        let query = build_request_query(&self.template, request)
            .map_err(|err| SourceError::new(err.to_string()))?;
        let source = SqliteRowSource::open(&self.db_path, query)
            .map_err(|err| SourceError::from_anyhow(&err))?;
        Ok(Box::new(source))
    }

    fn validate(&self, spec: &QuerySpec) -> LoaderResult<()> {
        self.template.validate_spec(spec)
    }
}

/// Chunked cursor over one page. Owns its connection and keeps a read
/// transaction open until closed, so every chunk sees the same snapshot.
pub struct SqliteRowSource {
    conn: Option<Connection>,
    query: PageQuery,
    consumed: i64,
    exhausted: bool,
}

impl SqliteRowSource {
    pub fn open(db_path: &std::path::Path, query: PageQuery) -> Result<Self> {
        let conn = open_read_connection(db_path)?;
        conn.execute_batch("BEGIN DEFERRED")
            .context("failed to start page read transaction")?;
        conn.prepare_cached(&query.sql)
            .with_context(|| format!("failed to prepare page query: {}", query.sql))?;
        debug!(
            limit = query.limit,
            offset = query.offset,
            path = %db_path.display(),
            "opened sqlite row source"
        );

        Ok(Self {
            conn: Some(conn),
            query,
            consumed: 0,
            exhausted: false,
        })
    }

    fn read_chunk(&self, n: i64) -> Result<Vec<Row>> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("row source is closed"))?;
        let mut stmt = conn
            .prepare_cached(&self.query.sql)
            .context("failed to prepare page query")?;
        let column_count = stmt.column_count();
        let params = self.query.chunk_params(self.consumed, n);

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .context("failed to run page query")?;
        let mut chunk = Vec::new();
        while let Some(row) = rows.next().context("failed to read page row")? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value: SqlValue = row
                    .get(idx)
                    .with_context(|| format!("failed to read column {idx}"))?;
                values.push(Value::from(value));
            }
            chunk.push(Row(values));
        }
        Ok(chunk)
    }
}

impl RowSource for SqliteRowSource {
    fn fetch_many(&mut self, n: usize) -> Result<Vec<Row>, SourceError> {
        if self.conn.is_none() {
            return Err(SourceError::new("row source is closed"));
        }
        let remaining = self.query.limit - self.consumed;
        if self.exhausted || remaining <= 0 || n == 0 {
            return Ok(Vec::new());
        }
        let want = i64::try_from(n).unwrap_or(i64::MAX).min(remaining);

        let chunk = self
            .read_chunk(want)
            .map_err(|err| SourceError::from_anyhow(&err))?;
        self.consumed += chunk.len() as i64;
        if (chunk.len() as i64) < want {
            self.exhausted = true;
        }
        Ok(chunk)
    }

    fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if let Err(err) = conn.execute_batch("ROLLBACK") {
            warn!(error = ?err, "failed to end page read transaction");
        }
        if let Err((_, err)) = conn.close() {
            warn!(error = ?err, "failed to close page connection");
        }
    }
}

impl Drop for SqliteRowSource {
    fn drop(&mut self) {
        self.close();
    }
}
