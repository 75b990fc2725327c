use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::params;

use crate::domain::entities::query::{OrderBy, PageRequest, QuerySpec, SortDirection};
use crate::domain::entities::row::Value;
use crate::error::{LoaderError, LoaderResult};
use crate::infra::sqlite::schema::{init_db, open_connection};

pub const RESOURCES_TABLE: &str = "educational_resources";

/// The listed table: which columns come back, in which order, and which of
/// them the free-text filter looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    table: String,
    key_column: String,
    columns: Vec<String>,
    search_columns: Vec<String>,
    default_order: Vec<OrderBy>,
}

impl QueryTemplate {
    pub fn new(
        table: impl Into<String>,
        key_column: impl Into<String>,
        columns: Vec<String>,
        search_columns: Vec<String>,
        default_order: Vec<OrderBy>,
    ) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            columns,
            search_columns,
            default_order,
        }
    }

    /// The resource card list: best scored first, newest first among equals.
    pub fn educational_resources() -> Self {
        Self::new(
            RESOURCES_TABLE,
            "id",
            ["id", "content_description_", "score_", "source_", "additional_details_"]
                .map(String::from)
                .to_vec(),
            ["source_", "content_description_", "additional_details_", "id"]
                .map(String::from)
                .to_vec(),
            vec![OrderBy::desc("score_"), OrderBy::desc("id")],
        )
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn column(&self, field: &str) -> LoaderResult<&str> {
        self.columns
            .iter()
            .find(|column| column.eq_ignore_ascii_case(field))
            .map(String::as_str)
            .ok_or_else(|| {
                LoaderError::InvalidPageRequest(format!(
                    "cannot order by unknown field {field:?} of {}",
                    self.table
                ))
            })
    }

    pub fn validate_spec(&self, spec: &QuerySpec) -> LoaderResult<()> {
        for order in spec.order_by() {
            self.column(&order.field)?;
        }
        Ok(())
    }
}

/// A page query with its bound parameters. The SQL always ends in
/// `LIMIT ? OFFSET ?`, so chunk windows of the page can rebind those two.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub sql: String,
    pub filter_params: Vec<Value>,
    pub limit: i64,
    pub offset: i64,
}

impl PageQuery {
    pub fn params(&self) -> Vec<Value> {
        self.window_params(self.limit, self.offset)
    }

    /// Parameters for the next `n` rows after `consumed` rows of this page.
    pub fn chunk_params(&self, consumed: i64, n: i64) -> Vec<Value> {
        let limit = n.min(self.limit - consumed).max(0);
        self.window_params(limit, self.offset + consumed)
    }

    fn window_params(&self, limit: i64, offset: i64) -> Vec<Value> {
        let mut params = self.filter_params.clone();
        params.push(Value::Integer(limit));
        params.push(Value::Integer(offset));
        params
    }
}

/// `SELECT ... LIMIT page_size OFFSET page_index * page_size` for one page of
/// `spec`. The filter text only ever travels as a bound parameter.
pub fn build_page_query(
    template: &QueryTemplate,
    spec: &QuerySpec,
    page_index: i64,
    page_size: i64,
) -> LoaderResult<PageQuery> {
    if page_size <= 0 {
        return Err(LoaderError::InvalidPageRequest(format!(
            "page_size must be greater than zero (got {page_size})"
        )));
    }
    if page_index < 0 {
        return Err(LoaderError::InvalidPageRequest(format!(
            "page_index must not be negative (got {page_index})"
        )));
    }
    let offset = page_index.checked_mul(page_size).ok_or_else(|| {
        LoaderError::InvalidPageRequest(format!(
            "page {page_index} of size {page_size} is out of range"
        ))
    })?;

    let select_list = template
        .columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!("SELECT {select_list} FROM {}", quote_ident(&template.table));

    let mut filter_params = Vec::new();
    let filter_text = spec.filter_text().trim();
    if !filter_text.is_empty() && !template.search_columns.is_empty() {
        let pattern = format!("%{}%", escape_like(filter_text));
        let clauses = template
            .search_columns
            .iter()
            .map(|column| {
                filter_params.push(Value::Text(pattern.clone()));
                format!("CAST({} AS TEXT) LIKE ? ESCAPE '\\'", quote_ident(column))
            })
            .collect::<Vec<_>>();
        sql.push_str(&format!(" WHERE ({})", clauses.join(" OR ")));
    }

    sql.push_str(" ORDER BY ");
    sql.push_str(&order_clause(template, spec)?);
    sql.push_str(" LIMIT ? OFFSET ?");

    Ok(PageQuery {
        sql,
        filter_params,
        limit: page_size,
        offset,
    })
}

/// The page query for a dispatched request, minus rows an earlier attempt
/// already delivered.
pub fn build_request_query(template: &QueryTemplate, request: &PageRequest) -> LoaderResult<PageQuery> {
    let mut query = build_page_query(
        template,
        request.spec(),
        request.page_index(),
        request.page_size(),
    )?;
    query.limit = request.limit();
    query.offset = request.offset();
    Ok(query)
}

fn order_clause(template: &QueryTemplate, spec: &QuerySpec) -> LoaderResult<String> {
    let orders = if spec.order_by().is_empty() {
        &template.default_order
    } else {
        spec.order_by()
    };

    let mut terms = Vec::with_capacity(orders.len() + 1);
    let mut has_key = false;
    for order in orders {
        let column = template.column(&order.field)?;
        has_key |= column == template.key_column;
        terms.push(format!(
            "{} {} NULLS LAST",
            quote_ident(column),
            order.direction.as_sql()
        ));
    }
    if !has_key {
        terms.push(format!(
            "{} {}",
            quote_ident(&template.key_column),
            SortDirection::Desc.as_sql()
        ));
    }
    Ok(terms.join(", "))
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Makes `%`, `_` and the escape character itself match literally.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    pub source: String,
    pub content_description: String,
    pub additional_details: Option<String>,
    pub answer: Option<String>,
    pub score: Option<f64>,
}

pub fn insert_resources(db_path: &Path, resources: &[NewResource]) -> Result<Vec<i64>> {
    init_db(db_path)?;
    let mut conn = open_connection(db_path)?;
    let tx = conn
        .transaction()
        .context("failed to start resource insert transaction")?;

    let mut ids = Vec::with_capacity(resources.len());
    let mut insert = tx
        .prepare(
            "INSERT INTO educational_resources(
                source_, content_description_, additional_details_, answer_, score_
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .context("failed to prepare resource insert")?;
    for resource in resources {
        insert
            .execute(params![
                resource.source,
                resource.content_description,
                resource.additional_details,
                resource.answer,
                resource.score,
            ])
            .context("failed to insert resource")?;
        ids.push(tx.last_insert_rowid());
    }
    drop(insert);

    tx.commit()
        .context("failed to commit resource insert transaction")?;
    Ok(ids)
}
