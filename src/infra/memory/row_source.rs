use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::domain::entities::query::{PageRequest, QuerySpec, SortDirection};
use crate::domain::entities::row::Row;
use crate::error::{LoaderError, LoaderResult, SourceError};
use crate::usecase::ports::row_source::{RowSource, RowSourceFactory};

/// An owned table of rows served through the same filter and ordering rules
/// as the SQLite listing: case-insensitive substring match on any column,
/// NULLs last, input order as the final tiebreak.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl MemoryTable {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, field: &str) -> LoaderResult<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(field))
            .ok_or_else(|| {
                LoaderError::InvalidPageRequest(format!("cannot order by unknown field {field:?}"))
            })
    }

    /// Every row matching `spec`, in listing order.
    pub fn select(&self, spec: &QuerySpec) -> LoaderResult<Vec<Row>> {
        let orders = spec
            .order_by()
            .iter()
            .map(|order| Ok((self.column_index(&order.field)?, order.direction)))
            .collect::<LoaderResult<Vec<_>>>()?;

        let needle = spec.filter_text().trim().to_lowercase();
        let mut matched = self
            .rows
            .iter()
            .filter(|row| needle.is_empty() || row_matches(row, &needle))
            .cloned()
            .collect::<Vec<_>>();

        matched.sort_by(|a, b| {
            orders
                .iter()
                .map(|&(idx, direction)| compare_column(a, b, idx, direction))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(matched)
    }
}

fn row_matches(row: &Row, needle: &str) -> bool {
    row.values().iter().any(|value| {
        value
            .search_text()
            .is_some_and(|text| text.to_lowercase().contains(needle))
    })
}

fn compare_column(a: &Row, b: &Row, idx: usize, direction: SortDirection) -> Ordering {
    match (a.get(idx), b.get(idx)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ordering = left.sql_cmp(right);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            }
        },
    }
}

impl RowSourceFactory for MemoryTable {
    fn open(&self, request: &PageRequest) -> Result<Box<dyn RowSource>, SourceError> {
        let matched = self
            .select(request.spec())
            .map_err(|err| SourceError::new(err.to_string()))?;
        let start = usize::try_from(request.offset())
            .unwrap_or(usize::MAX)
            .min(matched.len());
        let end = usize::try_from(request.limit())
            .map_or(matched.len(), |limit| start.saturating_add(limit))
            .min(matched.len());
        Ok(Box::new(MemoryRowSource::new(matched[start..end].to_vec())))
    }

    fn validate(&self, spec: &QuerySpec) -> LoaderResult<()> {
        for order in spec.order_by() {
            self.column_index(&order.field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRowSource {
    rows: VecDeque<Row>,
    closed: bool,
}

impl MemoryRowSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RowSource for MemoryRowSource {
    fn fetch_many(&mut self, n: usize) -> Result<Vec<Row>, SourceError> {
        if self.closed {
            return Err(SourceError::new("row source is closed"));
        }
        let take = n.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    fn close(&mut self) {
        self.closed = true;
        self.rows.clear();
    }
}
