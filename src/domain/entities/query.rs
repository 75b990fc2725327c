use std::sync::Arc;

use crate::error::{LoaderError, LoaderResult};

/// Generation number of the query a controller is currently serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl From<u64> for Epoch {
    fn from(value: u64) -> Self {
        Epoch(value)
    }
}

impl From<Epoch> for u64 {
    fn from(value: Epoch) -> Self {
        value.0
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// What the list should show: a free-text filter and an ordering.
///
/// Two specs that compare equal describe the same query; the controller only
/// starts a new epoch when the spec actually changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QuerySpec {
    filter_text: String,
    order_by: Vec<OrderBy>,
}

impl QuerySpec {
    pub fn new(filter_text: impl Into<String>, order_by: Vec<OrderBy>) -> Self {
        Self {
            filter_text: filter_text.into(),
            order_by,
        }
    }

    pub fn filter(filter_text: impl Into<String>) -> Self {
        Self::new(filter_text, Vec::new())
    }

    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn filter_text(&self) -> &str {
        &self.filter_text
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }
}

/// One dispatched page load. Built by the controller, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    spec: Arc<QuerySpec>,
    page_index: i64,
    page_size: i64,
    epoch: Epoch,
    skip: i64,
}

impl PageRequest {
    pub fn new(
        spec: Arc<QuerySpec>,
        page_index: i64,
        page_size: i64,
        epoch: Epoch,
    ) -> LoaderResult<Self> {
        Self::resuming(spec, page_index, page_size, epoch, 0)
    }

    /// A request for the tail of a page whose first `skip` rows were already
    /// delivered by an earlier attempt.
    pub fn resuming(
        spec: Arc<QuerySpec>,
        page_index: i64,
        page_size: i64,
        epoch: Epoch,
        skip: i64,
    ) -> LoaderResult<Self> {
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
        if !(0..page_size).contains(&skip) {
            return Err(LoaderError::InvalidPageRequest(format!(
                "skip must be within 0..{page_size} (got {skip})"
            )));
        }
        page_index
            .checked_mul(page_size)
            .and_then(|offset| offset.checked_add(page_size))
            .ok_or_else(|| {
                LoaderError::InvalidPageRequest(format!(
                    "page {page_index} of size {page_size} is out of range"
                ))
            })?;

        Ok(Self {
            spec,
            page_index,
            page_size,
            epoch,
            skip,
        })
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn page_index(&self) -> i64 {
        self.page_index
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn skip(&self) -> i64 {
        self.skip
    }

    /// Rows this request still has to fetch.
    pub fn limit(&self) -> i64 {
        self.page_size - self.skip
    }

    /// Absolute offset of the first row this request fetches.
    pub fn offset(&self) -> i64 {
        self.page_index * self.page_size + self.skip
    }
}
