use crate::domain::entities::query::{PageRequest, QuerySpec};
use crate::domain::entities::row::Row;
use crate::error::{LoaderResult, SourceError};

/// A forward-only cursor over the rows of one page.
///
/// `fetch_many` may return fewer than `n` rows; an empty result means the
/// page is exhausted. `close` must be idempotent.
pub trait RowSource: Send {
    fn fetch_many(&mut self, n: usize) -> Result<Vec<Row>, SourceError>;
    fn close(&mut self);
}

/// Opens a fresh, exclusively owned [`RowSource`] per page request.
pub trait RowSourceFactory: Send + Sync {
    fn open(&self, request: &PageRequest) -> Result<Box<dyn RowSource>, SourceError>;

    /// Synchronous checks the caller wants before any worker is spawned,
    /// such as ordering by a column the source knows nothing about.
    fn validate(&self, _spec: &QuerySpec) -> LoaderResult<()> {
        Ok(())
    }
}

impl<F> RowSourceFactory for F
where
    F: Fn(&PageRequest) -> Result<Box<dyn RowSource>, SourceError> + Send + Sync,
{
    fn open(&self, request: &PageRequest) -> Result<Box<dyn RowSource>, SourceError> {
        self(request)
    }
}
