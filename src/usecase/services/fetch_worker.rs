use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::domain::entities::query::{Epoch, PageRequest};
use crate::domain::entities::row::Batch;
use crate::domain::entities::state::WorkerState;
use crate::error::SourceError;
use crate::usecase::ports::row_source::{RowSource, RowSourceFactory};
use crate::usecase::services::worker_pool::{CancelToken, PoolTask};

/// What a worker reports back to the consuming thread. Every variant carries
/// the epoch it was produced under so stale ones can be dropped on arrival.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    Batch(Batch),
    Finished {
        epoch: Epoch,
        page_index: i64,
        rows: u64,
    },
    Failed {
        epoch: Epoch,
        page_index: i64,
        message: String,
    },
    Cancelled {
        epoch: Epoch,
        page_index: i64,
        rows: u64,
    },
}

impl LoaderEvent {
    pub fn epoch(&self) -> Epoch {
        match self {
            LoaderEvent::Batch(batch) => batch.epoch,
            LoaderEvent::Finished { epoch, .. }
            | LoaderEvent::Failed { epoch, .. }
            | LoaderEvent::Cancelled { epoch, .. } => *epoch,
        }
    }
}

/// Live view of a worker, written by the worker and read by anyone holding it.
#[derive(Debug)]
pub struct WorkerProgress {
    epoch: Epoch,
    running: AtomicBool,
    rows_emitted: AtomicU64,
}

impl WorkerProgress {
    fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            running: AtomicBool::new(false),
            rows_emitted: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> WorkerState {
        WorkerState {
            running: self.running.load(Ordering::Acquire),
            epoch: self.epoch,
            rows_emitted: self.rows_emitted.load(Ordering::Acquire),
        }
    }
}

enum Outcome {
    Exhausted(u64),
    Cancelled(u64),
    Failed(SourceError),
    Disconnected,
}

/// Streams one page from a freshly opened row source in small chunks.
pub struct FetchWorker {
    request: PageRequest,
    factory: Arc<dyn RowSourceFactory>,
    events: Sender<LoaderEvent>,
    chunk_size: usize,
    token: CancelToken,
    progress: Arc<WorkerProgress>,
}

impl FetchWorker {
    pub fn new(
        request: PageRequest,
        factory: Arc<dyn RowSourceFactory>,
        events: Sender<LoaderEvent>,
        chunk_size: usize,
    ) -> Self {
        let progress = Arc::new(WorkerProgress::new(request.epoch()));
        Self {
            request,
            factory,
            events,
            chunk_size: chunk_size.max(1),
            token: CancelToken::new(),
            progress,
        }
    }

    pub fn request(&self) -> &PageRequest {
        &self.request
    }

    pub fn progress(&self) -> Arc<WorkerProgress> {
        self.progress.clone()
    }

    /// Asks the worker to stop before its next chunk fetch. Safe to call
    /// repeatedly and from any thread; never blocks.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn run(self) {
        let epoch = self.request.epoch();
        let page_index = self.request.page_index();
        self.progress.running.store(true, Ordering::Release);

        let outcome = if self.token.is_cancelled() {
            Outcome::Cancelled(0)
        } else {
            catch_unwind(AssertUnwindSafe(|| self.stream_page())).unwrap_or_else(|_| {
                Outcome::Failed(SourceError::new("row source panicked while fetching"))
            })
        };

        // The source is closed by the time `stream_page` returns or unwinds.
        self.progress.running.store(false, Ordering::Release);

        let event = match outcome {
            Outcome::Exhausted(rows) => {
                debug!(epoch = epoch.0, page = page_index, rows, "page fetch finished");
                LoaderEvent::Finished {
                    epoch,
                    page_index,
                    rows,
                }
            }
            Outcome::Cancelled(rows) => {
                debug!(epoch = epoch.0, page = page_index, rows, "page fetch cancelled");
                LoaderEvent::Cancelled {
                    epoch,
                    page_index,
                    rows,
                }
            }
            Outcome::Failed(err) => {
                warn!(epoch = epoch.0, page = page_index, error = %err, "page fetch failed");
                LoaderEvent::Failed {
                    epoch,
                    page_index,
                    message: err.to_string(),
                }
            }
            Outcome::Disconnected => {
                debug!(epoch = epoch.0, page = page_index, "event receiver gone, worker exiting");
                return;
            }
        };
        let _ = self.events.send(event);
    }

    fn stream_page(&self) -> Outcome {
        let source = match self.factory.open(&self.request) {
            Ok(source) => source,
            Err(err) => return Outcome::Failed(err),
        };
        let mut source = SourceGuard(source);

        let limit = u64::try_from(self.request.limit()).unwrap_or(0);
        let mut emitted = 0_u64;
        loop {
            // A fully emitted page is finished even if a stop arrived meanwhile.
            let remaining = limit - emitted;
            if remaining == 0 {
                return Outcome::Exhausted(emitted);
            }
            if self.token.is_cancelled() {
                return Outcome::Cancelled(emitted);
            }
            let want = usize::try_from(remaining).map_or(self.chunk_size, |r| r.min(self.chunk_size));

            let mut rows = match source.0.fetch_many(want) {
                Ok(rows) => rows,
                Err(err) => return Outcome::Failed(err),
            };
            if rows.is_empty() {
                return Outcome::Exhausted(emitted);
            }
            rows.truncate(want);

            let count = rows.len() as u64;
            let batch = Batch {
                rows,
                epoch: self.request.epoch(),
                page_index: self.request.page_index(),
            };
            if self.events.send(LoaderEvent::Batch(batch)).is_err() {
                return Outcome::Disconnected;
            }
            emitted += count;
            self.progress.rows_emitted.store(emitted, Ordering::Release);
        }
    }
}

impl PoolTask for FetchWorker {
    fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    fn run(self: Box<Self>) {
        FetchWorker::run(*self)
    }
}

/// Closes the wrapped source on every exit path, unwinding included.
struct SourceGuard(Box<dyn RowSource>);

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}
