use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::domain::entities::query::{Epoch, PageRequest, QuerySpec};
use crate::domain::entities::row::Batch;
use crate::domain::entities::state::{ControllerState, LoadPhase, LoaderStats, WorkerState};
use crate::error::LoaderResult;
use crate::usecase::ports::list_sink::ListSink;
use crate::usecase::ports::row_source::RowSourceFactory;
use crate::usecase::services::fetch_worker::{FetchWorker, LoaderEvent, WorkerProgress};
use crate::usecase::services::worker_pool::{TaskHandle, WorkerPool};

struct ActiveLoad {
    handle: TaskHandle,
    progress: Arc<WorkerProgress>,
    page_index: i64,
}

/// Drives a single scrollable list: turns query changes and "load more"
/// requests into page fetches, and applies worker events to the sink.
///
/// All state lives on the thread that owns the controller. Workers only ever
/// talk to it through the event channel, and every event is checked against
/// the current epoch before it touches anything.
pub struct PaginationController<S: ListSink> {
    config: LoaderConfig,
    pool: Arc<WorkerPool>,
    factory: Arc<dyn RowSourceFactory>,
    sink: S,
    events_tx: Sender<LoaderEvent>,
    events_rx: Receiver<LoaderEvent>,
    state: ControllerState,
    phase: LoadPhase,
    active: Option<ActiveLoad>,
    // Rows of the in-progress page already handed to the sink.
    page_delivered: i64,
    rows_loaded: u64,
    stats: LoaderStats,
}

impl<S: ListSink> PaginationController<S> {
    pub fn new(
        config: LoaderConfig,
        pool: Arc<WorkerPool>,
        factory: Arc<dyn RowSourceFactory>,
        sink: S,
    ) -> LoaderResult<Self> {
        config.validate()?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            config,
            pool,
            factory,
            sink,
            events_tx,
            events_rx,
            state: ControllerState::default(),
            phase: LoadPhase::Idle,
            active: None,
            page_delivered: 0,
            rows_loaded: 0,
            stats: LoaderStats::default(),
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn current_epoch(&self) -> Epoch {
        self.state.current_epoch
    }

    pub fn has_more(&self) -> bool {
        self.state.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.phase == LoadPhase::Loading
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats
    }

    /// Rows delivered to the sink since the last query change.
    pub fn rows_loaded(&self) -> u64 {
        self.rows_loaded
    }

    pub fn active_worker(&self) -> Option<WorkerState> {
        self.active.as_ref().map(|active| active.progress.snapshot())
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Switches the list to `spec`. Does nothing when `spec` is already the
    /// current query; use [`reload`](Self::reload) to refetch it.
    pub fn set_query(&mut self, spec: QuerySpec) -> LoaderResult<()> {
        if self.state.current_spec.as_ref() == Some(&spec) {
            return Ok(());
        }
        self.start_query(spec)
    }

    /// Starts over with the current query under a fresh epoch.
    pub fn reload(&mut self) -> LoaderResult<()> {
        match self.state.current_spec.clone() {
            Some(spec) => self.start_query(spec),
            None => Ok(()),
        }
    }

    /// Fetches the next page. Returns `false` when there is nothing to do:
    /// no query yet, a page already loading, or no more pages.
    pub fn load_next_page(&mut self) -> LoaderResult<bool> {
        if self.phase == LoadPhase::Loading || !self.state.has_more {
            return Ok(false);
        }
        let Some(spec) = self.state.current_spec.clone() else {
            return Ok(false);
        };
        self.dispatch(spec)?;
        Ok(true)
    }

    /// Asks the active worker to stop. The controller keeps reporting
    /// `Loading` until the worker acknowledges; the page can then be resumed
    /// with [`load_next_page`](Self::load_next_page).
    pub fn cancel(&mut self) {
        if let Some(active) = &self.active {
            debug!(
                epoch = self.state.current_epoch.0,
                page = active.page_index,
                "cancelling active page load"
            );
            active.handle.cancel();
        }
    }

    /// Applies every event already waiting. Never blocks.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Waits up to `timeout` for one event, then applies whatever else is
    /// already queued behind it.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Pumps until no page is loading or `timeout` has passed. Returns whether
    /// the controller went idle in time.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.pump();
        while self.phase == LoadPhase::Loading {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_timeout(deadline - now);
        }
        true
    }

    pub fn handle_event(&mut self, event: LoaderEvent) {
        if event.epoch() != self.state.current_epoch {
            self.stats.stale_drops += 1;
            debug!(
                event_epoch = event.epoch().0,
                current_epoch = self.state.current_epoch.0,
                "dropping stale loader event"
            );
            return;
        }

        match event {
            LoaderEvent::Batch(batch) => self.on_batch(batch),
            LoaderEvent::Finished { page_index, .. } => self.on_finished(page_index),
            LoaderEvent::Failed {
                page_index,
                message,
                ..
            } => self.on_error(page_index, &message),
            LoaderEvent::Cancelled {
                page_index, rows, ..
            } => self.on_cancelled(page_index, rows),
        }
    }

    fn start_query(&mut self, spec: QuerySpec) -> LoaderResult<()> {
        self.factory.validate(&spec)?;

        if let Some(active) = self.active.take() {
            active.handle.cancel();
        }
        let epoch = self.state.current_epoch.next();
        info!(
            epoch = epoch.0,
            filter = spec.filter_text(),
            "starting list query"
        );
        self.state = ControllerState {
            current_epoch: epoch,
            current_spec: Some(spec.clone()),
            has_more: true,
            next_page_index: 0,
        };
        self.phase = LoadPhase::Idle;
        self.page_delivered = 0;
        self.rows_loaded = 0;
        self.sink.on_reset();

        self.dispatch(spec)
    }

    fn dispatch(&mut self, spec: QuerySpec) -> LoaderResult<()> {
        let request = PageRequest::resuming(
            Arc::new(spec),
            self.state.next_page_index,
            self.config.page_size,
            self.state.current_epoch,
            self.page_delivered,
        )?;
        let worker = FetchWorker::new(
            request,
            self.factory.clone(),
            self.events_tx.clone(),
            self.config.chunk_size,
        );
        let progress = worker.progress();
        let handle = self.pool.submit(worker)?;

        debug!(
            epoch = self.state.current_epoch.0,
            page = self.state.next_page_index,
            skip = self.page_delivered,
            task = handle.id(),
            "page load dispatched"
        );
        self.active = Some(ActiveLoad {
            handle,
            progress,
            page_index: self.state.next_page_index,
        });
        self.phase = LoadPhase::Loading;
        Ok(())
    }

    fn on_batch(&mut self, batch: Batch) {
        let count = batch.rows.len();
        self.page_delivered += count as i64;
        self.rows_loaded += count as u64;
        self.stats.batches_delivered += 1;
        self.stats.rows_delivered += count as u64;
        self.sink.on_batch(batch.rows);
    }

    fn on_finished(&mut self, page_index: i64) {
        let page_total = self.page_delivered;
        self.state.has_more = page_total >= self.config.page_size;
        self.state.next_page_index += 1;
        self.phase = if self.state.has_more {
            LoadPhase::Idle
        } else {
            LoadPhase::Exhausted
        };
        self.active = None;
        self.page_delivered = 0;
        self.stats.pages_finished += 1;

        debug!(
            epoch = self.state.current_epoch.0,
            page = page_index,
            rows = page_total,
            has_more = self.state.has_more,
            "page load finished"
        );
        self.sink.on_finished(page_total as usize);
    }

    fn on_error(&mut self, page_index: i64, message: &str) {
        self.phase = LoadPhase::Idle;
        self.active = None;
        self.stats.page_errors += 1;

        warn!(
            epoch = self.state.current_epoch.0,
            page = page_index,
            delivered = self.page_delivered,
            error = message,
            "page load failed"
        );
        self.sink.on_error(message);
    }

    fn on_cancelled(&mut self, page_index: i64, rows: u64) {
        // Every row of the page arrived before the stop; there is nothing to resume.
        if self.page_delivered >= self.config.page_size {
            self.on_finished(page_index);
            return;
        }
        self.phase = LoadPhase::Idle;
        self.active = None;
        debug!(
            epoch = self.state.current_epoch.0,
            page = page_index,
            rows,
            "page load stopped before completion"
        );
    }
}

impl<S: ListSink> Drop for PaginationController<S> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.cancel();
        }
    }
}
