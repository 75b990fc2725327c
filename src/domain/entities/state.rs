use crate::domain::entities::query::{Epoch, QuerySpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerState {
    pub running: bool,
    pub epoch: Epoch,
    pub rows_emitted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    #[default]
    Idle,
    Loading,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControllerState {
    pub current_epoch: Epoch,
    pub current_spec: Option<QuerySpec>,
    pub has_more: bool,
    pub next_page_index: i64,
}

/// Debug counters. Stale drops are expected and never reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderStats {
    pub stale_drops: u64,
    pub batches_delivered: u64,
    pub rows_delivered: u64,
    pub pages_finished: u64,
    pub page_errors: u64,
}
