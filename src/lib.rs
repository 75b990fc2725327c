pub mod config;
pub mod error;

pub mod domain {
    pub mod entities {
        pub mod query;
        pub mod row;
        pub mod state;
    }
}

pub mod usecase {
    pub mod ports {
        pub mod list_sink;
        pub mod row_source;
    }

    pub mod services {
        pub mod fetch_worker;
        pub mod pagination;
        pub mod worker_pool;
    }
}

pub mod infra {
    pub mod memory {
        pub mod row_source;
    }

    pub mod sqlite {
        pub mod queries;
        pub mod row_source;
        pub mod schema;
    }
}

pub use config::LoaderConfig;
pub use domain::entities::query::{Epoch, OrderBy, PageRequest, QuerySpec, SortDirection};
pub use domain::entities::row::{Batch, Row, Value};
pub use domain::entities::state::{ControllerState, LoadPhase, LoaderStats, WorkerState};
pub use error::{LoaderError, LoaderResult, SourceError};
pub use infra::memory::row_source::{MemoryRowSource, MemoryTable};
pub use infra::sqlite::row_source::{SqliteRowSource, SqliteRowSourceFactory};
pub use usecase::ports::list_sink::ListSink;
pub use usecase::ports::row_source::{RowSource, RowSourceFactory};
pub use usecase::services::fetch_worker::{FetchWorker, LoaderEvent, WorkerProgress};
pub use usecase::services::pagination::PaginationController;
pub use usecase::services::worker_pool::{CancelToken, PoolTask, TaskHandle, TaskStatus, WorkerPool};

#[cfg(test)]
mod tests;
