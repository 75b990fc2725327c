use std::path::PathBuf;

use anyhow::{anyhow, Result};
use directories::ProjectDirs;

use crate::error::{LoaderError, LoaderResult};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const DEFAULT_CHUNK_SIZE: usize = 20;
pub const DEFAULT_MAX_CONCURRENT_WORKERS: usize = 4;

/// Env var that points the host binary at a specific database file.
pub const DB_PATH_ENV: &str = "RECORDS_PAGER_DB";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Rows per "load more" step.
    pub page_size: i64,
    /// Rows per emission to the sink; also the cancellation granularity.
    pub chunk_size: usize,
    pub max_concurrent_workers: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_workers: DEFAULT_MAX_CONCURRENT_WORKERS,
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> LoaderResult<()> {
        if self.page_size <= 0 {
            return Err(LoaderError::InvalidConfig(format!(
                "page_size must be greater than zero (got {})",
                self.page_size
            )));
        }
        if self.chunk_size == 0 {
            return Err(LoaderError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_workers == 0 {
            return Err(LoaderError::InvalidConfig(
                "max_concurrent_workers must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("com", "records", "records-pager")
        .ok_or_else(|| anyhow!("unable to resolve data directory"))?;
    Ok(project_dirs.data_local_dir().join("records.sqlite"))
}

/// `RECORDS_PAGER_DB` when set and non-empty, the per-user data dir otherwise.
pub fn resolve_db_path(env_value: Option<&str>) -> Result<PathBuf> {
    match env_value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(path) => Ok(PathBuf::from(path)),
        None => default_db_path(),
    }
}
