use thiserror::Error;

/// Failure reported by a row source while opening or reading a page.
///
/// Carries only a message: worker-side failures cross the thread boundary as
/// `Failed` events, never as values the consumer has to downcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SourceError {
    message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Flattens an `anyhow` chain (`outer: inner: root`) into a single message.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoaderError {
    #[error("invalid page request: {0}")]
    InvalidPageRequest(String),
    #[error("invalid loader config: {0}")]
    InvalidConfig(String),
    #[error("worker pool is closed")]
    PoolClosed,
    #[error("row source error: {0}")]
    Source(#[from] SourceError),
}

pub type LoaderResult<T> = Result<T, LoaderError>;
