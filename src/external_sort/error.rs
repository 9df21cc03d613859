use thiserror::Error;

/// Failure modes of the sort engine.
///
/// `Cancelled` is the cooperative abort path and is not a real failure; use
/// [`SortError::is_cancelled`] to tell it apart before reporting anything.
#[derive(Error, Debug)]
pub enum SortError {
    #[error("Malformed line {line_number}: {reason}")]
    MalformedLine { line_number: u64, reason: String },

    #[error("Sort was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl SortError {
    pub fn malformed(line_number: u64, reason: impl Into<String>) -> Self {
        Self::MalformedLine {
            line_number,
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Used when joining a worker thread that panicked.
    pub(crate) fn worker_panicked(stage: &str) -> Self {
        Self::InvalidState(format!("{} worker panicked", stage))
    }
}

pub type Result<T> = std::result::Result<T, SortError>;

/// Picks the error to surface when several pipeline stages failed.
///
/// A real failure wins over `Cancelled`, since cancellation is usually just
/// the echo of another stage giving up.
pub(crate) fn first_failure(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
    let mut cancelled = false;
    for result in results {
        match result {
            Ok(()) => {}
            Err(SortError::Cancelled) => cancelled = true,
            Err(e) => return Err(e),
        }
    }
    if cancelled {
        Err(SortError::Cancelled)
    } else {
        Ok(())
    }
}
