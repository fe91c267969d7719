//! Error type.

/// Errors surfaced by allocator construction and bookkeeping operations.
///
/// Per-allocation out-of-space is not an error value: allocation functions
/// return a null pointer (or `None` from the `try_` variants) and leave no
/// partial state behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The system heap could not provide the requested backing memory.
    OutOfMemory,
    /// The referenced entry does not exist (e.g. a keep-list handle that
    /// was never enrolled).
    NotFound,
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NotFound => write!(f, "entry not found"),
        }
    }
}

impl std::error::Error for AllocError {}
