//! Error taxonomy for loading and driving an effect.

use std::collections::TryReserveError;

/// Errors produced while loading, cloning, or mutating an [`Effect`](crate::Effect).
///
/// Loading fails fast: the first error tears down everything built so far, so no
/// partially-loaded graph is ever observable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The container is malformed or incompatible: an out-of-range offset or size,
    /// an unknown tag, a layout that breaks register alignment, and so on.
    #[error("invalid effect container: {context}")]
    InvalidFormat { context: String },
    /// Checked arithmetic failed while summing counts or sizes.
    #[error("arithmetic overflow while computing {context}")]
    Overflow { context: &'static str },
    /// An invariant failed after compaction. This indicates a loader bug rather than bad input.
    #[error("internal inconsistency: {context}")]
    InternalInconsistency { context: String },
    /// An arena allocation could not be satisfied.
    #[error("out of memory while allocating {context}")]
    OutOfMemory { context: &'static str },
    /// A runtime call was made with an argument that does not fit the target object.
    #[error("invalid argument: {context}")]
    InvalidArgument { context: String },
    /// The call needs reflection data, which was dropped.
    #[error("reflection data has been dropped")]
    ReflectionUnavailable,
}

impl Error {
    pub(crate) fn format(context: impl Into<String>) -> Self {
        Error::InvalidFormat {
            context: context.into(),
        }
    }

    pub(crate) fn inconsistency(context: impl Into<String>) -> Self {
        Error::InternalInconsistency {
            context: context.into(),
        }
    }

    pub(crate) fn argument(context: impl Into<String>) -> Self {
        Error::InvalidArgument {
            context: context.into(),
        }
    }

    pub(crate) const fn overflow(context: &'static str) -> Self {
        Error::Overflow { context }
    }

    pub(crate) fn out_of_memory(context: &'static str) -> impl FnOnce(TryReserveError) -> Self {
        move |_| Error::OutOfMemory { context }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
