use thiserror::Error;

use crate::dynstream::DynStreamError;
use crate::schemastore::{SchemaStoreError, StorageError};

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the subsystem errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Stream(#[from] DynStreamError),

    #[error(transparent)]
    Schema(#[from] SchemaStoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("config error: {reason}")]
    Config { reason: String },
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Stream(e) => match e {
                DynStreamError::Closed => Transience::Permanent,
                DynStreamError::PathExists | DynStreamError::PathMissing => Transience::Permanent,
            },
            Error::Schema(e) => match e {
                SchemaStoreError::Storage(e) => storage_transience(e),
                SchemaStoreError::Upstream { .. } => Transience::Retryable,
                SchemaStoreError::AlreadyRunning => Transience::Unknown,
                _ => Transience::Permanent,
            },
            Error::Storage(e) => storage_transience(e),
            Error::Config { .. } => Transience::Permanent,
        }
    }
}

fn storage_transience(error: &StorageError) -> Transience {
    match error {
        StorageError::Io { .. } => Transience::Retryable,
        StorageError::WriteStall { .. } => Transience::Unknown,
        _ => Transience::Permanent,
    }
}
