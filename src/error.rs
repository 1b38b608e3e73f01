//! Error types shared across the tree synchronizer.

use crate::namespace::AbsoluteId;
use crate::tree::NodeHandle;
use std::io;
use thiserror::Error;

/// A namespace provider call failed.
///
/// These are absorbed by the expander and the decoration resolver: the tree
/// stays in its last known good state and the failure is only logged.
#[derive(Error, Debug)]
pub enum NamespaceError {
    /// The item does not exist (any more).
    #[error("namespace item {0} not found")]
    NotFound(AbsoluteId),

    /// The item exists but could not be read.
    #[error("failed to access {id}: {source}")]
    Io {
        /// Item that was being accessed.
        id: AbsoluteId,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// The provider refused the request.
    #[error("provider rejected {id}: {reason}")]
    Rejected {
        /// Item the request was made for.
        id: AbsoluteId,
        /// Provider supplied reason.
        reason: String,
    },
}

impl NamespaceError {
    /// Map an I/O error for `id`, folding `NotFound` into [`NamespaceError::NotFound`].
    pub fn from_io(id: &AbsoluteId, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            NamespaceError::NotFound(id.clone())
        } else {
            NamespaceError::Io {
                id: id.clone(),
                source,
            }
        }
    }
}

/// Errors raised by tree operations.
#[derive(Error, Debug)]
pub enum TreeError {
    /// A handle (or one of its ancestors) is no longer part of the tree.
    #[error("stale node handle {0}")]
    StaleHandle(NodeHandle),

    /// The provider could not resolve an item.
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// A decoration worker thread could not be started.
    #[error("failed to start worker {name}: {source}")]
    WorkerSpawn {
        /// Thread name.
        name: String,
        /// Spawn failure.
        source: io::Error,
    },
}
