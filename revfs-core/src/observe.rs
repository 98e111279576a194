//! Item access observation

use crate::id::Revnum;
use tracing::trace;

/// Kind of item read from a revision or transaction file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    NodeRevision,
    RepHeader,
    PlainContents,
    DeltaWindow,
    Trailer,
    Changes,
}

/// One access to stored data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    /// `None` for transaction files
    pub revision: Option<Revnum>,
    pub offset: u64,
    pub kind: ItemKind,
    /// Whether the item came from a cache instead of disk
    pub cached: bool,
}

/// Receives every item access of a store
pub trait AccessObserver: Send + Sync {
    fn on_access(&self, _access: &Access) {}
}

/// Ignores all accesses
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AccessObserver for NoopObserver {}

/// Logs accesses at trace level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AccessObserver for TracingObserver {
    fn on_access(&self, access: &Access) {
        trace!(
            revision = ?access.revision,
            offset = access.offset,
            kind = ?access.kind,
            cached = access.cached,
            "item access"
        );
    }
}
