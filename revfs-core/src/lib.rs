//! RevFS Core Library
//!
//! Read side of an FSFS-style revision store:
//! - Node-revision IDs and representation locators
//! - Revision file layout (linear, sharded and packed shards)
//! - svndiff decoding and delta chain reconstruction
//! - Content streams with MD5 verification
//! - Node-revisions, properties, directory listings and changed paths
//! - Optional LRU caches shared between reads
//! - Delta streams between two file texts

pub mod cache;
mod chain;
pub mod changes;
pub mod config;
pub mod delta_stream;
pub mod dir;
pub mod error;
mod file;
pub mod fs;
pub mod hash;
pub mod id;
pub mod layout;
pub mod noderev;
pub mod observe;
pub mod properties;
pub mod reader;
mod rep_state;
pub mod representation;
pub mod svndiff;

#[cfg(test)]
mod test_fixtures;

pub use cache::{Cache, FsCaches, MemoryCache};
pub use changes::{Change, ChangeKind};
pub use config::{CacheConfig, CacheSettings, FsConfig};
pub use delta_stream::DeltaStream;
pub use dir::{DirEntries, DirEntry};
pub use error::{FsError, Result};
pub use fs::FsFs;
pub use id::{IdRelation, NodeRevId, Revnum, TxnId};
pub use layout::{FormatInfo, Layout};
pub use noderev::{NodeKind, NodeRevision};
pub use observe::{Access, AccessObserver, ItemKind, NoopObserver, TracingObserver};
pub use properties::PropertyMap;
pub use reader::ContentStream;
pub use representation::{RepHeader, RepKind, Representation};
pub use svndiff::{Op, OpKind, Window};
