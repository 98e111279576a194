//! Delta chain construction
//!
//! A representation is either plain text or an svndiff against a base
//! representation, which may itself be a delta.  Reading it means walking
//! from the requested representation down to a plain text, a self-delta
//! or a reconstructed buffer from the combined-window cache.

use crate::cache::{RepKey, cache_get};
use crate::error::{FsError, Result};
use crate::file::{FileArena, FileSlot};
use crate::fs::FsFs;
use crate::representation::{RepKind, Representation};
use crate::rep_state::{RepState, create_rep_state};
use bytes::Bytes;
use tracing::debug;

/// What the deepest delta of a chain applies to
#[derive(Debug)]
pub(crate) enum ChainBase {
    /// The chain ends in a self-delta
    Empty,
    /// Plain text representation
    Plain(RepState),
    /// Fully reconstructed content from the combined-window cache
    Cached(Bytes),
}

/// The delta links of one representation, shallowest first
#[derive(Debug)]
pub(crate) struct RepChain {
    pub files: FileArena,
    pub links: Vec<RepState>,
    pub base: ChainBase,
    /// Length of the reconstructed content
    pub expanded_size: u64,
}

/// Representation a delta header points to
fn base_rep(base_revision: u64, base_offset: u64, base_length: u64) -> Representation {
    Representation::new(base_revision, base_offset, base_length, 0, [0; 16])
}

/// Walk the delta chain of `first`.
pub(crate) fn build_rep_chain(fs: &FsFs, first: &Representation) -> Result<RepChain> {
    let mut files = FileArena::new();
    let mut hint: Option<FileSlot> = None;
    let mut links = Vec::new();
    // 0 means unknown or empty until the first header is seen
    let mut expanded_size = first.expanded_size;
    let mut rep = first.clone();

    loop {
        if links.len() >= fs.config().max_chain_length {
            return Err(FsError::corrupt(format!(
                "Delta chain longer than {} links",
                fs.config().max_chain_length
            ))
            .in_representation(|| first.unparse()));
        }

        if !rep.is_txn() {
            let key = RepKey {
                revision: rep.revision,
                offset: rep.offset,
            };
            if let Some(buffer) = cache_get(&fs.caches().combined_window, &key) {
                debug!(revision = rep.revision, offset = rep.offset, depth = links.len(), "combined window cache hit");
                if links.is_empty() && expanded_size == 0 {
                    expanded_size = buffer.len() as u64;
                }
                return Ok(RepChain {
                    files,
                    links,
                    base: ChainBase::Cached(buffer),
                    expanded_size,
                });
            }
        }

        let (state, header) = create_rep_state(fs, &rep, &mut files, &mut hint)?;

        // An empty delta is just the 4-byte marker; every other body is
        // at least as long as its content is.
        if links.is_empty() && expanded_size == 0 && (header.kind == RepKind::Plain || rep.size != 4) {
            expanded_size = rep.size;
        }

        match header.kind {
            RepKind::Plain => {
                return Ok(RepChain {
                    files,
                    links,
                    base: ChainBase::Plain(state),
                    expanded_size,
                });
            }
            RepKind::SelfDelta => {
                links.push(state);
                return Ok(RepChain {
                    files,
                    links,
                    base: ChainBase::Empty,
                    expanded_size,
                });
            }
            RepKind::Delta {
                base_revision,
                base_offset,
                base_length,
            } => {
                links.push(state);
                rep = base_rep(base_revision, base_offset, base_length);
            }
        }
    }
}

impl FsFs {
    /// Number of representations in the delta chain of `rep`, itself included.
    ///
    /// The walk only reads headers and stops at a delta against revision 0.
    pub fn rep_chain_length(&self, rep: &Representation) -> Result<usize> {
        let recycle_interval = self.config().chain_hint_recycle_interval;
        let mut files = FileArena::new();
        let mut hint = None;
        let mut count = 0usize;
        let mut rep = rep.clone();

        loop {
            if count >= self.config().max_chain_length {
                return Err(FsError::corrupt(format!(
                    "Delta chain longer than {} links",
                    self.config().max_chain_length
                ))
                .in_representation(|| rep.unparse()));
            }
            let (_, header) = create_rep_state(self, &rep, &mut files, &mut hint)?;
            count += 1;
            if count % recycle_interval == 0 {
                hint = None;
                files.clear();
            }

            match header.kind {
                RepKind::Delta {
                    base_revision,
                    base_offset,
                    base_length,
                } if base_revision != 0 => {
                    rep = base_rep(base_revision, base_offset, base_length);
                }
                _ => return Ok(count),
            }
        }
    }

    /// Check that the header of `rep` can be read.
    pub fn check_rep(&self, rep: &Representation) -> Result<()> {
        let mut files = FileArena::new();
        create_rep_state(self, rep, &mut files, &mut None)?;
        Ok(())
    }
}
