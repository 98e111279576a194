//! Revision store handle
//!
//! [`FsFs`] owns everything that outlives a single read: the layout, the
//! configuration, the pack watermark and the caches.

use crate::cache::{FsCaches, RepKey, cache_get, cache_set};
use crate::config::FsConfig;
use crate::error::{FsError, Result};
use crate::file::SharedFile;
use crate::id::{NodeRevId, Revnum};
use crate::layout::{FormatInfo, Layout};
use crate::noderev::NodeRevision;
use crate::observe::{Access, AccessObserver, ItemKind, NoopObserver};
use crate::properties::PropertyMap;
use std::fs::{self, File};
use std::io::{BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// The trailer line is read from at most this many bytes at the end of a revision
const TRAILER_READ_LEN: u64 = 64;

/// An opened revision store
pub struct FsFs {
    layout: Layout,
    config: FsConfig,
    caches: FsCaches,
    min_unpacked_rev: AtomicU64,
    youngest_rev: AtomicU64,
    observer: Arc<dyn AccessObserver>,
}

fn read_number_file(path: &Path) -> Result<u64> {
    let text = fs::read_to_string(path)?;
    text.split_ascii_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| FsError::corrupt(format!("Malformed number in '{}'", path.display())))
}

impl FsFs {
    /// Open the store at `path` with its `revfs.json` configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let config = FsConfig::load(path.as_ref())?;
        Self::open_with_config(path, config)
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: FsConfig) -> Result<Self> {
        let path = path.as_ref();
        config.validate()?;
        let info = FormatInfo::parse(&fs::read_to_string(path.join(crate::layout::PATH_FORMAT))?)?;

        let store = Self {
            layout: Layout::new(path, info),
            caches: FsCaches::from_config(&config.caches),
            config,
            min_unpacked_rev: AtomicU64::new(0),
            youngest_rev: AtomicU64::new(0),
            observer: Arc::new(NoopObserver),
        };
        store.update_min_unpacked_rev()?;
        let youngest = store.refresh_youngest_rev()?;

        info!(
            path = %path.display(),
            format = info.format,
            max_files_per_dir = info.max_files_per_dir,
            youngest,
            "opened revision store"
        );
        Ok(store)
    }

    /// Replace the caches, e.g. to share them between handles
    pub fn with_caches(mut self, caches: FsCaches) -> Self {
        self.caches = caches;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AccessObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn path(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn caches(&self) -> &FsCaches {
        &self.caches
    }

    pub fn format(&self) -> u32 {
        self.layout.format()
    }

    pub fn min_unpacked_rev(&self) -> Revnum {
        self.min_unpacked_rev.load(Ordering::Acquire)
    }

    /// Youngest revision as of the last refresh
    pub fn youngest_rev(&self) -> Revnum {
        self.youngest_rev.load(Ordering::Acquire)
    }

    /// Re-read the pack watermark from disk.
    pub fn update_min_unpacked_rev(&self) -> Result<Revnum> {
        if !self.layout.supports_packing() {
            return Ok(0);
        }
        let path = self.layout.path_min_unpacked_rev();
        let rev = match read_number_file(&path) {
            Ok(rev) => rev,
            Err(FsError::Io(e)) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        self.min_unpacked_rev.store(rev, Ordering::Release);
        Ok(rev)
    }

    /// Re-read the youngest revision from the `current` file.
    pub fn refresh_youngest_rev(&self) -> Result<Revnum> {
        let rev = read_number_file(&self.layout.path_current())?;
        self.youngest_rev.store(rev, Ordering::Release);
        Ok(rev)
    }

    pub fn is_packed_rev(&self, rev: Revnum) -> bool {
        self.layout.is_packed(rev, self.min_unpacked_rev())
    }

    /// Fail with `NoSuchRevision` unless `rev` has been committed.
    pub fn ensure_revision_exists(&self, rev: Revnum) -> Result<()> {
        if rev <= self.youngest_rev() || rev <= self.refresh_youngest_rev()? {
            Ok(())
        } else {
            Err(FsError::NoSuchRevision(rev))
        }
    }

    /// Open the file holding `rev`, returning whether it is a pack file.
    ///
    /// A missing file may have been packed since the watermark was read,
    /// so the watermark is refreshed once before giving up.
    pub(crate) fn open_pack_or_rev_file(&self, rev: Revnum) -> Result<(File, bool)> {
        self.ensure_revision_exists(rev)?;
        let mut retried = false;
        loop {
            let location = self.layout.rev_location(rev, self.min_unpacked_rev());
            match File::open(location.path()) {
                Ok(file) => return Ok((file, location.is_packed())),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if retried || !self.layout.supports_packing() {
                        return Err(FsError::NoSuchRevision(rev));
                    }
                    debug!(rev, path = %location.path().display(), "revision file missing, re-reading min-unpacked-rev");
                    self.update_min_unpacked_rev()?;
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Start offset of packed revision `rev` within its pack file.
    pub(crate) fn packed_offset(&self, rev: Revnum) -> Result<u64> {
        let shard = self
            .layout
            .shard_of(rev)
            .ok_or_else(|| FsError::corrupt(format!("Revision {} is not in a sharded layout", rev)))?;
        let manifest = match cache_get(&self.caches.packed_offset, &shard) {
            Some(manifest) => manifest,
            None => {
                let text = fs::read_to_string(self.layout.path_manifest(shard))?;
                let manifest = text
                    .lines()
                    .map(|line| {
                        line.trim()
                            .parse::<u64>()
                            .map_err(|_| FsError::corrupt(format!("Malformed pack manifest line '{}'", line)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let manifest = Arc::new(manifest);
                cache_set(&self.caches.packed_offset, shard, manifest.clone());
                manifest
            }
        };
        let index = (rev % self.layout.max_files_per_dir()) as usize;
        manifest.get(index).copied().ok_or_else(|| {
            FsError::corrupt(format!("Pack manifest of shard {} has no entry for revision {}", shard, rev))
        })
    }

    pub(crate) fn observe(&self, revision: Option<Revnum>, offset: u64, kind: ItemKind, cached: bool) {
        self.observer.on_access(&Access {
            revision,
            offset,
            kind,
            cached,
        });
    }

    /// Offsets of the root node-revision and the changed-path list of `rev`,
    /// relative to the start of the revision.
    pub(crate) fn root_changes_offset(&self, rev: Revnum) -> Result<(u64, u64)> {
        let (mut file, packed) = self.open_pack_or_rev_file(rev)?;
        let (rev_start, rev_end) = if packed {
            let start = self.packed_offset(rev)?;
            let end = if self.layout.is_shard_start(rev + 1) {
                file.metadata()?.len()
            } else {
                self.packed_offset(rev + 1)?
            };
            if end < start {
                let shard = self.layout.shard_of(rev).unwrap_or_default();
                return Err(FsError::corrupt(format!("Pack manifest of shard {} is not increasing", shard)));
            }
            (start, end)
        } else {
            (0, file.metadata()?.len())
        };

        let read_start = rev_end.saturating_sub(TRAILER_READ_LEN).max(rev_start);
        file.seek(SeekFrom::Start(read_start))?;
        let mut trailer = vec![0u8; (rev_end - read_start) as usize];
        file.read_exact(&mut trailer)?;
        self.observe(Some(rev), rev_end - rev_start, ItemKind::Trailer, false);

        parse_revision_trailer(&trailer, rev)
    }

    /// ID of the root directory of `rev`.
    pub fn rev_get_root(&self, rev: Revnum) -> Result<NodeRevId> {
        self.ensure_revision_exists(rev)?;
        if let Some(id) = cache_get(&self.caches.rev_root_id, &rev) {
            return Ok(id);
        }

        let (root_offset, _) = self.root_changes_offset(rev)?;
        let mut file = SharedFile::for_revision(rev);
        let reader = file.seek(self, rev, root_offset)?;
        let noderev = NodeRevision::read(reader)
            .map_err(|e| e.in_node_revision(|| format!("r{}/{}", rev, root_offset)))?;

        cache_set(&self.caches.rev_root_id, rev, noderev.id);
        Ok(noderev.id)
    }

    /// Read the node-revision `id`.
    pub fn get_node_revision(&self, id: &NodeRevId) -> Result<NodeRevision> {
        self.get_node_revision_body(id)
            .map_err(|e| e.in_node_revision(|| id.to_string()))
    }

    fn get_node_revision_body(&self, id: &NodeRevId) -> Result<NodeRevision> {
        let Some((revision, offset)) = id.rev_offset() else {
            // transaction nodes live in their own mutable files
            let path = self
                .layout
                .path_txn_node_rev(id)
                .ok_or_else(|| FsError::MalformedId(id.to_string()))?;
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(FsError::DanglingId {
                        id: id.to_string(),
                        fs_path: self.path().display().to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            self.observe(None, 0, ItemKind::NodeRevision, false);
            return NodeRevision::read(&mut BufReader::new(file));
        };

        let key = RepKey { revision, offset };
        if let Some(noderev) = cache_get(&self.caches.node_revision, &key) {
            self.observe(Some(revision), offset, ItemKind::NodeRevision, true);
            return Ok(NodeRevision::clone(&noderev));
        }

        let mut file = SharedFile::for_revision(revision);
        let reader = file.seek(self, revision, offset)?;
        let mut noderev = NodeRevision::read(reader)?;
        self.observe(Some(revision), offset, ItemKind::NodeRevision, false);
        noderev.is_fresh_txn_root = false;

        cache_set(&self.caches.node_revision, key, Arc::new(noderev.clone()));
        Ok(noderev)
    }

    /// Property list of a node.
    pub fn get_proplist(&self, noderev: &NodeRevision) -> Result<PropertyMap> {
        let Some(rep) = &noderev.prop_rep else {
            return Ok(PropertyMap::new());
        };

        if rep.is_txn() {
            let path = self
                .layout
                .path_txn_node_props(&noderev.id)
                .ok_or_else(|| FsError::MalformedId(noderev.id.to_string()))?;
            let file = File::open(path)?;
            return PropertyMap::read(&mut BufReader::new(file))
                .map_err(|e| e.in_node_revision(|| noderev.id.to_string()));
        }

        let key = RepKey {
            revision: rep.revision,
            offset: rep.offset,
        };
        if let Some(props) = cache_get(&self.caches.properties, &key) {
            return Ok(PropertyMap::clone(&props));
        }

        let text = self.read_contents(rep)?;
        let props = PropertyMap::read(&mut Cursor::new(text)).map_err(|e| e.in_representation(|| rep.unparse()))?;
        cache_set(&self.caches.properties, key, Arc::new(props.clone()));
        Ok(props)
    }
}

/// Parse the final line of a revision, `<root offset> <changes offset>\n`.
pub(crate) fn parse_revision_trailer(trailer: &[u8], rev: Revnum) -> Result<(u64, u64)> {
    if trailer.last() != Some(&b'\n') {
        return Err(FsError::corrupt(format!("Revision file (r{}) lacks trailing newline", rev)));
    }
    let body = &trailer[..trailer.len() - 1];
    let line_start = body
        .iter()
        .rposition(|&b| b == b'\n')
        .ok_or_else(|| {
            FsError::corrupt(format!(
                "Final line in revision file (r{}) longer than {} characters",
                rev, TRAILER_READ_LEN
            ))
        })?;
    let line = std::str::from_utf8(&body[line_start + 1..])
        .map_err(|_| FsError::corrupt(format!("Final line in revision file (r{}) is not text", rev)))?;

    let (root, changes) = line
        .split_once(' ')
        .ok_or_else(|| FsError::corrupt(format!("Final line in revision file r{} missing space", rev)))?;
    let offset = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| FsError::corrupt(format!("Malformed offset '{}' in revision file r{}", s, rev)))
    };
    Ok((offset(root)?, offset(changes)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trailer() {
        assert_eq!(parse_revision_trailer(b"END\n\n17 107\n", 3).unwrap(), (17, 107));
    }

    #[test]
    fn test_malformed_trailers() {
        let no_newline = parse_revision_trailer(b"\n17 107", 3).unwrap_err();
        assert!(no_newline.to_string().contains("lacks trailing newline"));

        let long = parse_revision_trailer(&[b'1'; 64], 3).unwrap_err();
        assert!(long.is_corruption());

        let too_long = parse_revision_trailer(format!("{}\n", "1".repeat(63)).as_bytes(), 3).unwrap_err();
        assert!(too_long.to_string().contains("longer than 64"));

        let no_space = parse_revision_trailer(b"\n17107\n", 3).unwrap_err();
        assert!(no_space.to_string().contains("missing space"));

        assert!(parse_revision_trailer(b"\nx 1\n", 3).unwrap_err().is_corruption());
    }
}
