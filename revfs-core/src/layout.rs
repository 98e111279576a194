//! Store layout and revision path resolution
//!
//! Maps revisions, transactions and transaction nodes to the files that
//! hold them, given the store's format and sharding.

use crate::error::{FsError, Result};
use crate::id::{NodeRevId, Revnum, TxnId};
use std::path::{Path, PathBuf};

/// Oldest format with a `layout` line in the format file
pub const MIN_LAYOUT_FORMAT: u32 = 3;
/// Oldest format that may pack shards
pub const MIN_PACKED_FORMAT: u32 = 4;
/// Oldest format keeping proto-revision files in `txn-protorevs`
pub const MIN_PROTOREVS_DIR_FORMAT: u32 = 5;
/// Newest format this reader understands
pub const MAX_SUPPORTED_FORMAT: u32 = 6;

pub const PATH_FORMAT: &str = "format";
pub const PATH_CURRENT: &str = "current";
pub const PATH_MIN_UNPACKED_REV: &str = "min-unpacked-rev";
pub const PATH_REVS_DIR: &str = "revs";
pub const PATH_TXNS_DIR: &str = "transactions";
pub const PATH_TXN_PROTOS_DIR: &str = "txn-protorevs";

/// Format number and sharding read from the `format` file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub format: u32,
    /// Revisions per shard, 0 for a linear layout
    pub max_files_per_dir: u64,
}

impl FormatInfo {
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let format: u32 = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| FsError::corrupt("Format file has no format number"))?;
        if format == 0 || format > MAX_SUPPORTED_FORMAT {
            return Err(FsError::UnsupportedFormat(format));
        }

        let mut max_files_per_dir = 0;
        for line in lines.filter(|l| !l.is_empty()) {
            if format < MIN_LAYOUT_FORMAT {
                return Err(FsError::corrupt(format!(
                    "Format {} does not allow options: '{}'",
                    format, line
                )));
            }
            let mut words = line.split(' ');
            match (words.next(), words.next(), words.next(), words.next()) {
                (Some("layout"), Some("linear"), None, None) => max_files_per_dir = 0,
                (Some("layout"), Some("sharded"), Some(n), None) => {
                    max_files_per_dir = n
                        .parse()
                        .map_err(|_| FsError::corrupt(format!("Invalid sharding in format file: '{}'", line)))?;
                }
                _ => {
                    return Err(FsError::corrupt(format!(
                        "Unrecognized option in format file: '{}'",
                        line
                    )));
                }
            }
        }

        Ok(Self {
            format,
            max_files_per_dir,
        })
    }
}

/// Resolves store paths for one store
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    info: FormatInfo,
}

/// Backing file of a revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevLocation {
    /// Standalone revision file; offsets are absolute
    Unpacked(PathBuf),
    /// Shard pack file; offsets are relative to the revision's start
    Packed { pack: PathBuf, shard: u64 },
}

impl RevLocation {
    pub fn path(&self) -> &Path {
        match self {
            RevLocation::Unpacked(path) => path,
            RevLocation::Packed { pack, .. } => pack,
        }
    }

    pub fn is_packed(&self) -> bool {
        matches!(self, RevLocation::Packed { .. })
    }
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, info: FormatInfo) -> Self {
        Self {
            root: root.into(),
            info,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> u32 {
        self.info.format
    }

    pub fn max_files_per_dir(&self) -> u64 {
        self.info.max_files_per_dir
    }

    pub fn is_sharded(&self) -> bool {
        self.info.max_files_per_dir > 0
    }

    pub fn supports_packing(&self) -> bool {
        self.info.format >= MIN_PACKED_FORMAT
    }

    pub fn shard_of(&self, rev: Revnum) -> Option<u64> {
        self.is_sharded().then(|| rev / self.info.max_files_per_dir)
    }

    /// First revision of a shard is a pack boundary.
    pub fn is_shard_start(&self, rev: Revnum) -> bool {
        self.is_sharded() && rev % self.info.max_files_per_dir == 0
    }

    /// Whether `rev` lives in a pack file, given the current pack watermark
    pub fn is_packed(&self, rev: Revnum, min_unpacked_rev: Revnum) -> bool {
        self.supports_packing() && self.is_sharded() && rev < min_unpacked_rev
    }

    /// Two revisions can share an open file only inside the same packed shard.
    pub fn can_share_file(&self, a: Revnum, b: Revnum, min_unpacked_rev: Revnum) -> bool {
        self.is_packed(a, min_unpacked_rev)
            && self.is_packed(b, min_unpacked_rev)
            && self.shard_of(a) == self.shard_of(b)
    }

    pub fn path_format(&self) -> PathBuf {
        self.root.join(PATH_FORMAT)
    }

    pub fn path_current(&self) -> PathBuf {
        self.root.join(PATH_CURRENT)
    }

    pub fn path_min_unpacked_rev(&self) -> PathBuf {
        self.root.join(PATH_MIN_UNPACKED_REV)
    }

    pub fn path_revs_dir(&self) -> PathBuf {
        self.root.join(PATH_REVS_DIR)
    }

    /// Path of the revision file as it exists before packing
    pub fn path_rev(&self, rev: Revnum) -> PathBuf {
        match self.shard_of(rev) {
            Some(shard) => self.path_revs_dir().join(shard.to_string()).join(rev.to_string()),
            None => self.path_revs_dir().join(rev.to_string()),
        }
    }

    pub fn path_rev_shard(&self, shard: u64) -> PathBuf {
        self.path_revs_dir().join(shard.to_string())
    }

    pub fn path_pack_dir(&self, shard: u64) -> PathBuf {
        self.path_revs_dir().join(format!("{}.pack", shard))
    }

    pub fn path_pack(&self, shard: u64) -> PathBuf {
        self.path_pack_dir(shard).join("pack")
    }

    pub fn path_manifest(&self, shard: u64) -> PathBuf {
        self.path_pack_dir(shard).join("manifest")
    }

    pub fn rev_location(&self, rev: Revnum, min_unpacked_rev: Revnum) -> RevLocation {
        match self.shard_of(rev) {
            Some(shard) if self.is_packed(rev, min_unpacked_rev) => RevLocation::Packed {
                pack: self.path_pack(shard),
                shard,
            },
            _ => RevLocation::Unpacked(self.path_rev(rev)),
        }
    }

    pub fn path_txn_dir(&self, txn: &TxnId) -> PathBuf {
        self.root.join(PATH_TXNS_DIR).join(format!("{}.txn", txn))
    }

    /// Proto-revision file collecting a transaction's new representations
    pub fn path_txn_proto_rev(&self, txn: &TxnId) -> PathBuf {
        if self.info.format >= MIN_PROTOREVS_DIR_FORMAT {
            self.root.join(PATH_TXN_PROTOS_DIR).join(format!("{}.rev", txn))
        } else {
            self.path_txn_dir(txn).join("rev")
        }
    }

    /// Mutable node-revision file of a transaction node.
    ///
    /// Returns `None` for committed IDs.
    pub fn path_txn_node_rev(&self, id: &NodeRevId) -> Option<PathBuf> {
        let txn = id.txn_id()?;
        Some(
            self.path_txn_dir(&txn)
                .join(format!("node.{}.{}", id.node_id, id.copy_id)),
        )
    }

    pub fn path_txn_node_props(&self, id: &NodeRevId) -> Option<PathBuf> {
        self.path_txn_node_rev(id).map(|p| with_suffix(p, ".props"))
    }

    pub fn path_txn_node_children(&self, id: &NodeRevId) -> Option<PathBuf> {
        self.path_txn_node_rev(id).map(|p| with_suffix(p, ".children"))
    }
}

fn with_suffix(path: PathBuf, suffix: &str) -> PathBuf {
    let mut os = path.into_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sharded(format: u32, n: u64) -> Layout {
        Layout::new(
            "/repo/db",
            FormatInfo {
                format,
                max_files_per_dir: n,
            },
        )
    }

    #[test]
    fn test_parse_format_file() {
        assert_eq!(
            FormatInfo::parse("6\nlayout sharded 1000\n").unwrap(),
            FormatInfo {
                format: 6,
                max_files_per_dir: 1000
            }
        );
        assert_eq!(FormatInfo::parse("4\nlayout linear\n").unwrap().max_files_per_dir, 0);
        assert_eq!(FormatInfo::parse("2\n").unwrap().format, 2);
        assert!(matches!(FormatInfo::parse("7\n"), Err(FsError::UnsupportedFormat(7))));
        assert!(FormatInfo::parse("2\nlayout sharded 4\n").is_err());
        assert!(FormatInfo::parse("6\nlayout diagonal\n").is_err());
        assert!(FormatInfo::parse("").is_err());
    }

    #[test]
    fn test_rev_paths() {
        let layout = sharded(6, 1000);
        assert_eq!(layout.path_rev(1234), PathBuf::from("/repo/db/revs/1/1234"));
        assert_eq!(layout.path_pack(1), PathBuf::from("/repo/db/revs/1.pack/pack"));
        assert_eq!(layout.path_manifest(0), PathBuf::from("/repo/db/revs/0.pack/manifest"));

        let linear = sharded(6, 0);
        assert_eq!(linear.path_rev(17), PathBuf::from("/repo/db/revs/17"));
        assert_eq!(linear.shard_of(17), None);
    }

    #[test]
    fn test_rev_location_follows_min_unpacked() {
        let layout = sharded(6, 4);
        assert_eq!(
            layout.rev_location(5, 8),
            RevLocation::Packed {
                pack: PathBuf::from("/repo/db/revs/1.pack/pack"),
                shard: 1
            }
        );
        assert_eq!(
            layout.rev_location(9, 8),
            RevLocation::Unpacked(PathBuf::from("/repo/db/revs/2/9"))
        );

        // packing needs format 4
        assert!(!sharded(3, 4).rev_location(5, 8).is_packed());
    }

    #[test]
    fn test_file_sharing_needs_same_packed_shard() {
        let layout = sharded(6, 4);
        assert!(layout.can_share_file(4, 7, 8));
        assert!(!layout.can_share_file(3, 4, 8));
        assert!(!layout.can_share_file(8, 9, 8));
        assert!(layout.is_shard_start(8));
        assert!(!layout.is_shard_start(9));
    }

    #[test]
    fn test_txn_paths() {
        let layout = sharded(6, 4);
        let id = NodeRevId::parse("_2.0.t3-1").unwrap();
        assert_eq!(
            layout.path_txn_node_rev(&id).unwrap(),
            PathBuf::from("/repo/db/transactions/3-1.txn/node._2.0")
        );
        assert_eq!(
            layout.path_txn_node_children(&id).unwrap(),
            PathBuf::from("/repo/db/transactions/3-1.txn/node._2.0.children")
        );
        let txn = id.txn_id().unwrap();
        assert_eq!(
            layout.path_txn_proto_rev(&txn),
            PathBuf::from("/repo/db/txn-protorevs/3-1.rev")
        );
        assert_eq!(
            sharded(4, 4).path_txn_proto_rev(&txn),
            PathBuf::from("/repo/db/transactions/3-1.txn/rev")
        );
        assert!(layout.path_txn_node_rev(&NodeRevId::parse("0.0.r1/0").unwrap()).is_none());
    }
}
