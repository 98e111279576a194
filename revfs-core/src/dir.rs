//! Directory listings
//!
//! A directory's data representation holds a hash dump mapping entry
//! names to `"<kind> <node-rev-id>"`.

use crate::cache::{RepKey, cache_get, cache_set};
use crate::error::{FsError, Result};
use crate::fs::FsFs;
use crate::hash::{read_hash, read_hash_into};
use crate::id::NodeRevId;
use crate::noderev::{NodeKind, NodeRevision};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::sync::Arc;

/// One entry of a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
    pub id: NodeRevId,
}

/// Entries of one directory by name
pub type DirEntries = BTreeMap<String, DirEntry>;

/// Convert a raw listing of directory `dir_id` into typed entries.
pub fn parse_dir_entries(hash: BTreeMap<String, Bytes>, dir_id: &NodeRevId) -> Result<DirEntries> {
    let corrupt = || FsError::corrupt(format!("Directory entry corrupt in '{}'", dir_id));

    hash.into_iter()
        .map(|(name, value)| {
            let value = std::str::from_utf8(&value).map_err(|_| corrupt())?;
            let (kind, id) = value.split_once(' ').ok_or_else(corrupt)?;
            let kind: NodeKind = kind.parse().map_err(|_| corrupt())?;
            let id = NodeRevId::parse(id).map_err(|_| corrupt())?;
            Ok((name.clone(), DirEntry { name, kind, id }))
        })
        .collect()
}

impl FsFs {
    /// Entries of directory node `noderev`.
    pub fn get_dir_entries(&self, noderev: &NodeRevision) -> Result<Arc<DirEntries>> {
        if noderev.kind != NodeKind::Dir {
            return Err(FsError::NotDirectory(noderev.id.to_string()));
        }
        let Some(rep) = &noderev.data_rep else {
            return Ok(Arc::new(DirEntries::new()));
        };

        if rep.is_txn() {
            // base listing followed by incremental changes
            let path = self
                .layout()
                .path_txn_node_children(&noderev.id)
                .ok_or_else(|| FsError::MalformedId(noderev.id.to_string()))?;
            let mut reader = BufReader::new(File::open(path)?);
            let mut hash = read_hash(&mut reader)?;
            read_hash_into(&mut reader, &mut hash, true)?;
            return parse_dir_entries(hash, &noderev.id)
                .map(Arc::new)
                .map_err(|e| e.in_node_revision(|| noderev.id.to_string()));
        }

        let key = RepKey {
            revision: rep.revision,
            offset: rep.offset,
        };
        if let Some(entries) = cache_get(&self.caches().dir, &key) {
            return Ok(entries);
        }

        let text = self.read_contents(rep)?;
        let hash = read_hash(&mut Cursor::new(text)).map_err(|e| e.in_representation(|| rep.unparse()))?;
        let entries = Arc::new(parse_dir_entries(hash, &noderev.id)?);
        cache_set(&self.caches().dir, key, entries.clone());
        Ok(entries)
    }

    /// Look up the entry `name` of directory node `noderev`.
    pub fn rep_contents_dir_entry(&self, noderev: &NodeRevision, name: &str) -> Result<Option<DirEntry>> {
        Ok(self.get_dir_entries(noderev)?.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(entries: &[(&str, &str)]) -> BTreeMap<String, Bytes> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Bytes::copy_from_slice(v.as_bytes())))
            .collect()
    }

    #[test]
    fn test_parse_entries() {
        let dir = NodeRevId::parse("0.0.r7/200").unwrap();
        let entries = parse_dir_entries(listing(&[("foo.txt", "file 5.3.r7/120"), ("sub", "dir 2.0.r4/0")]), &dir).unwrap();

        let foo = &entries["foo.txt"];
        assert_eq!(foo.kind, NodeKind::File);
        assert_eq!(foo.id.rev_offset(), Some((7, 120)));
        assert_eq!(foo.id.to_string(), "5.3.r7/120");
        assert_eq!(entries["sub"].kind, NodeKind::Dir);
    }

    #[test]
    fn test_corrupt_entries() {
        let dir = NodeRevId::parse("0.0.r7/200").unwrap();
        for value in ["5.3.r7/120", "link 5.3.r7/120", "file not-an-id", "file"] {
            let err = parse_dir_entries(listing(&[("foo", value)]), &dir).unwrap_err();
            assert_eq!(err.to_string(), "Corrupt data: Directory entry corrupt in '0.0.r7/200'", "{value}");
        }
    }
}
