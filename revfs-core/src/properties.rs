//! Node property lists

use crate::error::Result;
use crate::hash;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::BufRead;

/// Property list of a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap {
    properties: BTreeMap<String, Bytes>,
}

impl PropertyMap {
    /// Create a new empty property list
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a serialized property hash
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            properties: hash::read_hash(reader)?,
        })
    }

    /// Get a property value
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.properties.get(name)
    }

    /// Get a property value as text
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Bytes> {
        self.properties.remove(name)
    }

    /// List all property names
    pub fn list(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bytes)> {
        self.properties.iter()
    }

    /// Serialize as a hash dump
    pub fn to_hash(&self) -> Vec<u8> {
        hash::write_hash(self.properties.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

/// Well-known property names
pub mod svn_props {
    pub const EXECUTABLE: &str = "svn:executable";
    pub const MIME_TYPE: &str = "svn:mime-type";
    pub const IGNORE: &str = "svn:ignore";
    pub const EOL_STYLE: &str = "svn:eol-style";
    pub const KEYWORDS: &str = "svn:keywords";
    pub const NEEDS_LOCK: &str = "svn:needs-lock";
    pub const SPECIAL: &str = "svn:special";
    pub const EXTERNALS: &str = "svn:externals";
    pub const MERGE_INFO: &str = "svn:mergeinfo";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_property_map_round_trips_through_hash() {
        let mut props = PropertyMap::new();
        props.set(svn_props::MIME_TYPE, "text/plain");
        props.set(svn_props::EXECUTABLE, "*");
        assert!(props.contains(svn_props::EXECUTABLE));

        let parsed = PropertyMap::read(&mut Cursor::new(props.to_hash())).unwrap();
        assert_eq!(parsed, props);
        assert_eq!(parsed.get_str(svn_props::MIME_TYPE), Some("text/plain"));
        assert_eq!(parsed.list(), vec![svn_props::EXECUTABLE, svn_props::MIME_TYPE]);
    }

    #[test]
    fn test_remove_property() {
        let mut props = PropertyMap::new();
        props.set("a", "1");
        assert_eq!(props.remove("a"), Some(Bytes::from_static(b"1")));
        assert!(props.is_empty());
    }
}
