//! Node-revision records
//!
//! A node-revision is stored as a block of `key: value` header lines
//! terminated by an empty line.

use crate::error::{FsError, Result};
use crate::id::{NodeRevId, Revnum};
use crate::representation::Representation;
use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

const HEADER_ID: &str = "id";
const HEADER_TYPE: &str = "type";
const HEADER_COUNT: &str = "count";
const HEADER_PROPS: &str = "props";
const HEADER_TEXT: &str = "text";
const HEADER_CPATH: &str = "cpath";
const HEADER_PRED: &str = "pred";
const HEADER_COPYFROM: &str = "copyfrom";
const HEADER_COPYROOT: &str = "copyroot";
const HEADER_FRESHTXNRT: &str = "is-fresh-txn-root";
const HEADER_MINFO_HERE: &str = "minfo-here";
const HEADER_MINFO_CNT: &str = "minfo-cnt";

/// Node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Dir,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => f.write_str("file"),
            NodeKind::Dir => f.write_str("dir"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(NodeKind::File),
            "dir" => Ok(NodeKind::Dir),
            other => Err(FsError::corrupt(format!("Invalid node kind '{}'", other))),
        }
    }
}

/// One node-revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRevision {
    pub id: NodeRevId,
    pub kind: NodeKind,
    pub predecessor_id: Option<NodeRevId>,
    pub predecessor_count: u64,
    /// File contents or directory listing
    pub data_rep: Option<Representation>,
    pub prop_rep: Option<Representation>,
    pub created_path: String,
    pub copyfrom: Option<(Revnum, String)>,
    pub copyroot: (Revnum, String),
    pub is_fresh_txn_root: bool,
    pub mergeinfo_count: u64,
    pub has_mergeinfo: bool,
}

impl NodeRevision {
    /// Read a node-revision header block from `reader`.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self> {
        let headers = read_header_block(reader)?;
        Self::from_headers(&headers)
    }

    fn from_headers(headers: &HashMap<String, String>) -> Result<Self> {
        let missing = |field: &str| FsError::corrupt(format!("Missing {} field in node-rev", field));

        let id = NodeRevId::parse(headers.get(HEADER_ID).ok_or_else(|| missing(HEADER_ID))?)
            .map_err(|e| FsError::corrupt(e.to_string()))?;
        let kind: NodeKind = headers
            .get(HEADER_TYPE)
            .ok_or_else(|| missing(HEADER_TYPE))?
            .parse()?;

        let predecessor_count = match headers.get(HEADER_COUNT) {
            Some(count) => count
                .parse()
                .map_err(|_| FsError::corrupt(format!("Invalid predecessor count '{}'", count)))?,
            None => 0,
        };

        let data_rep = headers
            .get(HEADER_TEXT)
            .map(|text| Representation::parse(text, Some(&id)))
            .transpose()?;
        let prop_rep = headers
            .get(HEADER_PROPS)
            .map(|text| Representation::parse(text, Some(&id)))
            .transpose()?;

        let created_path = headers.get(HEADER_CPATH).ok_or_else(|| missing(HEADER_CPATH))?.clone();

        let predecessor_id = headers
            .get(HEADER_PRED)
            .map(|pred| NodeRevId::parse(pred).map_err(|e| FsError::corrupt(e.to_string())))
            .transpose()?;

        let copyroot = match headers.get(HEADER_COPYROOT) {
            Some(value) => parse_rev_path(value, HEADER_COPYROOT)?,
            None => (id.revision().unwrap_or(0), created_path.clone()),
        };
        let copyfrom = headers
            .get(HEADER_COPYFROM)
            .map(|value| parse_rev_path(value, HEADER_COPYFROM))
            .transpose()?;

        let mergeinfo_count = match headers.get(HEADER_MINFO_CNT) {
            Some(count) => count
                .parse()
                .map_err(|_| FsError::corrupt(format!("Invalid mergeinfo count '{}'", count)))?,
            None => 0,
        };

        Ok(Self {
            id,
            kind,
            predecessor_id,
            predecessor_count,
            data_rep,
            prop_rep,
            created_path,
            copyfrom,
            copyroot,
            is_fresh_txn_root: headers.contains_key(HEADER_FRESHTXNRT),
            mergeinfo_count,
            has_mergeinfo: headers.contains_key(HEADER_MINFO_HERE),
        })
    }

    /// Serialize as a header block, including the terminating blank line.
    pub fn unparse(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: &dyn fmt::Display| {
            out.push_str(&format!("{}: {}\n", key, value));
        };
        line(HEADER_ID, &self.id);
        line(HEADER_TYPE, &self.kind);
        if let Some(pred) = &self.predecessor_id {
            line(HEADER_PRED, pred);
        }
        line(HEADER_COUNT, &self.predecessor_count);
        if let Some(rep) = &self.data_rep {
            line(HEADER_TEXT, rep);
        }
        if let Some(rep) = &self.prop_rep {
            line(HEADER_PROPS, rep);
        }
        line(HEADER_CPATH, &self.created_path);
        if let Some((rev, path)) = &self.copyfrom {
            line(HEADER_COPYFROM, &format!("{} {}", rev, path));
        }
        let (root_rev, root_path) = &self.copyroot;
        if self.id.revision() != Some(*root_rev) || *root_path != self.created_path {
            line(HEADER_COPYROOT, &format!("{} {}", root_rev, root_path));
        }
        if self.is_fresh_txn_root {
            line(HEADER_FRESHTXNRT, &"y");
        }
        if self.mergeinfo_count > 0 {
            line(HEADER_MINFO_CNT, &self.mergeinfo_count);
        }
        if self.has_mergeinfo {
            line(HEADER_MINFO_HERE, &"y");
        }
        out.push('\n');
        out
    }
}

fn parse_rev_path(value: &str, field: &str) -> Result<(Revnum, String)> {
    let malformed = || FsError::corrupt(format!("Malformed {} line in node-rev", field));
    let (rev, path) = value.split_once(' ').ok_or_else(malformed)?;
    if !path.starts_with('/') {
        return Err(malformed());
    }
    Ok((rev.parse().map_err(|_| malformed())?, path.to_string()))
}

/// Read `key: value` lines up to an empty line or EOF.
pub(crate) fn read_header_block<R: BufRead>(reader: &mut R) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.strip_suffix('\n').unwrap_or(&line);
        if text.is_empty() {
            break;
        }
        let (key, value) = text
            .split_once(": ")
            .ok_or_else(|| FsError::corrupt(format!("Found malformed header '{}' in revision file", text)))?;
        headers.insert(key.to_string(), value.to_string());
    }
    Ok(headers)
}
