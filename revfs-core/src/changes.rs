//! Changed-path lists
//!
//! Every revision ends with the list of paths it changed, one entry per
//! change:
//!
//! ```text
//! <noderev-id> <action>[-<kind>] <text-mod> <prop-mod> <path>
//! [<copyfrom-rev> <copyfrom-path>]
//! ```
//!
//! where the second line is empty when the path was not copied.

use crate::cache::{cache_get, cache_set};
use crate::error::{FsError, Result};
use crate::file::SharedFile;
use crate::fs::FsFs;
use crate::id::{NodeRevId, Revnum};
use crate::noderev::NodeKind;
use crate::observe::ItemKind;
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;
use std::sync::Arc;

/// What happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Modify,
    Add,
    Delete,
    Replace,
    Reset,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Modify => "modify",
            ChangeKind::Add => "add",
            ChangeKind::Delete => "delete",
            ChangeKind::Replace => "replace",
            ChangeKind::Reset => "reset",
        })
    }
}

impl FromStr for ChangeKind {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "modify" => Ok(ChangeKind::Modify),
            "add" => Ok(ChangeKind::Add),
            "delete" => Ok(ChangeKind::Delete),
            "replace" => Ok(ChangeKind::Replace),
            "reset" => Ok(ChangeKind::Reset),
            _ => Err(invalid_change()),
        }
    }
}

/// One entry of a changed-path list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    /// `None` for resets
    pub noderev_id: Option<NodeRevId>,
    pub kind: ChangeKind,
    pub node_kind: Option<NodeKind>,
    pub text_mod: bool,
    pub prop_mod: bool,
    pub copyfrom: Option<(Revnum, String)>,
}

impl Change {
    pub fn unparse(&self) -> String {
        let id = self
            .noderev_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "_".to_string());
        let action = match self.node_kind {
            Some(kind) => format!("{}-{}", self.kind, kind),
            None => self.kind.to_string(),
        };
        let copyfrom = match &self.copyfrom {
            Some((rev, path)) => format!("{} {}", rev, path),
            None => String::new(),
        };
        format!(
            "{} {} {} {} {}\n{}\n",
            id, action, self.text_mod, self.prop_mod, self.path, copyfrom
        )
    }
}

fn invalid_change() -> FsError {
    FsError::corrupt("Invalid changes line in rev-file")
}

fn parse_flag(s: Option<&str>) -> Result<bool> {
    match s {
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        _ => Err(FsError::corrupt("Invalid text-mod or prop-mod flag in rev-file")),
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(Some(line))
}

/// Read one change; `None` at the end of the list.
fn read_change<R: BufRead>(reader: &mut R) -> Result<Option<Change>> {
    let line = match read_line(reader)? {
        Some(line) if !line.is_empty() => line,
        _ => return Ok(None),
    };

    let mut parts = line.splitn(5, ' ');
    let id = parts.next().ok_or_else(invalid_change)?;
    let noderev_id = match id {
        "_" => None,
        id => Some(NodeRevId::parse(id).map_err(|_| invalid_change())?),
    };

    let action = parts.next().ok_or_else(invalid_change)?;
    let (kind, node_kind) = match action.split_once('-') {
        Some((kind, node_kind)) => (kind.parse()?, Some(node_kind.parse().map_err(|_| invalid_change())?)),
        None => (action.parse()?, None),
    };

    let text_mod = parse_flag(parts.next())?;
    let prop_mod = parse_flag(parts.next())?;
    let path = parts.next().ok_or_else(invalid_change)?.to_string();

    let copyfrom = match read_line(reader)? {
        Some(line) if !line.is_empty() => {
            let (rev, from) = line.split_once(' ').ok_or_else(invalid_change)?;
            Some((rev.parse().map_err(|_| invalid_change())?, from.to_string()))
        }
        _ => None,
    };

    Ok(Some(Change {
        path,
        noderev_id,
        kind,
        node_kind,
        text_mod,
        prop_mod,
        copyfrom,
    }))
}

/// Read a changed-path list up to an empty line or EOF.
pub fn read_changes<R: BufRead>(reader: &mut R) -> Result<Vec<Change>> {
    let mut changes = Vec::new();
    while let Some(change) = read_change(reader)? {
        changes.push(change);
    }
    Ok(changes)
}

impl FsFs {
    /// Paths changed in revision `rev`.
    pub fn get_changes(&self, rev: Revnum) -> Result<Arc<Vec<Change>>> {
        if let Some(changes) = cache_get(&self.caches().changes, &rev) {
            return Ok(changes);
        }

        self.ensure_revision_exists(rev)?;
        let (_, changes_offset) = self.root_changes_offset(rev)?;
        let mut file = SharedFile::for_revision(rev);
        let reader = file.seek(self, rev, changes_offset)?;
        let changes = Arc::new(read_changes(reader)?);
        self.observe(Some(rev), changes_offset, ItemKind::Changes, false);

        cache_set(&self.caches().changes, rev, changes.clone());
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(text: &str) -> Result<Vec<Change>> {
        read_changes(&mut Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn test_read_changes() {
        let text = "0.0.r1/20 modify-dir false true /\n\n\
                    2.0.r1/0 add-file true false /trunk/a file.txt\n0 /old.txt\n\n17 107\n";
        let changes = parse(text).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, ChangeKind::Modify);
        assert_eq!(changes[0].node_kind, Some(NodeKind::Dir));
        assert!(changes[0].prop_mod);
        assert_eq!(changes[1].path, "/trunk/a file.txt");
        assert_eq!(changes[1].copyfrom, Some((0, "/old.txt".to_string())));
    }

    #[test]
    fn test_reset_and_old_style_action() {
        let changes = parse("_ reset false false /gone\n\n0.0.r2/5 delete false false /x\n").unwrap();
        assert_eq!(changes[0].noderev_id, None);
        assert_eq!(changes[0].kind, ChangeKind::Reset);
        assert_eq!(changes[1].node_kind, None);
    }

    #[test]
    fn test_unparse_matches_format() {
        let text = "2.0.r1/0 add-file true false /a\n0 /b\n";
        let changes = parse(text).unwrap();
        assert_eq!(changes[0].unparse(), text);
    }

    #[test]
    fn test_invalid_changes() {
        for bad in [
            "0.0.r1/0 frob false false /\n\n",
            "0.0.r1/0 modify maybe false /\n\n",
            "0.0.r1/0 modify false false\n\n",
            "0.0.r1/0 modify-link false false /\n\n",
            "0.0.r1/0 add false false /a\nx /b\n",
        ] {
            assert!(parse(bad).unwrap_err().is_corruption(), "{bad}");
        }
    }
}
