//! Node-revision identifiers
//!
//! A node-revision ID is made of three parts: the node id, the copy id and
//! either the transaction it lives in or the (revision, offset) address of
//! its node-revision header in a revision file.

use crate::error::{FsError, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Revision number
pub type Revnum = u64;

/// One node id / copy id component
///
/// `revision` is `None` for counters that are local to a transaction
/// (written as `_<n>`), `Some(0)` for old-style global counters and
/// `Some(rev)` for counters created in revision `rev` (written `<n>-<rev>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdPart {
    pub revision: Option<Revnum>,
    pub number: u64,
}

impl IdPart {
    pub fn new(revision: Revnum, number: u64) -> Self {
        Self {
            revision: Some(revision),
            number,
        }
    }

    /// The default part used when no copy was made
    pub fn is_root(&self) -> bool {
        self.revision == Some(0) && self.number == 0
    }

    fn parse(s: &str) -> Option<Self> {
        if let Some(rest) = s.strip_prefix('_') {
            return Some(Self {
                revision: None,
                number: base36_decode(rest)?,
            });
        }
        match s.split_once('-') {
            Some((number, rev)) => Some(Self {
                revision: Some(rev.parse().ok()?),
                number: base36_decode(number)?,
            }),
            None => Some(Self {
                revision: Some(0),
                number: base36_decode(s)?,
            }),
        }
    }
}

impl fmt::Display for IdPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.revision {
            None => write!(f, "_{}", base36_encode(self.number)),
            Some(0) => write!(f, "{}", base36_encode(self.number)),
            Some(rev) => write!(f, "{}-{}", base36_encode(self.number), rev),
        }
    }
}

impl PartialOrd for IdPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdPart {
    fn cmp(&self, other: &Self) -> Ordering {
        self.revision
            .cmp(&other.revision)
            .then(self.number.cmp(&other.number))
    }
}

/// Transaction identifier, `<base-rev>-<base36 counter>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId {
    pub revision: Revnum,
    pub number: u64,
}

impl TxnId {
    pub fn new(revision: Revnum, number: u64) -> Self {
        Self { revision, number }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.revision, base36_encode(self.number))
    }
}

impl FromStr for TxnId {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || FsError::MalformedId(s.to_string());
        let (rev, number) = s.split_once('-').ok_or_else(malformed)?;
        Ok(Self {
            revision: rev.parse().map_err(|_| malformed())?,
            number: base36_decode(number).ok_or_else(malformed)?,
        })
    }
}

/// Where a node-revision lives: in an open transaction or in a revision file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdAddress {
    Txn(TxnId),
    Rev { revision: Revnum, offset: u64 },
}

/// Result of comparing two node-revision IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRelation {
    Equal,
    Related,
    Unrelated,
}

/// Node-revision identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRevId {
    pub node_id: IdPart,
    pub copy_id: IdPart,
    pub address: IdAddress,
}

impl NodeRevId {
    /// Create a committed ID
    pub fn rev(node_id: IdPart, copy_id: IdPart, revision: Revnum, offset: u64) -> Self {
        Self {
            node_id,
            copy_id,
            address: IdAddress::Rev { revision, offset },
        }
    }

    /// Create an ID inside transaction `txn`
    pub fn txn(node_id: IdPart, copy_id: IdPart, txn: TxnId) -> Self {
        Self {
            node_id,
            copy_id,
            address: IdAddress::Txn(txn),
        }
    }

    pub fn is_txn(&self) -> bool {
        matches!(self.address, IdAddress::Txn(_))
    }

    pub fn txn_id(&self) -> Option<TxnId> {
        match self.address {
            IdAddress::Txn(txn) => Some(txn),
            IdAddress::Rev { .. } => None,
        }
    }

    /// Revision and offset of a committed ID
    pub fn rev_offset(&self) -> Option<(Revnum, u64)> {
        match self.address {
            IdAddress::Rev { revision, offset } => Some((revision, offset)),
            IdAddress::Txn(_) => None,
        }
    }

    pub fn revision(&self) -> Option<Revnum> {
        self.rev_offset().map(|(rev, _)| rev)
    }

    /// Parse an ID from its string form
    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || FsError::MalformedId(s.to_string());
        let mut parts = s.splitn(3, '.');
        let node_id = parts.next().and_then(IdPart::parse).ok_or_else(malformed)?;
        let copy_id = parts.next().and_then(IdPart::parse).ok_or_else(malformed)?;
        let tail = parts.next().ok_or_else(malformed)?;

        let address = if let Some(rest) = tail.strip_prefix('r') {
            let (rev, offset) = rest.split_once('/').ok_or_else(malformed)?;
            IdAddress::Rev {
                revision: rev.parse().map_err(|_| malformed())?,
                offset: offset.parse().map_err(|_| malformed())?,
            }
        } else if let Some(rest) = tail.strip_prefix('t') {
            IdAddress::Txn(rest.parse().map_err(|_| malformed())?)
        } else {
            return Err(malformed());
        };

        Ok(Self {
            node_id,
            copy_id,
            address,
        })
    }

    /// Same node and copy lineage, regardless of address
    pub fn is_related(&self, other: &NodeRevId) -> bool {
        if self == other {
            return true;
        }
        // Transaction-local node ids only mean something inside their own txn.
        if self.node_id.revision.is_none() && self.txn_id() != other.txn_id() {
            return false;
        }
        self.node_id == other.node_id && self.copy_id == other.copy_id
    }

    /// Three-way comparison used by history tracing
    pub fn compare(&self, other: &NodeRevId) -> IdRelation {
        if self == other {
            IdRelation::Equal
        } else if self.is_related(other) {
            IdRelation::Related
        } else {
            IdRelation::Unrelated
        }
    }

    /// Order two committed addresses by revision, then offset.
    ///
    /// Returns `None` when either ID is a transaction ID.
    pub fn cmp_address(&self, other: &NodeRevId) -> Option<Ordering> {
        Some(self.rev_offset()?.cmp(&other.rev_offset()?))
    }
}

impl fmt::Display for NodeRevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            IdAddress::Txn(txn) => write!(f, "{}.{}.t{}", self.node_id, self.copy_id, txn),
            IdAddress::Rev { revision, offset } => {
                write!(f, "{}.{}.r{}/{}", self.node_id, self.copy_id, revision, offset)
            }
        }
    }
}

impl FromStr for NodeRevId {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub(crate) fn base36_encode(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

pub(crate) fn base36_decode(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    s.bytes().try_fold(0u64, |acc, c| {
        let digit = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'z' => c - b'a' + 10,
            _ => return None,
        };
        acc.checked_mul(36)?.checked_add(digit as u64)
    })
}
