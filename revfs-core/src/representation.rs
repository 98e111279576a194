//! Representation descriptors and headers
//!
//! A representation is one stored byte blob (file contents, a directory
//! listing or a property list).  Its descriptor is written into the
//! node-revision as a textual locator; its first line on disk is the
//! representation header telling whether the body is plain text or an
//! svndiff delta, and against which base.

use crate::error::{FsError, Result};
use crate::id::{NodeRevId, Revnum, TxnId};
use std::fmt;
use std::io::BufRead;

/// Longest representation header line we accept
const MAX_HEADER_LEN: usize = 160;

/// Descriptor of one stored representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    /// Revision containing the representation; meaningless for txn reps
    pub revision: Revnum,
    /// Offset of the header within the revision
    pub offset: u64,
    /// On-disk size of the body (without header and trailer)
    pub size: u64,
    /// Size of the reconstructed content, 0 if unknown
    pub expanded_size: u64,
    pub md5_digest: [u8; 16],
    pub sha1_digest: Option<String>,
    pub uniquifier: Option<String>,
    /// Set while the representation lives in a transaction's proto-rev file
    pub txn_id: Option<TxnId>,
}

impl Representation {
    pub fn new(revision: Revnum, offset: u64, size: u64, expanded_size: u64, md5_digest: [u8; 16]) -> Self {
        Self {
            revision,
            offset,
            size,
            expanded_size,
            md5_digest,
            sha1_digest: None,
            uniquifier: None,
            txn_id: None,
        }
    }

    pub fn is_txn(&self) -> bool {
        self.txn_id.is_some()
    }

    /// Content length as far as the descriptor knows it
    pub fn content_len(&self) -> u64 {
        if self.expanded_size != 0 {
            self.expanded_size
        } else {
            self.size
        }
    }

    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5_digest)
    }

    /// Parse a textual locator.
    ///
    /// `-1` as the revision means the representation is stored in the
    /// transaction of `noderev_id`.
    pub fn parse(text: &str, noderev_id: Option<&NodeRevId>) -> Result<Self> {
        let malformed = || FsError::corrupt(format!("Malformed text representation offset line in node-rev: '{}'", text));
        let mut tokens = text.split_ascii_whitespace();

        let revision = tokens.next().ok_or_else(malformed)?;
        let txn_id = if revision == "-1" {
            Some(noderev_id.and_then(|id| id.txn_id()).ok_or_else(malformed)?)
        } else {
            None
        };
        let revision: Revnum = if txn_id.is_some() {
            0
        } else {
            revision.parse().map_err(|_| malformed())?
        };

        let Some(offset) = tokens.next() else {
            // A mutable rep may be named by its transaction alone.
            return match txn_id {
                Some(_) => Ok(Self {
                    txn_id,
                    ..Self::new(revision, 0, 0, 0, [0; 16])
                }),
                None => Err(malformed()),
            };
        };

        let number = |tok: Option<&str>| -> Result<u64> {
            tok.and_then(|t| t.parse().ok()).ok_or_else(malformed)
        };
        let offset = number(Some(offset))?;
        let size = number(tokens.next())?;
        let expanded_size = number(tokens.next())?;

        let md5 = tokens.next().ok_or_else(malformed)?;
        let mut md5_digest = [0u8; 16];
        hex::decode_to_slice(md5, &mut md5_digest).map_err(|_| malformed())?;

        let sha1_digest = tokens.next().map(str::to_string);
        let uniquifier = tokens.next().map(str::to_string);

        Ok(Self {
            revision,
            offset,
            size,
            expanded_size,
            md5_digest,
            sha1_digest,
            uniquifier,
            txn_id,
        })
    }

    /// Textual locator, also used in corruption diagnostics
    pub fn unparse(&self) -> String {
        let rev = if self.is_txn() {
            "-1".to_string()
        } else {
            self.revision.to_string()
        };
        let mut out = format!(
            "{} {} {} {} {}",
            rev,
            self.offset,
            self.size,
            self.expanded_size,
            self.md5_hex()
        );
        if let Some(sha1) = &self.sha1_digest {
            out.push(' ');
            out.push_str(sha1);
            if let Some(uniquifier) = &self.uniquifier {
                out.push(' ');
                out.push_str(uniquifier);
            }
        }
        out
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unparse())
    }
}

/// Kind of a representation body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepKind {
    /// Fulltext follows the header
    Plain,
    /// svndiff against the empty stream
    SelfDelta,
    /// svndiff against another representation
    Delta {
        base_revision: Revnum,
        base_offset: u64,
        base_length: u64,
    },
}

/// Parsed representation header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepHeader {
    pub kind: RepKind,
    /// Length of the header line including its newline
    pub header_size: u64,
}

impl RepHeader {
    pub fn is_delta(&self) -> bool {
        matches!(self.kind, RepKind::Delta { .. })
    }

    /// Parse one header line (without its trailing newline).
    pub fn parse_line(line: &str) -> Result<Self> {
        let malformed = || FsError::corrupt("Malformed representation header");
        let header_size = line.len() as u64 + 1;

        let kind = match line {
            "PLAIN" => RepKind::Plain,
            "DELTA" => RepKind::SelfDelta,
            _ => {
                let rest = line.strip_prefix("DELTA ").ok_or_else(malformed)?;
                let mut tokens = rest.split(' ');
                let mut number = || -> Result<u64> {
                    tokens.next().and_then(|t| t.parse().ok()).ok_or_else(malformed)
                };
                let kind = RepKind::Delta {
                    base_revision: number()?,
                    base_offset: number()?,
                    base_length: number()?,
                };
                if tokens.next().is_some() {
                    return Err(malformed());
                }
                kind
            }
        };

        Ok(Self { kind, header_size })
    }

    /// Read and parse the header line at the current stream position.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self> {
        let mut line = Vec::with_capacity(32);
        std::io::Read::take(&mut *reader, MAX_HEADER_LEN as u64).read_until(b'\n', &mut line)?;
        if line.pop() != Some(b'\n') {
            return Err(FsError::corrupt("Malformed representation header"));
        }
        let line = std::str::from_utf8(&line)
            .map_err(|_| FsError::corrupt("Malformed representation header"))?;
        Self::parse_line(line)
    }

    pub fn unparse(&self) -> String {
        match self.kind {
            RepKind::Plain => "PLAIN\n".to_string(),
            RepKind::SelfDelta => "DELTA\n".to_string(),
            RepKind::Delta {
                base_revision,
                base_offset,
                base_length,
            } => format!("DELTA {} {} {}\n", base_revision, base_offset, base_length),
        }
    }
}
