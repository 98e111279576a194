//! Lazily opened revision and proto-revision files
//!
//! A [`SharedFile`] is opened on first access and may serve several
//! representations of one packed shard.  The files of one read live in a
//! [`FileArena`]; readers refer to them by [`FileSlot`].

use crate::error::Result;
use crate::fs::FsFs;
use crate::id::{Revnum, TxnId};
use std::fs::File;
use std::io::{BufReader, Seek};

/// Buffer size of revision file readers
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Index of a file within its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileSlot(usize);

/// A revision, pack or proto-revision file, opened on demand
#[derive(Debug)]
pub(crate) struct SharedFile {
    /// A revision contained in the file; other revisions of the same
    /// packed shard may be read through it as well
    revision: Revnum,
    txn: Option<TxnId>,
    packed: bool,
    reader: Option<BufReader<File>>,
}

impl SharedFile {
    pub fn for_revision(revision: Revnum) -> Self {
        Self {
            revision,
            txn: None,
            packed: false,
            reader: None,
        }
    }

    pub fn for_txn(txn: TxnId) -> Self {
        Self {
            revision: txn.revision,
            txn: Some(txn),
            packed: false,
            reader: None,
        }
    }

    pub fn revision(&self) -> Revnum {
        self.revision
    }

    pub fn is_txn(&self) -> bool {
        self.txn.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Open the backing file if that has not happened yet.
    pub fn open(&mut self, fs: &FsFs) -> Result<&mut BufReader<File>> {
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => {
                let file = match &self.txn {
                    Some(txn) => File::open(fs.layout().path_txn_proto_rev(txn))?,
                    None => {
                        let (file, packed) = fs.open_pack_or_rev_file(self.revision)?;
                        self.packed = packed;
                        file
                    }
                };
                BufReader::with_capacity(READ_BUFFER_SIZE, file)
            }
        };
        Ok(self.reader.insert(reader))
    }

    /// Position the file at `offset` within `revision`, opening it if needed.
    ///
    /// `revision` must be the file's own revision or, for pack files,
    /// another revision of the same shard.
    pub fn seek(&mut self, fs: &FsFs, revision: Revnum, offset: u64) -> Result<&mut BufReader<File>> {
        self.open(fs)?;
        let absolute = if self.packed {
            fs.packed_offset(revision)? + offset
        } else {
            offset
        };
        let reader = self.open(fs)?;
        aligned_seek(reader, absolute)?;
        Ok(reader)
    }
}

/// Seek without discarding buffered data when the target is already buffered.
fn aligned_seek(reader: &mut BufReader<File>, offset: u64) -> Result<()> {
    let current = reader.stream_position()?;
    reader.seek_relative(offset as i64 - current as i64)?;
    Ok(())
}

/// The files opened during one read
#[derive(Debug, Default)]
pub(crate) struct FileArena {
    files: Vec<SharedFile>,
}

impl FileArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, file: SharedFile) -> FileSlot {
        self.files.push(file);
        FileSlot(self.files.len() - 1)
    }

    pub fn get(&self, slot: FileSlot) -> &SharedFile {
        &self.files[slot.0]
    }

    pub fn get_mut(&mut self, slot: FileSlot) -> &mut SharedFile {
        &mut self.files[slot.0]
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Number of files currently open
    #[cfg(test)]
    pub fn open_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_open()).count()
    }

    /// Close and forget every file
    pub fn clear(&mut self) {
        self.files.clear();
    }
}
