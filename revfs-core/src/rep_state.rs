//! Read cursor over one representation of a delta chain

use crate::cache::{CachedWindow, RepHeaderKey, RepKey, WindowKey, cache_get, cache_set};
use crate::error::{FsError, Result};
use crate::file::{FileArena, FileSlot, SharedFile};
use crate::fs::FsFs;
use crate::id::{Revnum, TxnId};
use crate::observe::ItemKind;
use crate::representation::{RepHeader, RepKind, Representation};
use crate::svndiff::{self, Window};
use std::io::{Read, Seek};
use std::sync::Arc;

/// Length of the `SVN<version>` marker in front of the first window
const SVNDIFF_MARKER_LEN: u64 = 4;

fn eof_is_corrupt(msg: &'static str) -> impl FnOnce(std::io::Error) -> FsError {
    move |err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            FsError::corrupt(msg)
        } else {
            FsError::Io(err)
        }
    }
}

/// Position within one representation body.
///
/// Offsets are relative to the start of the revision (or the proto-rev
/// file for transaction reps); `current` counts bytes of the body
/// consumed so far, including the svndiff marker.
#[derive(Debug)]
pub(crate) struct RepState {
    pub file: FileSlot,
    pub revision: Revnum,
    pub txn: Option<TxnId>,
    /// Offset of the representation header
    pub offset: u64,
    pub header_size: u64,
    pub size: u64,
    pub current: u64,
    /// Index of the window `current` points to
    pub chunk_index: u64,
    start: Option<u64>,
    ver: Option<u8>,
}

impl RepState {
    pub fn is_txn(&self) -> bool {
        self.txn.is_some()
    }

    /// Key of this representation in the shared caches, `None` inside transactions
    pub fn rep_key(&self) -> Option<RepKey> {
        (!self.is_txn()).then_some(RepKey {
            revision: self.revision,
            offset: self.offset,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.current == self.size
    }

    fn observed_revision(&self) -> Option<Revnum> {
        (!self.is_txn()).then_some(self.revision)
    }

    fn start(&mut self) -> u64 {
        *self.start.get_or_insert(self.offset + self.header_size)
    }

    /// Read the svndiff version on first use.
    fn diff_version(&mut self, fs: &FsFs, files: &mut FileArena) -> Result<u8> {
        if let Some(ver) = self.ver {
            return Ok(ver);
        }
        let start = self.start();
        let reader = files.get_mut(self.file).seek(fs, self.revision, start)?;
        let mut marker = [0u8; 4];
        reader
            .read_exact(&mut marker)
            .map_err(eof_is_corrupt("Malformed svndiff data in representation"))?;
        let ver = svndiff::parse_magic(&marker)?;

        self.ver = Some(ver);
        self.chunk_index = 0;
        self.current = SVNDIFF_MARKER_LEN;
        Ok(ver)
    }

    /// Read window number `this_chunk`, skipping windows as needed.
    pub fn read_delta_window(&mut self, fs: &FsFs, files: &mut FileArena, this_chunk: u64) -> Result<Arc<Window>> {
        debug_assert!(self.chunk_index <= this_chunk);

        let key = self.rep_key().map(|rep| WindowKey {
            revision: rep.revision,
            offset: rep.offset,
            chunk_index: this_chunk,
        });
        if let Some(cached) = key.and_then(|key| cache_get(&fs.caches().txdelta_window, &key)) {
            fs.observe(self.observed_revision(), self.offset, ItemKind::DeltaWindow, true);
            self.current = cached.end_offset;
            self.chunk_index = this_chunk;
            return Ok(cached.window);
        }

        let ver = self.diff_version(fs, files)?;
        let start = self.start();
        let reader = files.get_mut(self.file).seek(fs, self.revision, start + self.current)?;
        let origin = reader.stream_position()? - self.current;

        while self.chunk_index < this_chunk {
            svndiff::skip_window(reader, ver)?;
            self.chunk_index += 1;
            self.current = reader.stream_position()? - origin;
            if self.current >= self.size {
                return Err(FsError::corrupt(
                    "Reading one svndiff window read beyond the end of the representation",
                ));
            }
        }

        let window = Arc::new(svndiff::read_window(reader, ver)?);
        self.current = reader.stream_position()? - origin;
        if self.current > self.size {
            return Err(FsError::corrupt(
                "Reading one svndiff window read beyond the end of the representation",
            ));
        }
        fs.observe(self.observed_revision(), self.offset, ItemKind::DeltaWindow, false);

        if let Some(key) = key {
            cache_set(
                &fs.caches().txdelta_window,
                key,
                CachedWindow {
                    window: window.clone(),
                    end_offset: self.current,
                },
            );
        }
        Ok(window)
    }

    /// Read `len` plain bytes starting `body_offset` bytes into the body.
    pub fn read_plain(&mut self, fs: &FsFs, files: &mut FileArena, body_offset: u64, len: usize) -> Result<Vec<u8>> {
        if body_offset + len as u64 > self.size {
            return Err(FsError::corrupt(
                "Reading plain data beyond the end of the representation",
            ));
        }
        let start = self.start();
        let reader = files.get_mut(self.file).seek(fs, self.revision, start + body_offset)?;
        let mut data = vec![0u8; len];
        reader
            .read_exact(&mut data)
            .map_err(eof_is_corrupt("Unexpected end of plain representation data"))?;
        self.current = body_offset + len as u64;
        fs.observe(self.observed_revision(), self.offset, ItemKind::PlainContents, false);
        Ok(data)
    }
}

/// Create the read state of `rep` and fetch its header.
///
/// `hint` names the file used for the previous link of a chain; it is
/// reused when both links live in the same packed shard and replaced by
/// the new file otherwise.
pub(crate) fn create_rep_state(
    fs: &FsFs,
    rep: &Representation,
    files: &mut FileArena,
    hint: &mut Option<FileSlot>,
) -> Result<(RepState, RepHeader)> {
    create_rep_state_body(fs, rep, files, hint).map_err(|e| e.in_representation(|| rep.unparse()))
}

fn create_rep_state_body(
    fs: &FsFs,
    rep: &Representation,
    files: &mut FileArena,
    hint: &mut Option<FileSlot>,
) -> Result<(RepState, RepHeader)> {
    let min_unpacked_rev = fs.min_unpacked_rev();
    let reuse = hint.filter(|slot| {
        let file = files.get(*slot);
        !rep.is_txn()
            && file.is_open()
            && !file.is_txn()
            && fs
                .layout()
                .can_share_file(file.revision(), rep.revision, min_unpacked_rev)
    });

    let slot = match reuse {
        Some(slot) => slot,
        None => {
            let file = match rep.txn_id {
                Some(txn) => SharedFile::for_txn(txn),
                None => SharedFile::for_revision(rep.revision),
            };
            let slot = files.push(file);
            *hint = Some(slot);
            slot
        }
    };

    let header_key = (!rep.is_txn()).then(|| RepHeaderKey {
        revision: rep.revision,
        is_packed: fs.is_packed_rev(rep.revision),
        offset: rep.offset,
    });
    let cached = header_key.and_then(|key| cache_get(&fs.caches().rep_header, &key));
    let observed_revision = (!rep.is_txn()).then_some(rep.revision);

    let header = match cached {
        Some(header) => {
            fs.observe(observed_revision, rep.offset, ItemKind::RepHeader, true);
            header
        }
        None => {
            let reader = files.get_mut(slot).seek(fs, rep.revision, rep.offset)?;
            let header = RepHeader::read(reader)?;
            fs.observe(observed_revision, rep.offset, ItemKind::RepHeader, false);
            if let Some(key) = header_key {
                cache_set(&fs.caches().rep_header, key, header);
            }
            header
        }
    };

    let current = match header.kind {
        RepKind::Plain => 0,
        _ => SVNDIFF_MARKER_LEN,
    };
    let state = RepState {
        file: slot,
        revision: rep.revision,
        txn: rep.txn_id,
        offset: rep.offset,
        header_size: header.header_size,
        size: rep.size,
        current,
        chunk_index: 0,
        start: None,
        ver: None,
    };
    Ok((state, header))
}
