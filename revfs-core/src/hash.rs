//! Serialized hash dumps
//!
//! Property lists and directory listings are stored as
//!
//! ```text
//! K <keylen>
//! <key>
//! V <vallen>
//! <value>
//! ...
//! END
//! ```
//!
//! Mutable transaction files append incremental entries after the base
//! dump, where `D <keylen>\n<key>\n` deletes a key.

use crate::error::{FsError, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{BufRead, Read};

/// Terminator line of a hash dump
const HASH_TERMINATOR: &str = "END";

fn malformed() -> FsError {
    FsError::corrupt("Malformed serialized hash data")
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.pop() != Some(b'\n') {
        return Err(malformed());
    }
    String::from_utf8(line).map(Some).map_err(|_| malformed())
}

/// Read `len` bytes followed by a newline.
fn read_counted<R: BufRead>(reader: &mut R, len: &str) -> Result<Vec<u8>> {
    let len: u64 = len.parse().map_err(|_| malformed())?;
    let wanted = len.checked_add(1).ok_or_else(malformed)?;
    let mut data = Vec::new();
    if Read::take(&mut *reader, wanted).read_to_end(&mut data)? as u64 != wanted {
        return Err(malformed());
    }
    if data.pop() != Some(b'\n') {
        return Err(malformed());
    }
    Ok(data)
}

/// Read a hash dump into `hash`.
///
/// With `incremental` set, `D` deletions are accepted and EOF is a valid
/// end of input; otherwise the dump must end with `END`.  A file holding a
/// base dump plus appended changes is read with one call of each kind.
pub fn read_hash_into<R: BufRead>(
    reader: &mut R,
    hash: &mut BTreeMap<String, Bytes>,
    incremental: bool,
) -> Result<()> {
    loop {
        let Some(line) = read_line(reader)? else {
            return if incremental { Ok(()) } else { Err(malformed()) };
        };
        if line == HASH_TERMINATOR {
            return Ok(());
        }

        if let Some(len) = line.strip_prefix("K ") {
            let key = String::from_utf8(read_counted(reader, len)?).map_err(|_| malformed())?;
            let value_line = read_line(reader)?.ok_or_else(malformed)?;
            let len = value_line.strip_prefix("V ").ok_or_else(malformed)?;
            let value = read_counted(reader, len)?;
            hash.insert(key, Bytes::from(value));
        } else if let (true, Some(len)) = (incremental, line.strip_prefix("D ")) {
            let key = String::from_utf8(read_counted(reader, len)?).map_err(|_| malformed())?;
            hash.remove(&key);
        } else {
            return Err(malformed());
        }
    }
}

/// Read a complete, `END`-terminated hash dump.
pub fn read_hash<R: BufRead>(reader: &mut R) -> Result<BTreeMap<String, Bytes>> {
    let mut hash = BTreeMap::new();
    read_hash_into(reader, &mut hash, false)?;
    Ok(hash)
}

/// Serialize `hash` as an `END`-terminated dump.
pub fn write_hash<'a, I, V>(entries: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, V)>,
    V: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for (key, value) in entries {
        let value = value.as_ref();
        out.extend_from_slice(format!("K {}\n{}\nV {}\n", key.len(), key, value.len()).as_bytes());
        out.extend_from_slice(value);
        out.push(b'\n');
    }
    out.extend_from_slice(b"END\n");
    out
}
