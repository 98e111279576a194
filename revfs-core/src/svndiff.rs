//! svndiff delta windows
//!
//! A delta body starts with the magic `SVN<version>` and continues with a
//! sequence of windows.  Each window rebuilds one target view from a
//! source view, its own earlier output and a block of new data:
//!
//! ```text
//! varint sview_offset
//! varint sview_len
//! varint tview_len
//! varint ins_len
//! varint new_len
//! ins_len bytes of instructions
//! new_len bytes of new data
//! ```
//!
//! Version 1 stores each of the two sections as `varint(original_len)`
//! followed by zlib data, or the raw data if compression did not help.

use crate::error::{FsError, Result};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use std::io::{Read, Seek, SeekFrom};

/// Magic prefix of every delta body
pub const SVNDIFF_MAGIC: &[u8; 3] = b"SVN";

/// Target window size used when producing deltas
pub const DELTA_WINDOW_SIZE: usize = 102_400;

const MAX_ENCODED_INT_LEN: usize = 10;
const MAX_INSTRUCTION_LEN: usize = 2 * MAX_ENCODED_INT_LEN + 1;
const MAX_INSTRUCTION_SECTION_LEN: u64 = (DELTA_WINDOW_SIZE * MAX_INSTRUCTION_LEN) as u64;

/// Where a copy instruction takes its bytes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Source,
    Target,
    New,
}

/// One delta instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Op {
    pub kind: OpKind,
    /// Offset into the source or target view; unused for `New`
    pub offset: usize,
    pub length: usize,
}

impl Op {
    pub fn source(offset: usize, length: usize) -> Self {
        Self { kind: OpKind::Source, offset, length }
    }

    pub fn target(offset: usize, length: usize) -> Self {
        Self { kind: OpKind::Target, offset, length }
    }

    pub fn new_data(length: usize) -> Self {
        Self { kind: OpKind::New, offset: 0, length }
    }
}

/// A decoded delta window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub sview_offset: u64,
    pub sview_len: usize,
    pub tview_len: usize,
    /// Number of instructions reading from the source view
    pub src_ops: usize,
    pub ops: Vec<Op>,
    pub new_data: Bytes,
}

impl Window {
    pub fn new(sview_offset: u64, sview_len: usize, tview_len: usize, ops: Vec<Op>, new_data: Bytes) -> Self {
        let src_ops = ops.iter().filter(|op| op.kind == OpKind::Source).count();
        Self {
            sview_offset,
            sview_len,
            tview_len,
            src_ops,
            ops,
            new_data,
        }
    }

    /// Rebuild the target view from `source`, the window's source view.
    pub fn apply(&self, source: Option<&[u8]>) -> Result<Vec<u8>> {
        let length_corrupt = || FsError::corrupt("svndiff window length is corrupt");
        let source = source.unwrap_or(&[]);
        let mut out: Vec<u8> = Vec::with_capacity(self.tview_len);
        let mut npos = 0usize;

        for op in &self.ops {
            if out.len() + op.length > self.tview_len {
                return Err(length_corrupt());
            }
            match op.kind {
                OpKind::Source => {
                    let bytes = op
                        .offset
                        .checked_add(op.length)
                        .and_then(|end| source.get(op.offset..end))
                        .ok_or_else(|| FsError::corrupt("svndiff source copy beyond the source view"))?;
                    out.extend_from_slice(bytes);
                }
                OpKind::Target => {
                    if op.offset >= out.len() {
                        return Err(FsError::corrupt("svndiff target copy starts beyond the target view"));
                    }
                    if op.offset + op.length <= out.len() {
                        out.extend_from_within(op.offset..op.offset + op.length);
                    } else {
                        // overlapping copy repeats the pattern
                        for i in op.offset..op.offset + op.length {
                            let byte = out[i];
                            out.push(byte);
                        }
                    }
                }
                OpKind::New => {
                    let bytes = self
                        .new_data
                        .get(npos..npos + op.length)
                        .ok_or_else(|| FsError::corrupt("svndiff new data section too short"))?;
                    out.extend_from_slice(bytes);
                    npos += op.length;
                }
            }
        }

        if out.len() != self.tview_len {
            return Err(length_corrupt());
        }
        Ok(out)
    }
}

/// Check the 4-byte delta magic and return the svndiff version.
pub fn parse_magic(buf: &[u8; 4]) -> Result<u8> {
    if &buf[..3] != SVNDIFF_MAGIC {
        return Err(FsError::corrupt("Malformed svndiff data in representation"));
    }
    Ok(buf[3])
}

struct WindowHeader {
    sview_offset: u64,
    sview_len: u64,
    tview_len: u64,
    ins_len: u64,
    new_len: u64,
}

fn check_version(version: u8) -> Result<()> {
    match version {
        0 | 1 => Ok(()),
        v => Err(FsError::corrupt(format!("Unsupported svndiff version {}", v))),
    }
}

fn eof_to_corrupt(err: std::io::Error) -> FsError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        FsError::corrupt("Unexpected end of svndiff input")
    } else {
        FsError::Io(err)
    }
}

fn read_varint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut value = 0u64;
    for _ in 0..MAX_ENCODED_INT_LEN {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).map_err(eof_to_corrupt)?;
        if value > u64::MAX >> 7 {
            break;
        }
        value = (value << 7) | u64::from(byte[0] & 0x7f);
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(FsError::corrupt("Invalid size encoding in svndiff data"))
}

fn decode_varint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut slice = data.get(*pos..).unwrap_or(&[]);
    let before = slice.len();
    let value = read_varint(&mut slice)?;
    *pos += before - slice.len();
    Ok(value)
}

fn read_window_header<R: Read>(reader: &mut R) -> Result<WindowHeader> {
    let header = WindowHeader {
        sview_offset: read_varint(reader)?,
        sview_len: read_varint(reader)?,
        tview_len: read_varint(reader)?,
        ins_len: read_varint(reader)?,
        new_len: read_varint(reader)?,
    };

    let window = DELTA_WINDOW_SIZE as u64;
    if header.tview_len > window
        || header.sview_len > window
        || header.new_len > window + MAX_ENCODED_INT_LEN as u64
        || header.ins_len > MAX_INSTRUCTION_SECTION_LEN
    {
        return Err(FsError::corrupt("Svndiff contains a too-large window"));
    }
    if header.sview_offset.checked_add(header.sview_len).is_none() {
        return Err(FsError::corrupt("Svndiff contains corrupt window header"));
    }
    Ok(header)
}

/// Undo version 1 section compression.
fn decode_section(data: Vec<u8>, version: u8, limit: u64) -> Result<Vec<u8>> {
    if version == 0 {
        return Ok(data);
    }
    let mut pos = 0;
    let original_len = decode_varint(&data, &mut pos)?;
    if original_len > limit {
        return Err(FsError::corrupt("Decompression of svndiff data failed: size too large"));
    }
    let payload = &data[pos..];
    if payload.len() as u64 == original_len {
        return Ok(payload.to_vec());
    }

    let mut out = Vec::with_capacity(original_len as usize);
    ZlibDecoder::new(payload)
        .take(original_len + 1)
        .read_to_end(&mut out)
        .map_err(|e| FsError::corrupt(format!("Decompression of svndiff data failed: {}", e)))?;
    if out.len() as u64 != original_len {
        return Err(FsError::corrupt(
            "Size of uncompressed data does not match stored original length",
        ));
    }
    Ok(out)
}

fn decode_instructions(data: &[u8], header: &WindowHeader, new_len: usize) -> Result<Vec<Op>> {
    let mut ops = Vec::new();
    let mut pos = 0usize;
    let mut tpos = 0usize;
    let mut npos = 0usize;
    let tview_len = header.tview_len as usize;
    let sview_len = header.sview_len as usize;

    while pos < data.len() {
        let byte = data[pos];
        pos += 1;
        let mut length = (byte & 0x3f) as u64;
        if length == 0 {
            length = decode_varint(data, &mut pos)?;
        }
        let length = length as usize;
        let op = match byte >> 6 {
            0 => {
                let offset = decode_varint(data, &mut pos)? as usize;
                if offset.checked_add(length).is_none_or(|end| end > sview_len) {
                    return Err(FsError::corrupt(format!(
                        "Invalid diff stream: insn {} reads beyond the source view",
                        ops.len()
                    )));
                }
                Op::source(offset, length)
            }
            1 => {
                let offset = decode_varint(data, &mut pos)? as usize;
                if offset >= tpos {
                    return Err(FsError::corrupt(format!(
                        "Invalid diff stream: insn {} starts beyond the target view position",
                        ops.len()
                    )));
                }
                Op::target(offset, length)
            }
            2 => {
                if npos.checked_add(length).is_none_or(|end| end > new_len) {
                    return Err(FsError::corrupt(format!(
                        "Invalid diff stream: insn {} overflows the new data section",
                        ops.len()
                    )));
                }
                npos += length;
                Op::new_data(length)
            }
            _ => return Err(FsError::corrupt("Invalid diff stream: insn has invalid action")),
        };
        tpos = match tpos.checked_add(length) {
            Some(end) if end <= tview_len => end,
            _ => {
                return Err(FsError::corrupt(format!(
                    "Invalid diff stream: insn {} overflows the target view",
                    ops.len()
                )));
            }
        };
        ops.push(op);
    }

    if tpos != tview_len {
        return Err(FsError::corrupt("Delta does not fill the target window"));
    }
    if npos != new_len {
        return Err(FsError::corrupt("Delta does not contain enough new data"));
    }
    Ok(ops)
}

/// Read the next window from `reader`.
pub fn read_window<R: Read>(reader: &mut R, version: u8) -> Result<Window> {
    check_version(version)?;
    let header = read_window_header(reader)?;

    let mut ins = vec![0u8; header.ins_len as usize];
    reader.read_exact(&mut ins).map_err(eof_to_corrupt)?;
    let mut new = vec![0u8; header.new_len as usize];
    reader.read_exact(&mut new).map_err(eof_to_corrupt)?;

    let ins = decode_section(ins, version, MAX_INSTRUCTION_SECTION_LEN)?;
    let new = decode_section(new, version, DELTA_WINDOW_SIZE as u64)?;
    let ops = decode_instructions(&ins, &header, new.len())?;

    Ok(Window::new(
        header.sview_offset,
        header.sview_len as usize,
        header.tview_len as usize,
        ops,
        Bytes::from(new),
    ))
}

/// Skip over the next window without decoding it.
pub fn skip_window<R: Read + Seek>(reader: &mut R, version: u8) -> Result<()> {
    check_version(version)?;
    let header = read_window_header(reader)?;
    let skip = header.ins_len + header.new_len;
    reader.seek(SeekFrom::Current(skip as i64))?;
    Ok(())
}
