//! On-disk store fixtures for tests
//!
//! [`RepoBuilder`] lays out a store directory; [`RevFile`] assembles the
//! bytes of one revision (or proto-revision) file item by item.

use crate::changes::Change;
use crate::delta_stream::compute_windows;
use crate::id::{IdPart, NodeRevId, Revnum, TxnId};
use crate::layout::{FormatInfo, Layout};
use crate::noderev::{NodeKind, NodeRevision};
use crate::observe::{Access, AccessObserver, ItemKind};
use crate::representation::Representation;
use crate::svndiff::{OpKind, Window};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

/// Window size of fixture deltas; small enough to get several windows per text
pub(crate) const TEST_WINDOW_SIZE: usize = 64;

pub(crate) fn delta_windows(target: &[u8], source: Option<&[u8]>, window_size: usize) -> Vec<Window> {
    compute_windows(target, source, window_size)
}

fn encode_varint(out: &mut Vec<u8>, mut value: u64) {
    let mut bytes = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        bytes.push(0x80 | (value & 0x7f) as u8);
        value >>= 7;
    }
    bytes.reverse();
    out.extend(bytes);
}

fn compress_section(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint(&mut out, data.len() as u64);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    let compressed = encoder.finish().unwrap();
    if compressed.len() < data.len() {
        out.extend(compressed);
    } else {
        out.extend_from_slice(data);
    }
    out
}

/// Encode one svndiff window
pub(crate) fn encode_window(window: &Window, version: u8) -> Vec<u8> {
    let mut ins = Vec::new();
    for op in &window.ops {
        let action = match op.kind {
            OpKind::Source => 0u8,
            OpKind::Target => 1,
            OpKind::New => 2,
        } << 6;
        if op.length > 0 && op.length < 64 {
            ins.push(action | op.length as u8);
        } else {
            ins.push(action);
            encode_varint(&mut ins, op.length as u64);
        }
        if op.kind != OpKind::New {
            encode_varint(&mut ins, op.offset as u64);
        }
    }
    let (ins, new) = if version == 1 {
        (compress_section(&ins), compress_section(&window.new_data))
    } else {
        (ins, window.new_data.to_vec())
    };

    let mut out = Vec::new();
    for value in [
        window.sview_offset,
        window.sview_len as u64,
        window.tview_len as u64,
        ins.len() as u64,
        new.len() as u64,
    ] {
        encode_varint(&mut out, value);
    }
    out.extend(ins);
    out.extend(new);
    out
}

/// Delta body: marker plus encoded windows
pub(crate) fn delta_body(windows: &[Window], version: u8) -> Vec<u8> {
    let mut body = vec![b'S', b'V', b'N', version];
    for window in windows {
        body.extend(encode_window(window, version));
    }
    body
}

pub(crate) fn committed_id(node: u64, copy: u64, revision: Revnum, offset: u64) -> NodeRevId {
    NodeRevId::rev(IdPart::new(0, node), IdPart::new(0, copy), revision, offset)
}

pub(crate) fn node(id: NodeRevId, kind: NodeKind, path: &str, data_rep: Option<Representation>) -> NodeRevision {
    NodeRevision {
        id,
        kind,
        predecessor_id: None,
        predecessor_count: 0,
        data_rep,
        prop_rep: None,
        created_path: path.to_string(),
        copyfrom: None,
        copyroot: (id.revision().unwrap_or(0), path.to_string()),
        is_fresh_txn_root: false,
        mergeinfo_count: 0,
        has_mergeinfo: false,
    }
}

/// Bytes of one revision or proto-revision file
pub(crate) struct RevFile {
    rev: Revnum,
    txn: Option<TxnId>,
    data: Vec<u8>,
    window_size: usize,
    version: u8,
}

impl RevFile {
    pub fn new(rev: Revnum) -> Self {
        Self {
            rev,
            txn: None,
            data: Vec::new(),
            window_size: TEST_WINDOW_SIZE,
            version: 0,
        }
    }

    /// Proto-revision file of `txn`
    pub fn for_txn(txn: TxnId) -> Self {
        Self {
            rev: 0,
            txn: Some(txn),
            ..Self::new(0)
        }
    }

    pub fn svndiff_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn offset(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn pad_to(&mut self, offset: u64) {
        assert!(offset >= self.offset(), "cannot pad backwards");
        self.data.resize(offset as usize, b' ');
    }

    /// Append arbitrary bytes, returning their offset.
    pub fn raw(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.offset();
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Append a representation with an arbitrary header and body.
    pub fn raw_rep(&mut self, header: &str, body: &[u8], text: &[u8]) -> Representation {
        let offset = self.offset();
        self.data.extend_from_slice(header.as_bytes());
        self.data.extend_from_slice(body);
        self.data.extend_from_slice(b"ENDREP\n");
        Representation {
            txn_id: self.txn,
            ..Representation::new(self.rev, offset, body.len() as u64, text.len() as u64, md5::compute(text).0)
        }
    }

    pub fn plain(&mut self, text: &[u8]) -> Representation {
        self.raw_rep("PLAIN\n", text, text)
    }

    pub fn self_delta(&mut self, text: &[u8]) -> Representation {
        let windows = delta_windows(text, None, self.window_size);
        let body = delta_body(&windows, self.version);
        self.raw_rep("DELTA\n", &body, text)
    }

    /// Delta of `text` against `base`, whose content is `base_text`.
    pub fn delta(&mut self, text: &[u8], base: &Representation, base_text: &[u8]) -> Representation {
        let windows = delta_windows(text, Some(base_text), self.window_size);
        let body = delta_body(&windows, self.version);
        let header = format!("DELTA {} {} {}\n", base.revision, base.offset, base.size);
        self.raw_rep(&header, &body, text)
    }

    /// Append a node-revision, returning its offset.
    pub fn noderev(&mut self, noderev: &NodeRevision) -> u64 {
        let offset = self.offset();
        self.data.extend_from_slice(noderev.unparse().as_bytes());
        offset
    }

    /// ID of a committed node whose header is appended next
    pub fn next_id(&self, node: u64, copy: u64) -> NodeRevId {
        committed_id(node, copy, self.rev, self.offset())
    }
}

/// A store directory under construction
pub(crate) struct RepoBuilder {
    dir: TempDir,
    layout: Layout,
    youngest: Revnum,
}

impl RepoBuilder {
    pub fn new(format: u32, shard_size: Option<u64>) -> Self {
        let dir = TempDir::new().unwrap();
        let mut text = format!("{}\n", format);
        match shard_size {
            Some(n) => text.push_str(&format!("layout sharded {}\n", n)),
            None if format >= 3 => text.push_str("layout linear\n"),
            None => {}
        }
        fs::write(dir.path().join("format"), &text).unwrap();
        fs::write(dir.path().join("current"), "0\n").unwrap();
        if format >= 4 {
            fs::write(dir.path().join("min-unpacked-rev"), "0\n").unwrap();
        }
        fs::create_dir_all(dir.path().join("revs")).unwrap();

        let layout = Layout::new(dir.path(), FormatInfo::parse(&text).unwrap());
        Self {
            dir,
            layout,
            youngest: 0,
        }
    }

    pub fn linear() -> Self {
        Self::new(6, None)
    }

    pub fn sharded(shard_size: u64) -> Self {
        Self::new(6, Some(shard_size))
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Finish `file` with its changed paths and trailer and write it out.
    pub fn commit(&mut self, mut file: RevFile, root_offset: u64, changes: &[Change]) {
        let changes_offset = file.offset();
        for change in changes {
            file.data.extend_from_slice(change.unparse().as_bytes());
        }
        file.data
            .extend_from_slice(format!("\n{} {}\n", root_offset, changes_offset).as_bytes());

        let path = self.layout.path_rev(file.rev);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, &file.data).unwrap();
        self.set_youngest(self.youngest.max(file.rev));
    }

    /// Commit a revision holding nothing but an empty root directory.
    pub fn empty_revision(&mut self, rev: Revnum) {
        let mut file = RevFile::new(rev);
        let root = node(file.next_id(0, 0), NodeKind::Dir, "/", None);
        let offset = file.noderev(&root);
        self.commit(file, offset, &[]);
    }

    pub fn set_youngest(&mut self, rev: Revnum) {
        self.youngest = rev;
        fs::write(self.layout.path_current(), format!("{}\n", rev)).unwrap();
    }

    /// Move every revision of `shard` into its pack file.
    pub fn pack_shard(&self, shard: u64) {
        let size = self.layout.max_files_per_dir();
        let mut pack = Vec::new();
        let mut manifest = String::new();
        for rev in shard * size..(shard + 1) * size {
            manifest.push_str(&format!("{}\n", pack.len()));
            pack.extend(fs::read(self.layout.path_rev(rev)).unwrap());
        }
        fs::create_dir_all(self.layout.path_pack_dir(shard)).unwrap();
        fs::write(self.layout.path_pack(shard), pack).unwrap();
        fs::write(self.layout.path_manifest(shard), manifest).unwrap();
        fs::remove_dir_all(self.layout.path_rev_shard(shard)).unwrap();
        fs::write(
            self.layout.path_min_unpacked_rev(),
            format!("{}\n", (shard + 1) * size),
        )
        .unwrap();
    }

    pub fn write_txn_proto_rev(&self, file: &RevFile) {
        let txn = file.txn.expect("not a transaction file");
        let path = self.layout.path_txn_proto_rev(&txn);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, &file.data).unwrap();
    }

    pub fn write_txn_noderev(&self, noderev: &NodeRevision) {
        let path = self.layout.path_txn_node_rev(&noderev.id).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, noderev.unparse()).unwrap();
    }

    pub fn write_txn_props(&self, id: &NodeRevId, data: &[u8]) {
        fs::write(self.layout.path_txn_node_props(id).unwrap(), data).unwrap();
    }

    pub fn write_txn_children(&self, id: &NodeRevId, data: &[u8]) {
        fs::write(self.layout.path_txn_node_children(id).unwrap(), data).unwrap();
    }
}

/// Records every access for later inspection
#[derive(Default)]
pub(crate) struct RecordingObserver {
    accesses: Mutex<Vec<Access>>,
}

impl RecordingObserver {
    pub fn accesses(&self) -> Vec<Access> {
        self.accesses.lock().unwrap().clone()
    }

    pub fn count(&self, kind: ItemKind, cached: bool) -> usize {
        self.accesses()
            .iter()
            .filter(|a| a.kind == kind && a.cached == cached)
            .count()
    }

    pub fn clear(&self) {
        self.accesses.lock().unwrap().clear();
    }
}

impl AccessObserver for RecordingObserver {
    fn on_access(&self, access: &Access) {
        self.accesses.lock().unwrap().push(*access);
    }
}
