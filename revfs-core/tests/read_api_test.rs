//! Read API integration tests
//!
//! Builds a small two-revision store by hand and reads it back through the
//! public API only.

use revfs_core::hash::write_hash;
use revfs_core::id::IdPart;
use revfs_core::{
    FsConfig, FsError, FsFs, NodeKind, NodeRevId, NodeRevision, PropertyMap, Representation,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const README: &[u8] = b"Read me first.\nThen read me again.\n";

fn noderev(id: NodeRevId, kind: NodeKind, path: &str) -> NodeRevision {
    NodeRevision {
        id,
        kind,
        predecessor_id: None,
        predecessor_count: 0,
        data_rep: None,
        prop_rep: None,
        created_path: path.to_string(),
        copyfrom: None,
        copyroot: (id.revision().unwrap_or(0), path.to_string()),
        is_fresh_txn_root: false,
        mergeinfo_count: 0,
        has_mergeinfo: false,
    }
}

fn plain_rep(rev_data: &mut Vec<u8>, rev: u64, text: &[u8]) -> Representation {
    let offset = rev_data.len() as u64;
    rev_data.extend_from_slice(b"PLAIN\n");
    rev_data.extend_from_slice(text);
    rev_data.extend_from_slice(b"ENDREP\n");
    Representation::new(rev, offset, text.len() as u64, text.len() as u64, md5::compute(text).0)
}

fn finish_revision(path: &Path, rev: u64, mut data: Vec<u8>, root_offset: u64) {
    let changes_offset = data.len();
    data.extend_from_slice(format!("\n{} {}\n", root_offset, changes_offset).as_bytes());
    fs::write(path.join("revs").join(rev.to_string()), data).unwrap();
    fs::write(path.join("current"), format!("{}\n", rev)).unwrap();
}

/// Create a linear store whose revision 1 holds `/README` with one property.
fn create_store(path: &Path) -> NodeRevId {
    fs::write(path.join("format"), "6\nlayout linear\n").unwrap();
    fs::write(path.join("min-unpacked-rev"), "0\n").unwrap();
    fs::create_dir_all(path.join("revs")).unwrap();

    let root0 = noderev(NodeRevId::rev(IdPart::new(0, 0), IdPart::new(0, 0), 0, 0), NodeKind::Dir, "/");
    finish_revision(path, 0, root0.unparse().into_bytes(), 0);

    let mut data = Vec::new();
    let text_rep = plain_rep(&mut data, 1, README);
    let mut props = PropertyMap::new();
    props.set("svn:mime-type", "text/plain");
    let prop_rep = plain_rep(&mut data, 1, &props.to_hash());

    let file_id = NodeRevId::rev(IdPart::new(0, 2), IdPart::new(0, 0), 1, data.len() as u64);
    let mut file = noderev(file_id, NodeKind::File, "/README");
    file.data_rep = Some(text_rep);
    file.prop_rep = Some(prop_rep);
    data.extend_from_slice(file.unparse().as_bytes());

    let listing = format!("file {}", file_id);
    let dir_rep = plain_rep(&mut data, 1, &write_hash([("README", listing.as_bytes())]));
    let root_offset = data.len() as u64;
    let mut root = noderev(NodeRevId::rev(IdPart::new(0, 0), IdPart::new(0, 0), 1, root_offset), NodeKind::Dir, "/");
    root.predecessor_id = Some(root0.id);
    root.predecessor_count = 1;
    root.data_rep = Some(dir_rep);
    data.extend_from_slice(root.unparse().as_bytes());

    finish_revision(path, 1, data, root_offset);
    file_id
}

#[test]
fn test_read_file_through_root() {
    let temp_dir = TempDir::new().unwrap();
    let file_id = create_store(temp_dir.path());

    let fs = FsFs::open(temp_dir.path()).unwrap();
    assert_eq!(fs.youngest_rev(), 1);
    assert_eq!(fs.format(), 6);

    let root = fs.get_node_revision(&fs.rev_get_root(1).unwrap()).unwrap();
    assert_eq!(root.kind, NodeKind::Dir);
    assert_eq!(root.predecessor_count, 1);

    let entry = fs.rep_contents_dir_entry(&root, "README").unwrap().unwrap();
    assert_eq!(entry.id, file_id);
    assert_eq!(entry.kind, NodeKind::File);

    let file = fs.get_node_revision(&entry.id).unwrap();
    let text = fs.get_file_contents(&file).unwrap().read_all().unwrap();
    assert_eq!(&text[..], README);

    let props = fs.get_proplist(&file).unwrap();
    assert_eq!(props.get_str("svn:mime-type"), Some("text/plain"));
}

#[test]
fn test_content_stream_implements_read() {
    let temp_dir = TempDir::new().unwrap();
    let file_id = create_store(temp_dir.path());
    let fs = FsFs::open(temp_dir.path()).unwrap();
    let file = fs.get_node_revision(&file_id).unwrap();

    let mut text = String::new();
    std::io::Read::read_to_string(&mut fs.get_file_contents(&file).unwrap(), &mut text).unwrap();
    assert_eq!(text.as_bytes(), README);
}

#[test]
fn test_saved_config_is_used() {
    let temp_dir = TempDir::new().unwrap();
    create_store(temp_dir.path());

    let config = FsConfig {
        max_chain_length: 1,
        ..FsConfig::default()
    };
    config.save(temp_dir.path()).unwrap();

    let fs = FsFs::open(temp_dir.path()).unwrap();
    assert_eq!(fs.config().max_chain_length, 1);
}

#[test]
fn test_future_revision_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    create_store(temp_dir.path());
    let fs = FsFs::open(temp_dir.path()).unwrap();

    assert!(matches!(fs.rev_get_root(2), Err(FsError::NoSuchRevision(2))));
}

#[test]
fn test_unsupported_format() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("format"), "7\n").unwrap();
    fs::write(temp_dir.path().join("current"), "0\n").unwrap();

    assert!(matches!(FsFs::open(temp_dir.path()), Err(FsError::UnsupportedFormat(7))));
}
