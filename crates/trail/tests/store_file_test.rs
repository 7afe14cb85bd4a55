//! Store file validation tests: corruption, truncation and format checks.

use alopex_trail::store::file::{TrailBlock, FOOTER_SIZE, HEADER_SIZE, STORE_MAGIC};
use alopex_trail::{StoreConfig, TrailBuilder, TrailError, TrailStore};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const USER1: &str = "771799eb-6a0d-4555-9917-0a5d449b35ab";
const USER2: &str = "8ff9b509-84a6-4888-8215-e66d7aefd1bc";

fn build(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("store.trail");
    let mut builder = TrailBuilder::open(&path, &["action", "page"]).unwrap();
    for i in 0..20u64 {
        builder.add(USER1, 1_000 + i * 7, &["view", "home"]).unwrap();
        builder.add(USER2, 2_000 + i * 3, &["click", "cart"]).unwrap();
    }
    builder.close().unwrap();
    path
}

fn overwrite(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

fn open_failure_source(result: alopex_trail::Result<TrailStore>) -> TrailError {
    match result {
        Err(TrailError::OpenFailure { source, .. }) => *source,
        Err(other) => panic!("expected OpenFailure, got {:?}", other),
        Ok(_) => panic!("expected OpenFailure, store opened"),
    }
}

#[test]
fn test_header_magic() {
    let temp_dir = TempDir::new().unwrap();
    let path = build(&temp_dir);

    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], &STORE_MAGIC);
    let footer = &bytes[bytes.len() - FOOTER_SIZE..];
    assert_eq!(&footer[52..56], b"LRTA");

    overwrite(&path, 0, b"XXXX");
    let source = open_failure_source(TrailStore::open(&path));
    assert!(matches!(source, TrailError::InvalidMagic(m) if &m == b"XXXX"));
}

#[test]
fn test_flipped_block_byte_fails_file_checksum() {
    let temp_dir = TempDir::new().unwrap();
    let path = build(&temp_dir);

    // min_ts of the first block
    overwrite(&path, HEADER_SIZE as u64 + 32, &[0xff]);
    let source = open_failure_source(TrailStore::open(&path));
    assert!(matches!(source, TrailError::ChecksumMismatch { .. }));
}

#[test]
fn test_block_checksum_caught_during_iteration() {
    let temp_dir = TempDir::new().unwrap();
    let path = build(&temp_dir);
    overwrite(&path, HEADER_SIZE as u64 + 32, &[0xff]);

    let config = StoreConfig::default().with_verify_checksum(false);
    let store = TrailStore::open_with_config(&path, config).unwrap();

    let mut cursor = store.cursor_for(0).unwrap();
    match cursor.next_event() {
        Err(TrailError::IterationFailure { ordinal, source }) => {
            assert_eq!(ordinal, 0);
            assert!(matches!(*source, TrailError::ChecksumMismatch { .. }));
        }
        other => panic!("expected IterationFailure, got {:?}", other.map(|e| e.cloned())),
    }
    assert!(cursor.next_event().unwrap().is_none());

    // The second trail is untouched.
    let events: Vec<_> = store.cursor_for(1).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(events.len(), 20);
}

#[test]
fn test_iterator_stops_after_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = build(&temp_dir);
    overwrite(&path, HEADER_SIZE as u64 + 32, &[0xff]);

    let config = StoreConfig::default().with_verify_checksum(false);
    let store = TrailStore::open_with_config(&path, config).unwrap();

    let results: Vec<_> = store.cursor_for(0).unwrap().collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}

#[test]
fn test_truncated_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = build(&temp_dir);

    let len = fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 10).unwrap();
    drop(file);

    assert!(matches!(
        TrailStore::open(&path),
        Err(TrailError::OpenFailure { .. })
    ));

    fs::write(&path, b"tiny").unwrap();
    let source = open_failure_source(TrailStore::open(&path));
    assert!(matches!(source, TrailError::Corrupted(_)));
}

#[test]
fn test_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let source = open_failure_source(TrailStore::open(temp_dir.path().join("absent.trail")));
    assert!(matches!(source, TrailError::IoError(_)));
}

#[test]
fn test_unsupported_version() {
    let temp_dir = TempDir::new().unwrap();
    let path = build(&temp_dir);

    overwrite(&path, 4, &99u16.to_le_bytes());
    let config = StoreConfig::default().with_verify_checksum(false);
    let source = open_failure_source(TrailStore::open_with_config(&path, config));
    assert!(matches!(source, TrailError::UnsupportedVersion(99)));
}

#[test]
fn test_first_block_follows_header() {
    let temp_dir = TempDir::new().unwrap();
    let path = build(&temp_dir);

    let bytes = fs::read(&path).unwrap();
    let block = TrailBlock::read_from(&mut &bytes[HEADER_SIZE..]).unwrap();
    assert_eq!(block.ordinal, 0);
    assert_eq!(block.uuid.to_string(), USER1);
    assert_eq!(block.event_count, 20);
    assert_eq!(block.min_ts, 1_000);
    assert_eq!(block.max_ts, 1_000 + 19 * 7);
    assert!(block.verify_crc());
}
