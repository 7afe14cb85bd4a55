//! Finalized, read-only trail stores.
//!
//! A [`TrailStore`] is opened from a file written by the builder. Its
//! lexicon and trail index are loaded eagerly; trail blocks are fetched on
//! demand through a [`StorageEngine`], either a memory map (the default) or
//! positioned file reads.
//!
//! A store is cheap to clone and safe to share across threads; every clone
//! refers to the same open file. [`TrailStore::close`] releases the file for
//! all clones, after which cursors fail with `TrailError::StoreClosed`.

pub mod encoding;
pub mod file;

use crate::cursor::{Timestamp, TrailCursor};
use crate::error::{Result, TrailError};
use crate::filter::{EventFilter, FilterSpec};
use crate::item::Item;
use crate::lexicon::Lexicon;
use crate::uuid::TrailUuid;
use file::{StoreFile, StoreHeader, TrailBlock, TrailIndex, TrailIndexEntry};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// How trail blocks are read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Memory-map the whole file (default).
    #[default]
    Mmap,
    /// Open the file and read each block on demand.
    Read,
}

/// Residency hint passed to a storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// The store will be scanned soon; prefetch it.
    WillNeed,
    /// The store will not be read for a while; its pages may be dropped.
    DontNeed,
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Block access strategy.
    pub access: AccessMode,
    /// Verify the whole-file CRC on open.
    pub verify_checksum: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            access: AccessMode::default(),
            verify_checksum: true,
        }
    }
}

impl StoreConfig {
    /// Sets the block access strategy.
    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    /// Enables or disables whole-file CRC verification on open.
    pub fn with_verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }
}

/// Source of trail blocks for an open store.
pub trait StorageEngine: Send + Sync + fmt::Debug {
    /// Reads and CRC-checks the block described by `entry`.
    fn read_block(&self, entry: &TrailIndexEntry) -> Result<TrailBlock>;

    /// Applies a residency hint. Engines without page control do nothing.
    fn advise(&self, residency: Residency) -> Result<()>;
}

/// Storage engine over a read-only memory map of the store file.
#[derive(Debug)]
pub struct MappedEngine {
    mmap: memmap2::Mmap,
}

impl MappedEngine {
    /// Maps the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: store files are immutable once finalized and are replaced
        // by rename, never rewritten in place.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self { mmap })
    }
}

impl StorageEngine for MappedEngine {
    fn read_block(&self, entry: &TrailIndexEntry) -> Result<TrailBlock> {
        let start = entry.block_offset as usize;
        let end = start + entry.block_size as usize;
        let mut bytes = self.mmap.get(start..end).ok_or_else(|| {
            TrailError::Corrupted(format!(
                "block of trail {} beyond mapped file",
                entry.uuid
            ))
        })?;
        TrailBlock::read_from(&mut bytes)
    }

    #[cfg(unix)]
    fn advise(&self, residency: Residency) -> Result<()> {
        match residency {
            Residency::WillNeed => self.mmap.advise(memmap2::Advice::WillNeed)?,
            // SAFETY: the mapping is read-only and file-backed, so dropped
            // pages are reloaded from the file on the next access.
            Residency::DontNeed => unsafe {
                self.mmap
                    .unchecked_advise(memmap2::UncheckedAdvice::DontNeed)?
            },
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn advise(&self, _residency: Residency) -> Result<()> {
        Ok(())
    }
}

/// Storage engine that reads each block with a positioned file read.
#[derive(Debug)]
pub struct ReadEngine {
    path: PathBuf,
}

impl ReadEngine {
    /// Creates an engine reading from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl StorageEngine for ReadEngine {
    fn read_block(&self, entry: &TrailIndexEntry) -> Result<TrailBlock> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(entry.block_offset))?;
        TrailBlock::read_from(&mut reader)
    }

    fn advise(&self, _residency: Residency) -> Result<()> {
        Ok(())
    }
}

/// State shared by a store and every cursor created from it.
#[derive(Debug)]
pub(crate) struct StoreShared {
    path: PathBuf,
    header: StoreHeader,
    lexicon: Lexicon,
    index: TrailIndex,
    engine: RwLock<Option<Box<dyn StorageEngine>>>,
}

impl StoreShared {
    pub(crate) fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub(crate) fn num_trails(&self) -> u64 {
        self.index.len() as u64
    }

    pub(crate) fn entry(&self, ordinal: u64) -> Option<&TrailIndexEntry> {
        self.index.get(ordinal)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.engine
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .is_none()
    }

    /// Reads the block of a trail, checking that it is the block the index
    /// points at.
    pub(crate) fn read_block(&self, ordinal: u64) -> Result<TrailBlock> {
        let entry = self.index.get(ordinal).ok_or_else(|| {
            TrailError::Corrupted(format!("trail ordinal {} not in index", ordinal))
        })?;

        let guard = self.engine.read().unwrap_or_else(|err| err.into_inner());
        let engine = guard.as_ref().ok_or(TrailError::StoreClosed)?;
        let block = engine.read_block(entry)?;
        drop(guard);

        if block.ordinal != ordinal || block.uuid != entry.uuid {
            return Err(TrailError::Corrupted(format!(
                "index entry {} points at block of trail {} ({})",
                ordinal, block.ordinal, block.uuid
            )));
        }
        if block.event_count != entry.event_count {
            return Err(TrailError::Corrupted(format!(
                "trail {} has {} events, index says {}",
                entry.uuid, block.event_count, entry.event_count
            )));
        }
        Ok(block)
    }
}

/// An open, immutable trail store.
#[derive(Debug, Clone)]
pub struct TrailStore {
    shared: Arc<StoreShared>,
}

impl TrailStore {
    /// Opens a store with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::OpenFailure` wrapping the cause if the file
    /// cannot be read or fails validation.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens a store with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::OpenFailure` wrapping the cause if the file
    /// cannot be read or fails validation.
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        Self::load(path, &config).map_err(|source| TrailError::OpenFailure {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }

    fn load(path: &Path, config: &StoreConfig) -> Result<Self> {
        let file = StoreFile::open(path, config.verify_checksum)?;
        let engine: Box<dyn StorageEngine> = match config.access {
            AccessMode::Mmap => Box::new(MappedEngine::open(path)?),
            AccessMode::Read => Box::new(ReadEngine::open(path)?),
        };

        debug!(
            "Opened trail store {}: {} trails, {} events, {} fields, {} bytes",
            path.display(),
            file.header.trail_count,
            file.header.event_count,
            file.header.field_count,
            file.file_size
        );

        Ok(Self {
            shared: Arc::new(StoreShared {
                path: path.to_path_buf(),
                header: file.header,
                lexicon: file.lexicon,
                index: file.index,
                engine: RwLock::new(Some(engine)),
            }),
        })
    }

    /// Path the store was opened from.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// File format version of the store.
    pub fn version(&self) -> u16 {
        self.shared.header.version
    }

    /// Number of trails.
    pub fn num_trails(&self) -> u64 {
        self.shared.num_trails()
    }

    /// Number of events across all trails.
    pub fn num_events(&self) -> u64 {
        self.shared.header.event_count
    }

    /// Number of fields, including the time field.
    pub fn num_fields(&self) -> u64 {
        self.shared.lexicon.num_fields()
    }

    /// Field names indexed by field id; index 0 is `time`.
    pub fn field_names(&self) -> &[String] {
        self.shared.lexicon.field_names()
    }

    /// Smallest event timestamp, 0 for an empty store.
    pub fn min_timestamp(&self) -> Timestamp {
        self.shared.header.min_timestamp
    }

    /// Largest event timestamp, 0 for an empty store.
    pub fn max_timestamp(&self) -> Timestamp {
        self.shared.header.max_timestamp
    }

    /// The store's lexicon.
    pub fn lexicon(&self) -> &Lexicon {
        &self.shared.lexicon
    }

    /// Returns the uuid of a trail ordinal.
    pub fn uuid_of(&self, ordinal: u64) -> Option<TrailUuid> {
        self.shared.entry(ordinal).map(|entry| entry.uuid)
    }

    /// Returns the ordinal of a uuid.
    pub fn ordinal_of(&self, uuid: &TrailUuid) -> Option<u64> {
        self.shared.index.ordinal_of(uuid)
    }

    /// Number of events in a trail.
    pub fn trail_length(&self, ordinal: u64) -> Option<u64> {
        self.shared.entry(ordinal).map(|entry| entry.event_count)
    }

    /// All trail ordinals, in order.
    pub fn trail_ordinals(&self) -> Range<u64> {
        0..self.num_trails()
    }

    /// Field name of an item.
    pub fn item_key(&self, item: Item) -> Option<&str> {
        self.shared.lexicon.item_field_name(item)
    }

    /// Value bytes of an item; empty for value 0.
    pub fn item_value(&self, item: Item) -> Option<&[u8]> {
        self.shared.lexicon.item_value(item)
    }

    /// Compiles filter specs against this store's lexicon.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::UnknownField` if a spec names a missing field.
    pub fn compile_filter(&self, specs: &[FilterSpec]) -> Result<EventFilter> {
        EventFilter::compile(&self.shared.lexicon, specs)
    }

    /// Creates an unbound cursor.
    pub fn cursor(&self) -> TrailCursor {
        TrailCursor::new(Arc::clone(&self.shared))
    }

    /// Creates a cursor bound to a trail.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::CursorBindFailure` if the ordinal is out of range
    /// or the store is closed.
    pub fn cursor_for(&self, ordinal: u64) -> Result<TrailCursor> {
        let mut cursor = self.cursor();
        cursor.bind(ordinal)?;
        Ok(cursor)
    }

    /// Hints that the store will be scanned soon.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::StoreClosed` if the store is closed. Platform
    /// rejections are logged and ignored.
    pub fn will_need(&self) -> Result<()> {
        self.advise(Residency::WillNeed)
    }

    /// Hints that the store's pages may be dropped from memory.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::StoreClosed` if the store is closed. Platform
    /// rejections are logged and ignored.
    pub fn dont_need(&self) -> Result<()> {
        self.advise(Residency::DontNeed)
    }

    fn advise(&self, residency: Residency) -> Result<()> {
        let guard = self.shared.engine.read().unwrap_or_else(|err| err.into_inner());
        let engine = guard.as_ref().ok_or(TrailError::StoreClosed)?;
        if let Err(e) = engine.advise(residency) {
            warn!(
                "Residency hint {:?} rejected for {}: {}",
                residency,
                self.shared.path.display(),
                e
            );
        }
        Ok(())
    }

    /// Closes the store. Idempotent.
    ///
    /// Cursors created from this store (or any clone) fail on their next
    /// read.
    pub fn close(&self) {
        let mut guard = self.shared.engine.write().unwrap_or_else(|err| err.into_inner());
        if guard.take().is_some() {
            info!("Closed trail store {}", self.shared.path.display());
        }
    }

    /// Returns true once [`TrailStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}
