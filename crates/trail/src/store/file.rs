//! Trail store file format.
//!
//! A store is a single immutable file:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  File Header (64 bytes)                                      │
//! │  - Magic: "ATRL", version, compression                       │
//! │  - Min/max timestamp, trail count, event count               │
//! │  - Field count, lexicon fingerprint                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Trail Blocks (one per trail, in ordinal order)              │
//! │  - Uuid, encoded timestamps and items, block CRC             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Lexicon Section                                             │
//! │  - Field names and value dictionaries, section CRC           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Trail Index                                                 │
//! │  - Entries sorted by uuid with Bloom filter                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Footer (64 bytes)                                           │
//! │  - Section offsets/sizes, file CRC, reverse magic            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Trails are written in uuid byte order, so a trail's ordinal is its
//! position in the index.

use crate::cursor::{Event, Timestamp};
use crate::error::{Result, TrailError};
use crate::lexicon::Lexicon;
use crate::store::encoding::{EncodedTrail, ItemEncoding, TimestampEncoding};
use crate::uuid::TrailUuid;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the store header: "ATRL"
pub const STORE_MAGIC: [u8; 4] = *b"ATRL";

/// Reverse magic bytes for the store footer: "LRTA"
pub const STORE_MAGIC_REVERSE: [u8; 4] = *b"LRTA";

/// Current store file format version.
pub const STORE_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// Footer size in bytes.
pub const FOOTER_SIZE: usize = 64;

/// Size of a serialized index entry.
pub const INDEX_ENTRY_SIZE: usize = 52;

/// Compression applied to trail blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    /// Raw timestamps, every item of every event.
    Raw = 0,
    /// Delta-of-delta timestamps, edge-encoded items.
    #[default]
    Packed = 1,
}

impl CompressionType {
    /// Creates a CompressionType from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Raw),
            1 => Some(Self::Packed),
            _ => None,
        }
    }

    /// Block encodings used for this compression type.
    pub fn encodings(self) -> (TimestampEncoding, ItemEncoding) {
        match self {
            Self::Raw => (TimestampEncoding::Raw, ItemEncoding::Raw),
            Self::Packed => (TimestampEncoding::DeltaOfDelta, ItemEncoding::Edge),
        }
    }
}

/// Durability of a finished store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync data and metadata (default).
    #[default]
    Fsync,
    /// Use fdatasync (skip metadata update).
    Fdatasync,
    /// No sync (for testing only).
    None,
}

/// Store file header (64 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHeader {
    /// Magic bytes: "ATRL"
    pub magic: [u8; 4],
    /// File format version.
    pub version: u16,
    /// Compression used for trail blocks.
    pub compression: CompressionType,
    /// Smallest event timestamp, 0 for an empty store.
    pub min_timestamp: Timestamp,
    /// Largest event timestamp, 0 for an empty store.
    pub max_timestamp: Timestamp,
    /// Number of trails.
    pub trail_count: u64,
    /// Number of events across all trails.
    pub event_count: u64,
    /// Number of fields including the time field.
    pub field_count: u32,
    /// xxh64 of the serialized lexicon.
    pub lexicon_fingerprint: u64,
}

impl Default for StoreHeader {
    fn default() -> Self {
        Self {
            magic: STORE_MAGIC,
            version: STORE_VERSION,
            compression: CompressionType::default(),
            min_timestamp: 0,
            max_timestamp: 0,
            trail_count: 0,
            event_count: 0,
            field_count: 0,
            lexicon_fingerprint: 0,
        }
    }
}

impl StoreHeader {
    /// Writes the header to a writer using little-endian byte order.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        // Magic (4 bytes)
        writer.write_all(&self.magic)?;
        // Version (2 bytes)
        writer.write_all(&self.version.to_le_bytes())?;
        // Compression (1 byte) + reserved (1 byte)
        writer.write_all(&[self.compression as u8, 0])?;
        // Min timestamp (8 bytes)
        writer.write_all(&self.min_timestamp.to_le_bytes())?;
        // Max timestamp (8 bytes)
        writer.write_all(&self.max_timestamp.to_le_bytes())?;
        // Trail count (8 bytes)
        writer.write_all(&self.trail_count.to_le_bytes())?;
        // Event count (8 bytes)
        writer.write_all(&self.event_count.to_le_bytes())?;
        // Field count (4 bytes) + reserved (4 bytes)
        writer.write_all(&self.field_count.to_le_bytes())?;
        writer.write_all(&[0u8; 4])?;
        // Lexicon fingerprint (8 bytes)
        writer.write_all(&self.lexicon_fingerprint.to_le_bytes())?;
        // Reserved (8 bytes)
        writer.write_all(&[0u8; 8])?;

        Ok(())
    }

    /// Reads a header from a reader using little-endian byte order.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::InvalidMagic` if the magic bytes don't match.
    /// Returns `TrailError::UnsupportedVersion` if the version is not supported.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;

        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        if magic != STORE_MAGIC {
            return Err(TrailError::InvalidMagic(magic));
        }

        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version == 0 || version > STORE_VERSION {
            return Err(TrailError::UnsupportedVersion(version));
        }

        let compression = CompressionType::from_u8(buf[6])
            .ok_or_else(|| TrailError::Corrupted(format!("unknown compression {}", buf[6])))?;

        Ok(Self {
            magic,
            version,
            compression,
            min_timestamp: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            max_timestamp: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            trail_count: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            event_count: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            field_count: u32::from_le_bytes(buf[40..44].try_into().unwrap()),
            lexicon_fingerprint: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
        })
    }
}

/// Store file footer (64 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFooter {
    /// Offset of the lexicon section.
    pub lexicon_offset: u64,
    /// Size of the lexicon section including its CRC.
    pub lexicon_size: u64,
    /// Offset of the trail index.
    pub index_offset: u64,
    /// Size of the trail index.
    pub index_size: u64,
    /// Offset of the first trail block.
    pub data_section_offset: u64,
    /// Total size of all trail blocks.
    pub data_section_size: u64,
    /// CRC32 of the entire file, excluding the footer.
    pub file_crc32: u32,
    /// Reverse magic bytes: "LRTA"
    pub magic_reverse: [u8; 4],
}

impl Default for StoreFooter {
    fn default() -> Self {
        Self {
            lexicon_offset: 0,
            lexicon_size: 0,
            index_offset: 0,
            index_size: 0,
            data_section_offset: HEADER_SIZE as u64,
            data_section_size: 0,
            file_crc32: 0,
            magic_reverse: STORE_MAGIC_REVERSE,
        }
    }
}

impl StoreFooter {
    /// Writes the footer to a writer using little-endian byte order.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.lexicon_offset.to_le_bytes())?;
        writer.write_all(&self.lexicon_size.to_le_bytes())?;
        writer.write_all(&self.index_offset.to_le_bytes())?;
        writer.write_all(&self.index_size.to_le_bytes())?;
        writer.write_all(&self.data_section_offset.to_le_bytes())?;
        writer.write_all(&self.data_section_size.to_le_bytes())?;
        writer.write_all(&self.file_crc32.to_le_bytes())?;
        writer.write_all(&self.magic_reverse)?;
        // Reserved (8 bytes)
        writer.write_all(&[0u8; 8])?;

        Ok(())
    }

    /// Reads a footer from a reader using little-endian byte order.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::InvalidMagic` if the reverse magic bytes don't match.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; FOOTER_SIZE];
        reader.read_exact(&mut buf)?;

        let magic_reverse: [u8; 4] = buf[52..56].try_into().unwrap();
        if magic_reverse != STORE_MAGIC_REVERSE {
            return Err(TrailError::InvalidMagic(magic_reverse));
        }

        Ok(Self {
            lexicon_offset: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            lexicon_size: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            index_offset: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            index_size: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            data_section_offset: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            data_section_size: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
            file_crc32: u32::from_le_bytes(buf[48..52].try_into().unwrap()),
            magic_reverse,
        })
    }
}

/// Location and summary of one trail block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailIndexEntry {
    /// Trail identifier.
    pub uuid: TrailUuid,
    /// Offset of the trail block from file start.
    pub block_offset: u64,
    /// Size of the trail block in bytes.
    pub block_size: u32,
    /// Number of events in the trail.
    pub event_count: u64,
    /// Smallest timestamp in the trail.
    pub min_ts: Timestamp,
    /// Largest timestamp in the trail.
    pub max_ts: Timestamp,
}

impl TrailIndexEntry {
    /// Writes the entry to a writer.
    ///
    /// Format:
    /// - uuid: 16 bytes
    /// - block_offset: u64
    /// - block_size: u32
    /// - event_count: u64
    /// - min_ts: u64
    /// - max_ts: u64
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.uuid.as_bytes())?;
        writer.write_all(&self.block_offset.to_le_bytes())?;
        writer.write_all(&self.block_size.to_le_bytes())?;
        writer.write_all(&self.event_count.to_le_bytes())?;
        writer.write_all(&self.min_ts.to_le_bytes())?;
        writer.write_all(&self.max_ts.to_le_bytes())?;
        Ok(())
    }

    /// Reads an entry from a reader.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        reader.read_exact(&mut buf)?;

        let uuid: [u8; 16] = buf[0..16].try_into().unwrap();
        Ok(Self {
            uuid: TrailUuid::from_bytes(uuid),
            block_offset: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            block_size: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            event_count: u64::from_le_bytes(buf[28..36].try_into().unwrap()),
            min_ts: u64::from_le_bytes(buf[36..44].try_into().unwrap()),
            max_ts: u64::from_le_bytes(buf[44..52].try_into().unwrap()),
        })
    }
}

/// Default number of hash functions for the Bloom filter.
const BLOOM_FILTER_DEFAULT_HASH_COUNT: u8 = 3;

/// Bloom filter over trail uuids.
///
/// `h_i(x) = xxhash64(x, seed=i) % size_bits` for `i` in `0..hash_count`.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    hash_count: u8,
}

impl BloomFilter {
    /// Creates a Bloom filter sized for the given number of uuids.
    ///
    /// 10 bits per uuid gives roughly a 1% false positive rate with k=3.
    pub fn new(expected_items: usize) -> Self {
        let num_bits = (expected_items * 10).max(64);
        let num_words = num_bits.div_ceil(64);

        Self {
            bits: vec![0u64; num_words],
            hash_count: BLOOM_FILTER_DEFAULT_HASH_COUNT,
        }
    }

    fn bit_positions<'a>(&'a self, uuid: &'a TrailUuid) -> impl Iterator<Item = (usize, u64)> + 'a {
        let num_bits = (self.bits.len() * 64) as u64;
        (0..self.hash_count).map(move |seed| {
            let hash = xxhash_rust::xxh64::xxh64(uuid.as_bytes(), seed as u64);
            let bit_idx = hash % num_bits;
            ((bit_idx / 64) as usize, 1u64 << (bit_idx % 64))
        })
    }

    /// Adds a uuid to the filter.
    pub fn insert(&mut self, uuid: &TrailUuid) {
        let positions: Vec<_> = self.bit_positions(uuid).collect();
        for (word, mask) in positions {
            self.bits[word] |= mask;
        }
    }

    /// Returns `false` if the uuid is definitely absent.
    pub fn maybe_contains(&self, uuid: &TrailUuid) -> bool {
        self.bit_positions(uuid)
            .all(|(word, mask)| self.bits[word] & mask != 0)
    }

    /// Writes the Bloom filter to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        // Number of words (4 bytes)
        writer.write_all(&(self.bits.len() as u32).to_le_bytes())?;
        // Hash count (1 byte) + 3 bytes reserved for alignment
        writer.write_all(&[self.hash_count, 0, 0, 0])?;
        for word in &self.bits {
            writer.write_all(&word.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reads a Bloom filter from a reader.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::Corrupted` for an empty bit array or zero hashes.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4)?;
        let num_words = u32::from_le_bytes(buf4) as usize;

        reader.read_exact(&mut buf4)?;
        let hash_count = buf4[0];

        if num_words == 0 || hash_count == 0 {
            return Err(TrailError::Corrupted(
                "empty bloom filter in trail index".to_string(),
            ));
        }

        let mut bits = Vec::new();
        let mut buf8 = [0u8; 8];
        for _ in 0..num_words {
            reader.read_exact(&mut buf8)?;
            bits.push(u64::from_le_bytes(buf8));
        }

        Ok(Self { bits, hash_count })
    }
}

/// Trail index: entries sorted by uuid, position = ordinal.
#[derive(Debug, Clone)]
pub struct TrailIndex {
    entries: Vec<TrailIndexEntry>,
    bloom: BloomFilter,
}

impl TrailIndex {
    /// Builds an index from entries already sorted by uuid.
    pub fn from_sorted(entries: Vec<TrailIndexEntry>) -> Self {
        let mut bloom = BloomFilter::new(entries.len());
        for entry in &entries {
            bloom.insert(&entry.uuid);
        }
        Self { entries, bloom }
    }

    /// Returns the entry of a trail ordinal.
    pub fn get(&self, ordinal: u64) -> Option<&TrailIndexEntry> {
        self.entries.get(usize::try_from(ordinal).ok()?)
    }

    /// Looks up the ordinal of a uuid.
    ///
    /// Uses the Bloom filter for quick rejection of absent uuids.
    pub fn ordinal_of(&self, uuid: &TrailUuid) -> Option<u64> {
        if !self.bloom.maybe_contains(uuid) {
            return None;
        }
        self.entries
            .binary_search_by(|entry| entry.uuid.cmp(uuid))
            .ok()
            .map(|pos| pos as u64)
    }

    /// Returns an iterator over all entries in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = &TrailIndexEntry> {
        self.entries.iter()
    }

    /// Returns the number of trails.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index has no trails.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the index to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.entries.len() as u64).to_le_bytes())?;
        for entry in &self.entries {
            entry.write_to(writer)?;
        }
        self.bloom.write_to(writer)?;
        Ok(())
    }

    /// Reads an index from a reader.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::Corrupted` if the entries are not strictly
    /// ordered by uuid.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf8 = [0u8; 8];
        reader.read_exact(&mut buf8)?;
        let entry_count = u64::from_le_bytes(buf8);

        let mut entries: Vec<TrailIndexEntry> = Vec::new();
        for _ in 0..entry_count {
            let entry = TrailIndexEntry::read_from(reader)?;
            if let Some(prev) = entries.last() {
                if prev.uuid >= entry.uuid {
                    return Err(TrailError::Corrupted(format!(
                        "trail index out of order at {}",
                        entry.uuid
                    )));
                }
            }
            entries.push(entry);
        }

        let bloom = BloomFilter::read_from(reader)?;

        Ok(Self { entries, bloom })
    }
}

/// Trail block: the encoded events of one trail.
///
/// ## Binary Layout
///
/// ```text
/// Offset  Size    Field
/// ------  ----    -----
/// 0x00    8       ordinal (u64 LE)
/// 0x08    16      uuid
/// 0x18    8       event_count (u64 LE)
/// 0x20    8       min_timestamp (u64 LE)
/// 0x28    8       max_timestamp (u64 LE)
/// 0x30    1       ts_encoding (u8)
/// 0x31    1       item_encoding (u8)
/// 0x32    4       ts_data_size (u32 LE)
/// 0x36    N       ts_data[ts_data_size]
/// 0x36+N  4       item_data_size (u32 LE)
/// 0x3A+N  M       item_data[item_data_size]
/// 0x3A+N+M 4      block_crc32 (u32 LE)
/// ```
#[derive(Debug, Clone)]
pub struct TrailBlock {
    /// Ordinal of the trail.
    pub ordinal: u64,
    /// Trail identifier.
    pub uuid: TrailUuid,
    /// Number of events.
    pub event_count: u64,
    /// Smallest timestamp.
    pub min_ts: Timestamp,
    /// Largest timestamp.
    pub max_ts: Timestamp,
    /// Encoded payloads.
    pub payload: EncodedTrail,
    /// CRC32 of every preceding field.
    pub block_crc32: u32,
}

impl TrailBlock {
    /// Size of the fixed part that precedes the timestamp payload.
    pub const FIXED_HEADER_SIZE: usize = 54;

    /// Creates a block and computes its checksum.
    pub fn new(
        ordinal: u64,
        uuid: TrailUuid,
        event_count: u64,
        min_ts: Timestamp,
        max_ts: Timestamp,
        payload: EncodedTrail,
    ) -> Self {
        let mut block = Self {
            ordinal,
            uuid,
            event_count,
            min_ts,
            max_ts,
            payload,
            block_crc32: 0,
        };
        block.block_crc32 = block.calculate_crc();
        block
    }

    fn calculate_crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.ordinal.to_le_bytes());
        hasher.update(self.uuid.as_bytes());
        hasher.update(&self.event_count.to_le_bytes());
        hasher.update(&self.min_ts.to_le_bytes());
        hasher.update(&self.max_ts.to_le_bytes());
        hasher.update(&[
            self.payload.ts_encoding as u8,
            self.payload.item_encoding as u8,
        ]);
        hasher.update(&(self.payload.ts_data.len() as u32).to_le_bytes());
        hasher.update(&self.payload.ts_data);
        hasher.update(&(self.payload.item_data.len() as u32).to_le_bytes());
        hasher.update(&self.payload.item_data);
        hasher.finalize()
    }

    /// Verifies the block's CRC32 checksum.
    pub fn verify_crc(&self) -> bool {
        self.block_crc32 == self.calculate_crc()
    }

    /// Writes the block to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.ordinal.to_le_bytes())?;
        writer.write_all(self.uuid.as_bytes())?;
        writer.write_all(&self.event_count.to_le_bytes())?;
        writer.write_all(&self.min_ts.to_le_bytes())?;
        writer.write_all(&self.max_ts.to_le_bytes())?;
        writer.write_all(&[
            self.payload.ts_encoding as u8,
            self.payload.item_encoding as u8,
        ])?;
        writer.write_all(&(self.payload.ts_data.len() as u32).to_le_bytes())?;
        writer.write_all(&self.payload.ts_data)?;
        writer.write_all(&(self.payload.item_data.len() as u32).to_le_bytes())?;
        writer.write_all(&self.payload.item_data)?;
        writer.write_all(&self.block_crc32.to_le_bytes())?;
        Ok(())
    }

    /// Reads a block from a reader and verifies its CRC.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::ChecksumMismatch` if CRC verification fails and
    /// `TrailError::Corrupted` for unknown encodings.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut fixed = [0u8; Self::FIXED_HEADER_SIZE];
        reader.read_exact(&mut fixed)?;

        let ordinal = u64::from_le_bytes(fixed[0..8].try_into().unwrap());
        let uuid: [u8; 16] = fixed[8..24].try_into().unwrap();
        let event_count = u64::from_le_bytes(fixed[24..32].try_into().unwrap());
        let min_ts = u64::from_le_bytes(fixed[32..40].try_into().unwrap());
        let max_ts = u64::from_le_bytes(fixed[40..48].try_into().unwrap());
        let ts_encoding = TimestampEncoding::from_u8(fixed[48]).ok_or_else(|| {
            TrailError::Corrupted(format!("unknown timestamp encoding {}", fixed[48]))
        })?;
        let item_encoding = ItemEncoding::from_u8(fixed[49])
            .ok_or_else(|| TrailError::Corrupted(format!("unknown item encoding {}", fixed[49])))?;
        let ts_data_size = u32::from_le_bytes(fixed[50..54].try_into().unwrap()) as usize;

        let mut ts_data = vec![0u8; ts_data_size];
        reader.read_exact(&mut ts_data)?;

        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4)?;
        let item_data_size = u32::from_le_bytes(buf4) as usize;

        let mut item_data = vec![0u8; item_data_size];
        reader.read_exact(&mut item_data)?;

        reader.read_exact(&mut buf4)?;
        let block_crc32 = u32::from_le_bytes(buf4);

        let block = Self {
            ordinal,
            uuid: TrailUuid::from_bytes(uuid),
            event_count,
            min_ts,
            max_ts,
            payload: EncodedTrail {
                ts_encoding,
                item_encoding,
                ts_data,
                item_data,
            },
            block_crc32,
        };

        let calculated_crc = block.calculate_crc();
        if block_crc32 != calculated_crc {
            return Err(TrailError::ChecksumMismatch {
                expected: block_crc32,
                actual: calculated_crc,
            });
        }

        Ok(block)
    }

    /// Returns the size of the block in bytes when serialized.
    pub fn serialized_size(&self) -> usize {
        Self::FIXED_HEADER_SIZE
            + self.payload.ts_data.len()
            + 4 // item_data_size
            + self.payload.item_data.len()
            + 4 // block_crc32
    }
}

/// Calculates the CRC32 of the first `size` bytes of a file.
pub(crate) fn calculate_file_crc(path: &Path, size: u64) -> Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = [0u8; 8192];
    let mut remaining = size;

    while remaining > 0 {
        let to_read = remaining.min(buffer.len() as u64) as usize;
        let n = file.read(&mut buffer[..to_read])?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
    }

    Ok(hasher.finalize())
}

/// Serializes a lexicon section: the lexicon followed by its CRC32.
///
/// Returns the section bytes and the lexicon fingerprint.
fn encode_lexicon_section(lexicon: &Lexicon) -> Result<(Vec<u8>, u64)> {
    let mut section = Vec::new();
    lexicon.write_to(&mut section)?;
    let fingerprint = xxhash_rust::xxh64::xxh64(&section, 0);
    let crc = crc32fast::hash(&section);
    section.extend_from_slice(&crc.to_le_bytes());
    Ok((section, fingerprint))
}

/// Parses a lexicon section, verifying its CRC and stamping its fingerprint.
fn decode_lexicon_section(section: &[u8]) -> Result<Lexicon> {
    if section.len() < 4 {
        return Err(TrailError::Corrupted("lexicon section too small".to_string()));
    }
    let (body, crc_bytes) = section.split_at(section.len() - 4);
    let expected = u32::from_le_bytes(crc_bytes.try_into().unwrap());
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(TrailError::ChecksumMismatch { expected, actual });
    }

    let mut reader = body;
    let lexicon = Lexicon::read_from(&mut reader)?;
    if !reader.is_empty() {
        return Err(TrailError::Corrupted(format!(
            "{} trailing bytes after lexicon",
            reader.len()
        )));
    }
    Ok(lexicon.with_fingerprint(xxhash_rust::xxh64::xxh64(body, 0)))
}

/// Summary of a finished store file.
#[derive(Debug)]
pub struct StoreFileHandle {
    /// Path of the written file.
    pub path: PathBuf,
    /// Final header.
    pub header: StoreHeader,
    /// Final footer.
    pub footer: StoreFooter,
}

/// Store file writer.
///
/// Writes a store in this sequence:
/// 1. Placeholder header
/// 2. Trail blocks, in uuid order
/// 3. Lexicon section
/// 4. Trail index
/// 5. Final header (rewritten in place) and footer with the file CRC
pub struct StoreWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    position: u64,
    entries: Vec<TrailIndexEntry>,
    min_timestamp: Timestamp,
    max_timestamp: Timestamp,
    event_count: u64,
    compression: CompressionType,
    num_user_fields: usize,
}

impl StoreWriter {
    /// Creates a writer at `path`, truncating any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path, compression: CompressionType, num_user_fields: usize) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(file, path, compression, num_user_fields)
    }

    /// Creates a writer over an already created, empty file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder header cannot be written.
    pub fn new(
        file: File,
        path: &Path,
        compression: CompressionType,
        num_user_fields: usize,
    ) -> Result<Self> {
        let mut writer = BufWriter::new(file);
        writer.seek(SeekFrom::Start(0))?;

        let mut header_buf = Vec::with_capacity(HEADER_SIZE);
        StoreHeader::default().write_to(&mut header_buf)?;
        writer.write_all(&header_buf)?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            position: HEADER_SIZE as u64,
            entries: Vec::new(),
            min_timestamp: Timestamp::MAX,
            max_timestamp: Timestamp::MIN,
            event_count: 0,
            compression,
            num_user_fields,
        })
    }

    /// Writes one trail.
    ///
    /// Trails must arrive in strictly increasing uuid order; the ordinal is
    /// the number of trails written before this one.
    ///
    /// # Errors
    ///
    /// Returns an error if the uuid is out of order, the block is too large,
    /// or writing fails.
    pub fn write_trail(&mut self, uuid: TrailUuid, events: &[Event]) -> Result<()> {
        if let Some(prev) = self.entries.last() {
            if prev.uuid >= uuid {
                return Err(TrailError::Corrupted(format!(
                    "trail {} written after {}",
                    uuid, prev.uuid
                )));
            }
        }

        let min_ts = events.iter().map(|e| e.timestamp).min().unwrap_or(0);
        let max_ts = events.iter().map(|e| e.timestamp).max().unwrap_or(0);
        if !events.is_empty() {
            self.min_timestamp = self.min_timestamp.min(min_ts);
            self.max_timestamp = self.max_timestamp.max(max_ts);
        }
        self.event_count += events.len() as u64;

        let (ts_encoding, item_encoding) = self.compression.encodings();
        let payload = EncodedTrail::encode(events, ts_encoding, item_encoding, self.num_user_fields);
        if payload.ts_data.len() > u32::MAX as usize || payload.item_data.len() > u32::MAX as usize
        {
            return Err(TrailError::CapacityExceeded(format!(
                "trail {} does not fit in one block",
                uuid
            )));
        }

        let ordinal = self.entries.len() as u64;
        let block = TrailBlock::new(ordinal, uuid, events.len() as u64, min_ts, max_ts, payload);
        let block_offset = self.position;
        let block_size = u32::try_from(block.serialized_size()).map_err(|_| {
            TrailError::CapacityExceeded(format!("trail {} does not fit in one block", uuid))
        })?;

        let mut block_buf = Vec::with_capacity(block_size as usize);
        block.write_to(&mut block_buf)?;
        self.writer.write_all(&block_buf)?;
        self.position += block_size as u64;

        self.entries.push(TrailIndexEntry {
            uuid,
            block_offset,
            block_size,
            event_count: events.len() as u64,
            min_ts,
            max_ts,
        });

        Ok(())
    }

    /// Number of trails written so far.
    pub fn trail_count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Finishes the file.
    ///
    /// Writes the lexicon and the index, rewrites the header with the final
    /// counts, appends the footer with the file CRC and syncs per `sync_mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if any I/O operation fails.
    pub fn finish(mut self, lexicon: &Lexicon, sync_mode: SyncMode) -> Result<StoreFileHandle> {
        let data_section_offset = HEADER_SIZE as u64;
        let data_section_size = self.position - data_section_offset;

        let (lexicon_section, lexicon_fingerprint) = encode_lexicon_section(lexicon)?;
        let lexicon_offset = self.position;
        self.writer.write_all(&lexicon_section)?;
        self.position += lexicon_section.len() as u64;

        let index_offset = self.position;
        let trail_count = self.entries.len() as u64;
        let index = TrailIndex::from_sorted(std::mem::take(&mut self.entries));
        let mut index_buf = Vec::new();
        index.write_to(&mut index_buf)?;
        self.writer.write_all(&index_buf)?;
        self.position += index_buf.len() as u64;

        let (min_timestamp, max_timestamp) = if self.event_count == 0 {
            (0, 0)
        } else {
            (self.min_timestamp, self.max_timestamp)
        };
        let header = StoreHeader {
            compression: self.compression,
            min_timestamp,
            max_timestamp,
            trail_count,
            event_count: self.event_count,
            field_count: lexicon.num_fields() as u32,
            lexicon_fingerprint,
            ..StoreHeader::default()
        };

        // Seek to beginning and overwrite header with final values
        self.writer.seek(SeekFrom::Start(0))?;
        header.write_to(&mut self.writer)?;
        self.writer.flush()?;
        self.writer.seek(SeekFrom::End(0))?;

        let file_crc32 = calculate_file_crc(&self.path, self.position)?;

        let footer = StoreFooter {
            lexicon_offset,
            lexicon_size: lexicon_section.len() as u64,
            index_offset,
            index_size: index_buf.len() as u64,
            data_section_offset,
            data_section_size,
            file_crc32,
            magic_reverse: STORE_MAGIC_REVERSE,
        };
        footer.write_to(&mut self.writer)?;

        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        match sync_mode {
            SyncMode::Fsync => file.sync_all()?,
            SyncMode::Fdatasync => file.sync_data()?,
            SyncMode::None => {}
        }

        Ok(StoreFileHandle {
            path: self.path,
            header,
            footer,
        })
    }
}

/// Parsed metadata of a store file.
#[derive(Debug)]
pub struct StoreFile {
    /// File header.
    pub header: StoreHeader,
    /// File footer.
    pub footer: StoreFooter,
    /// Lexicon, stamped with its fingerprint.
    pub lexicon: Lexicon,
    /// Trail index.
    pub index: TrailIndex,
    /// Total file size in bytes.
    pub file_size: u64,
}

impl StoreFile {
    /// Opens a store file and loads its lexicon and index.
    ///
    /// This method:
    /// 1. Reads and validates the header and footer
    /// 2. Checks that every section lies inside the file
    /// 3. Optionally verifies the file CRC
    /// 4. Loads the lexicon (always CRC-checked) and the trail index
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or any check fails.
    pub fn open(path: &Path, verify_checksum: bool) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(TrailError::Corrupted(format!(
                "file is {} bytes, smaller than header and footer",
                file_size
            )));
        }
        let mut reader = BufReader::new(file);

        let header = StoreHeader::read_from(&mut reader)?;

        reader.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let footer = StoreFooter::read_from(&mut reader)?;

        let body_end = file_size - FOOTER_SIZE as u64;
        let sections = [
            ("data", footer.data_section_offset, footer.data_section_size),
            ("lexicon", footer.lexicon_offset, footer.lexicon_size),
            ("index", footer.index_offset, footer.index_size),
        ];
        for (name, offset, size) in sections {
            let in_bounds = offset >= HEADER_SIZE as u64
                && offset.checked_add(size).is_some_and(|end| end <= body_end);
            if !in_bounds {
                return Err(TrailError::Corrupted(format!(
                    "{} section [{}, +{}) outside file of {} bytes",
                    name, offset, size, file_size
                )));
            }
        }

        if verify_checksum {
            let calculated_crc = calculate_file_crc(path, body_end)?;
            if calculated_crc != footer.file_crc32 {
                return Err(TrailError::ChecksumMismatch {
                    expected: footer.file_crc32,
                    actual: calculated_crc,
                });
            }
        }

        let lexicon_section = read_section(&mut reader, footer.lexicon_offset, footer.lexicon_size)?;
        let lexicon = decode_lexicon_section(&lexicon_section)?;
        if lexicon.fingerprint() != header.lexicon_fingerprint {
            return Err(TrailError::Corrupted(
                "lexicon fingerprint does not match header".to_string(),
            ));
        }
        if lexicon.num_fields() != header.field_count as u64 {
            return Err(TrailError::Corrupted(format!(
                "header declares {} fields, lexicon has {}",
                header.field_count,
                lexicon.num_fields()
            )));
        }

        let index_section = read_section(&mut reader, footer.index_offset, footer.index_size)?;
        let index = TrailIndex::read_from(&mut index_section.as_slice())?;
        if index.len() as u64 != header.trail_count {
            return Err(TrailError::Corrupted(format!(
                "header declares {} trails, index has {}",
                header.trail_count,
                index.len()
            )));
        }
        // The section check above keeps data_end from overflowing.
        let data_end = footer.data_section_offset + footer.data_section_size;
        for entry in index.iter() {
            let in_data = entry.block_offset >= footer.data_section_offset
                && entry
                    .block_offset
                    .checked_add(entry.block_size as u64)
                    .is_some_and(|end| end <= data_end);
            if !in_data {
                return Err(TrailError::Corrupted(format!(
                    "block of trail {} outside data section",
                    entry.uuid
                )));
            }
        }

        Ok(Self {
            header,
            footer,
            lexicon,
            index,
            file_size,
        })
    }
}

fn read_section<R: Read + Seek>(reader: &mut R, offset: u64, size: u64) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;
    use crate::store::encoding::EventDecoder;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn uuid(n: u8) -> TrailUuid {
        let mut bytes = [0u8; 16];
        bytes[15] = n;
        TrailUuid::from_bytes(bytes)
    }

    fn sample_lexicon() -> Lexicon {
        let mut lexicon = Lexicon::new(&["field1", "field2"]).unwrap();
        lexicon.get_or_insert_value(1, b"a").unwrap();
        lexicon.get_or_insert_value(2, b"b").unwrap();
        lexicon
    }

    fn events(timestamps: &[u64]) -> Vec<Event> {
        timestamps
            .iter()
            .enumerate()
            .map(|(i, &timestamp)| Event {
                timestamp,
                items: vec![Item::new(1, (i % 2) as u64), Item::new(2, 1)],
            })
            .collect()
    }

    #[test]
    fn test_header_size() {
        let mut buf = Vec::new();
        StoreHeader::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = StoreHeader {
            compression: CompressionType::Raw,
            min_timestamp: 1000,
            max_timestamp: u64::MAX,
            trail_count: 7,
            event_count: 99,
            field_count: 3,
            lexicon_fingerprint: 0xdead_beef_cafe_f00d,
            ..StoreHeader::default()
        };

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        let read_header = StoreHeader::read_from(&mut Cursor::new(buf)).unwrap();

        assert_eq!(header, read_header);
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(b"XXXX");

        let result = StoreHeader::read_from(&mut Cursor::new(buf));
        assert!(matches!(result, Err(TrailError::InvalidMagic(_))));
    }

    #[test]
    fn test_header_future_version() {
        let mut buf = Vec::new();
        StoreHeader::default().write_to(&mut buf).unwrap();
        buf[4..6].copy_from_slice(&(STORE_VERSION + 1).to_le_bytes());

        let result = StoreHeader::read_from(&mut Cursor::new(buf));
        assert!(matches!(result, Err(TrailError::UnsupportedVersion(v)) if v == STORE_VERSION + 1));
    }

    #[test]
    fn test_footer_roundtrip() {
        let footer = StoreFooter {
            lexicon_offset: 500,
            lexicon_size: 40,
            index_offset: 540,
            index_size: 120,
            data_section_offset: HEADER_SIZE as u64,
            data_section_size: 436,
            file_crc32: 0x1234_5678,
            magic_reverse: STORE_MAGIC_REVERSE,
        };

        let mut buf = Vec::new();
        footer.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), FOOTER_SIZE);

        let read_footer = StoreFooter::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(footer, read_footer);
    }

    #[test]
    fn test_footer_invalid_magic() {
        let buf = vec![0u8; FOOTER_SIZE];
        let result = StoreFooter::read_from(&mut Cursor::new(buf));
        assert!(matches!(result, Err(TrailError::InvalidMagic(_))));
    }

    #[test]
    fn test_compression_type_from_u8() {
        assert_eq!(CompressionType::from_u8(0), Some(CompressionType::Raw));
        assert_eq!(CompressionType::from_u8(1), Some(CompressionType::Packed));
        assert_eq!(CompressionType::from_u8(2), None);
    }

    #[test]
    fn test_bloom_filter() {
        let mut bloom = BloomFilter::new(100);
        for n in 0..50 {
            bloom.insert(&uuid(n));
        }
        for n in 0..50 {
            assert!(bloom.maybe_contains(&uuid(n)));
        }

        let false_positives = (100..=255).filter(|&n| bloom.maybe_contains(&uuid(n))).count();
        assert!(false_positives < 20, "too many false positives: {}", false_positives);
    }

    #[test]
    fn test_bloom_filter_rejects_empty() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&[3, 0, 0, 0]);
        let result = BloomFilter::read_from(&mut Cursor::new(buf));
        assert!(matches!(result, Err(TrailError::Corrupted(_))));
    }

    #[test]
    fn test_trail_index_roundtrip() {
        let entries: Vec<_> = (1..=3)
            .map(|n| TrailIndexEntry {
                uuid: uuid(n),
                block_offset: 64 * n as u64,
                block_size: 64,
                event_count: n as u64,
                min_ts: 10,
                max_ts: 20,
            })
            .collect();
        let index = TrailIndex::from_sorted(entries);

        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();
        let read = TrailIndex::read_from(&mut Cursor::new(buf)).unwrap();

        assert_eq!(read.len(), 3);
        assert_eq!(read.ordinal_of(&uuid(2)), Some(1));
        assert_eq!(read.ordinal_of(&uuid(9)), None);
        assert_eq!(read.get(2).unwrap().uuid, uuid(3));
        assert!(read.get(3).is_none());
    }

    #[test]
    fn test_trail_index_rejects_unsorted() {
        let entries: Vec<_> = [2u8, 1]
            .iter()
            .map(|&n| TrailIndexEntry {
                uuid: uuid(n),
                block_offset: 64,
                block_size: 10,
                event_count: 1,
                min_ts: 0,
                max_ts: 0,
            })
            .collect();
        let index = TrailIndex::from_sorted(entries);
        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();

        let result = TrailIndex::read_from(&mut Cursor::new(buf));
        assert!(matches!(result, Err(TrailError::Corrupted(_))));
    }

    #[test]
    fn test_trail_block_roundtrip() {
        let (ts_encoding, item_encoding) = CompressionType::Packed.encodings();
        let payload = EncodedTrail::encode(&events(&[5, 6, 9]), ts_encoding, item_encoding, 2);
        let block = TrailBlock::new(4, uuid(1), 3, 5, 9, payload);
        assert!(block.verify_crc());

        let mut buf = Vec::new();
        block.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), block.serialized_size());

        let read = TrailBlock::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read.ordinal, 4);
        assert_eq!(read.uuid, uuid(1));
        assert_eq!(read.event_count, 3);
        assert_eq!(read.payload, block.payload);
    }

    #[test]
    fn test_trail_block_corrupted_crc() {
        let payload = EncodedTrail::encode(
            &events(&[1, 2]),
            TimestampEncoding::Raw,
            ItemEncoding::Raw,
            2,
        );
        let block = TrailBlock::new(0, uuid(1), 2, 1, 2, payload);

        let mut buf = Vec::new();
        block.write_to(&mut buf).unwrap();
        buf[TrailBlock::FIXED_HEADER_SIZE] ^= 0xFF;

        let result = TrailBlock::read_from(&mut Cursor::new(buf));
        assert!(matches!(result, Err(TrailError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_writer_open_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("roundtrip.trail");
        let lexicon = sample_lexicon();

        let handle = {
            let mut writer = StoreWriter::create(&path, CompressionType::Packed, 2).unwrap();
            writer.write_trail(uuid(1), &events(&[100, 200])).unwrap();
            writer.write_trail(uuid(2), &events(&[50, 60, 70])).unwrap();
            writer.finish(&lexicon, SyncMode::None).unwrap()
        };
        assert_eq!(handle.header.trail_count, 2);
        assert_eq!(handle.header.event_count, 5);
        assert_eq!(handle.header.min_timestamp, 50);
        assert_eq!(handle.header.max_timestamp, 200);

        let store = StoreFile::open(&path, true).unwrap();
        assert_eq!(store.header, handle.header);
        assert_eq!(store.footer, handle.footer);
        assert_eq!(store.lexicon.field_names(), lexicon.field_names());
        assert_eq!(store.lexicon.fingerprint(), handle.header.lexicon_fingerprint);
        assert_eq!(store.index.ordinal_of(&uuid(2)), Some(1));

        let entry = store.index.get(1).unwrap();
        let mut file = File::open(&path).unwrap();
        file.seek(SeekFrom::Start(entry.block_offset)).unwrap();
        let block = TrailBlock::read_from(&mut file).unwrap();
        assert_eq!(block.ordinal, 1);
        assert_eq!(block.event_count, 3);
    }

    #[test]
    fn test_writer_rejects_out_of_order_trails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("order.trail");

        let mut writer = StoreWriter::create(&path, CompressionType::Packed, 2).unwrap();
        writer.write_trail(uuid(2), &events(&[1])).unwrap();
        let result = writer.write_trail(uuid(1), &events(&[1]));
        assert!(matches!(result, Err(TrailError::Corrupted(_))));
        let result = writer.write_trail(uuid(2), &events(&[1]));
        assert!(matches!(result, Err(TrailError::Corrupted(_))));
    }

    #[test]
    fn test_empty_store_has_zero_bounds() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.trail");

        let writer = StoreWriter::create(&path, CompressionType::Packed, 2).unwrap();
        writer.finish(&sample_lexicon(), SyncMode::None).unwrap();

        let store = StoreFile::open(&path, true).unwrap();
        assert_eq!(store.header.trail_count, 0);
        assert_eq!(store.header.min_timestamp, 0);
        assert_eq!(store.header.max_timestamp, 0);
        assert!(store.index.is_empty());
    }

    #[test]
    fn test_corrupted_file_detected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.trail");

        let mut writer = StoreWriter::create(&path, CompressionType::Packed, 2).unwrap();
        writer.write_trail(uuid(1), &events(&[1, 2, 3])).unwrap();
        writer.finish(&sample_lexicon(), SyncMode::None).unwrap();

        let mut contents = std::fs::read(&path).unwrap();
        contents[HEADER_SIZE + 10] ^= 0xFF;
        std::fs::write(&path, &contents).unwrap();

        let result = StoreFile::open(&path, true);
        assert!(matches!(result, Err(TrailError::ChecksumMismatch { .. })));

        // Block corruption goes unnoticed until the block is read.
        assert!(StoreFile::open(&path, false).is_ok());
    }

    #[test]
    fn test_writer_keeps_irregular_events() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("irregular.trail");
        let trail = vec![
            Event {
                timestamp: 1,
                items: vec![Item::new(1, 1), Item::new(2, 1)],
            },
            Event {
                timestamp: 2,
                items: vec![Item::new(1, 2)],
            },
            Event {
                timestamp: 3,
                items: vec![Item::new(1, 1), Item::new(1, 2)],
            },
        ];

        let mut writer = StoreWriter::create(&path, CompressionType::Packed, 2).unwrap();
        writer.write_trail(uuid(1), &trail).unwrap();
        writer.finish(&sample_lexicon(), SyncMode::None).unwrap();

        let store = StoreFile::open(&path, true).unwrap();
        let entry = store.index.get(0).unwrap();
        let mut file = File::open(&path).unwrap();
        file.seek(SeekFrom::Start(entry.block_offset)).unwrap();
        let block = TrailBlock::read_from(&mut file).unwrap();
        assert_eq!(block.payload.item_encoding, ItemEncoding::Raw);

        let mut decoder = EventDecoder::new(block.payload, block.event_count, 2);
        let mut decoded = Vec::new();
        while let Some(timestamp) = decoder.next_event().unwrap() {
            decoded.push(Event {
                timestamp,
                items: decoder.current().to_vec(),
            });
        }
        assert_eq!(decoded, trail);
    }

    #[test]
    fn test_block_offset_overflow_detected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("overflow.trail");

        let mut writer = StoreWriter::create(&path, CompressionType::Packed, 2).unwrap();
        writer.write_trail(uuid(1), &events(&[1, 2, 3])).unwrap();
        let handle = writer.finish(&sample_lexicon(), SyncMode::None).unwrap();

        // block_offset of the first entry follows the entry count and uuid.
        let at = handle.footer.index_offset as usize + 8 + 16;
        let mut contents = std::fs::read(&path).unwrap();
        contents[at..at + 8].copy_from_slice(&(u64::MAX - 1).to_le_bytes());
        std::fs::write(&path, &contents).unwrap();

        let result = StoreFile::open(&path, false);
        assert!(matches!(result, Err(TrailError::Corrupted(_))));
    }

    #[test]
    fn test_truncated_file_detected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("short.trail");
        std::fs::write(&path, b"ATRL").unwrap();

        let result = StoreFile::open(&path, true);
        assert!(matches!(result, Err(TrailError::Corrupted(_))));
    }
}
