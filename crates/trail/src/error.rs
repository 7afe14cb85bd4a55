//! Error and Result types for trail store operations.

use crate::item::FieldId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for trail store operations.
pub type Result<T> = std::result::Result<T, TrailError>;

/// The error type for trail store operations.
#[derive(Debug, Error)]
pub enum TrailError {
    /// A store or constructor could not be opened at the given path.
    #[error("Could not open {}: {source}", path.display())]
    OpenFailure {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying cause (I/O, corruption, invalid field names, ...).
        #[source]
        source: Box<TrailError>,
    },

    /// A UUID string is not in the canonical 8-4-4-4-12 hex form.
    #[error("Invalid UUID: {0:?}")]
    InvalidUuid(String),

    /// A field name is not present in the lexicon.
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// An event carried more values than the store declares fields.
    #[error("Too many values: got {supplied}, store declares {fields} fields")]
    TooManyValues {
        /// Number of values supplied.
        supplied: usize,
        /// Number of declared (user) fields.
        fields: usize,
    },

    /// An appended store declares a different number of fields.
    #[error("Wrong number of fields: expected {expected}, got {actual}")]
    FieldCountMismatch {
        /// Field count of the constructor (including the time field).
        expected: u64,
        /// Field count of the appended store (including the time field).
        actual: u64,
    },

    /// An appended store names a field differently.
    #[error("Field name mismatch at field {field}: expected {expected:?}, got {actual:?}")]
    FieldNameMismatch {
        /// Field id where the names diverge.
        field: FieldId,
        /// Name declared by the constructor.
        expected: String,
        /// Name declared by the appended store.
        actual: String,
    },

    /// A cursor could not be bound to a trail.
    #[error("Failed to bind cursor to trail {ordinal}: {reason}")]
    CursorBindFailure {
        /// Requested trail ordinal.
        ordinal: u64,
        /// Why the bind was rejected.
        reason: &'static str,
    },

    /// An event filter was compiled against a different lexicon.
    #[error("Unable to set event filter: lexicon fingerprint {filter:#018x} does not match store {store:#018x}")]
    FilterAttachFailure {
        /// Fingerprint of the lexicon the filter was compiled against.
        filter: u64,
        /// Fingerprint of the cursor's store lexicon.
        store: u64,
    },

    /// Sealing the store file failed.
    #[error("Could not finalize: {0}")]
    FinalizeFailure(#[source] Box<TrailError>),

    /// Reading events from a bound trail failed mid-scan.
    #[error("Iteration over trail {ordinal} failed: {source}")]
    IterationFailure {
        /// Trail ordinal being scanned.
        ordinal: u64,
        /// Underlying cause.
        #[source]
        source: Box<TrailError>,
    },

    /// The constructor was already finalized and accepts no more data.
    #[error("Constructor is already finalized")]
    AlreadyFinalized,

    /// A constructor was opened without field names.
    #[error("Field names are required")]
    NoFields,

    /// A field name is empty, reserved, too long or has invalid characters.
    #[error("Invalid field name: {0:?}")]
    InvalidFieldName(String),

    /// A field name was declared twice.
    #[error("Duplicate field name: {0}")]
    DuplicateFieldName(String),

    /// A field or value id does not fit the item encoding.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Invalid magic bytes in the store header or footer.
    #[error("Invalid magic bytes: expected ATRL, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported store file format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// A checksum does not match the stored value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Stored CRC32 checksum.
        expected: u32,
        /// Computed CRC32 checksum.
        actual: u32,
    },

    /// Structurally invalid store contents.
    #[error("Corrupted store: {0}")]
    Corrupted(String),

    /// The store was closed.
    #[error("Store is closed")]
    StoreClosed,

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}
