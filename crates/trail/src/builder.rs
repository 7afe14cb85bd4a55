//! Trail store construction.
//!
//! A [`TrailBuilder`] accumulates events in memory, grouped by trail, and
//! seals them into an immutable store file on [`TrailBuilder::finalize`].
//!
//! The store is first written to a temporary sibling file (`<name>.tmp`,
//! created when the builder opens) and renamed into place once complete, so
//! `path` never holds a partially written store. Dropping a builder that was
//! never finalized removes the temporary file.

use crate::cursor::{Event, Timestamp};
use crate::error::{Result, TrailError};
use crate::item::{FieldId, Item, ValueId};
use crate::lexicon::Lexicon;
use crate::store::file::{CompressionType, StoreWriter, SyncMode};
use crate::store::TrailStore;
use crate::uuid::TrailUuid;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How [`TrailBuilder::append`] matches the fields of an appended store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppendSchema {
    /// Field counts and every field name must match (default).
    #[default]
    ExactNames,
    /// Only field counts must match; fields are merged by position.
    CountOnly,
}

/// Configuration for a [`TrailBuilder`].
#[derive(Debug, Clone, Default)]
pub struct BuilderConfig {
    /// Block compression of the finished store.
    pub compression: CompressionType,
    /// Field matching policy for appends.
    pub append_schema: AppendSchema,
    /// Durability of the finished file.
    pub sync_mode: SyncMode,
}

impl BuilderConfig {
    /// Sets the block compression.
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the append field matching policy.
    pub fn with_append_schema(mut self, append_schema: AppendSchema) -> Self {
        self.append_schema = append_schema;
        self
    }

    /// Sets the sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }
}

/// Running totals of a builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderStats {
    /// Events added or appended.
    pub event_count: u64,
    /// Distinct trails.
    pub trail_count: u64,
    /// Smallest timestamp seen.
    pub min_timestamp: Option<Timestamp>,
    /// Largest timestamp seen.
    pub max_timestamp: Option<Timestamp>,
}

impl BuilderStats {
    fn record(&mut self, timestamp: Timestamp) {
        self.event_count += 1;
        self.min_timestamp = Some(self.min_timestamp.map_or(timestamp, |t| t.min(timestamp)));
        self.max_timestamp = Some(self.max_timestamp.map_or(timestamp, |t| t.max(timestamp)));
    }
}

/// Builder for a trail store.
pub struct TrailBuilder {
    path: PathBuf,
    tmp_path: PathBuf,
    tmp_file: Option<File>,
    config: BuilderConfig,
    lexicon: Lexicon,
    trails: HashMap<TrailUuid, Vec<Event>>,
    stats: BuilderStats,
    finalized: bool,
}

impl TrailBuilder {
    /// Opens a builder with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::OpenFailure` if the field names are empty or
    /// invalid, or the temporary file next to `path` cannot be created.
    pub fn open<S: AsRef<str>>(path: impl AsRef<Path>, field_names: &[S]) -> Result<Self> {
        Self::open_with_config(path, field_names, BuilderConfig::default())
    }

    /// Opens a builder with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::OpenFailure` if the field names are empty or
    /// invalid, or the temporary file next to `path` cannot be created.
    pub fn open_with_config<S: AsRef<str>>(
        path: impl AsRef<Path>,
        field_names: &[S],
        config: BuilderConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        Self::create(path, field_names, config).map_err(|source| TrailError::OpenFailure {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }

    fn create<S: AsRef<str>>(path: &Path, field_names: &[S], config: BuilderConfig) -> Result<Self> {
        let lexicon = Lexicon::new(field_names)?;
        let tmp_path = temp_path(path)?;
        let tmp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        debug!(
            "Opened trail builder {} with {} fields",
            path.display(),
            lexicon.num_user_fields()
        );

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            tmp_file: Some(tmp_file),
            config,
            lexicon,
            trails: HashMap::new(),
            stats: BuilderStats::default(),
            finalized: false,
        })
    }

    /// Target path of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Builder configuration.
    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Lexicon built so far.
    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Field names including `time` at index 0.
    pub fn field_names(&self) -> &[String] {
        self.lexicon.field_names()
    }

    /// Running totals.
    pub fn stats(&self) -> &BuilderStats {
        &self.stats
    }

    /// Returns true once the store has been sealed.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Adds an event to the trail identified by a canonical uuid string.
    ///
    /// `values` are aligned with the declared fields; missing trailing values
    /// are stored as the empty value.
    ///
    /// # Errors
    ///
    /// - `TrailError::InvalidUuid` if `uuid` is malformed
    /// - `TrailError::TooManyValues` if there are more values than fields
    /// - `TrailError::AlreadyFinalized` after finalize or close
    pub fn add<V: AsRef<[u8]>>(&mut self, uuid: &str, timestamp: Timestamp, values: &[V]) -> Result<()> {
        let uuid = TrailUuid::parse(uuid)?;
        self.add_uuid(uuid, timestamp, values)
    }

    /// Adds an event to the trail identified by `uuid`.
    ///
    /// # Errors
    ///
    /// - `TrailError::TooManyValues` if there are more values than fields
    /// - `TrailError::AlreadyFinalized` after finalize or close
    /// - `TrailError::CapacityExceeded` if a field runs out of value ids
    ///
    /// A rejected event interns none of its values.
    pub fn add_uuid<V: AsRef<[u8]>>(
        &mut self,
        uuid: TrailUuid,
        timestamp: Timestamp,
        values: &[V],
    ) -> Result<()> {
        if self.finalized {
            return Err(TrailError::AlreadyFinalized);
        }
        let num_fields = self.lexicon.num_user_fields();
        if values.len() > num_fields {
            return Err(TrailError::TooManyValues {
                supplied: values.len(),
                fields: num_fields,
            });
        }

        let value_of = |index: usize| values.get(index).map_or(&b""[..], AsRef::as_ref);

        // Every value must fit before any is interned.
        for index in 0..num_fields {
            self.lexicon
                .check_value((index + 1) as FieldId, value_of(index))?;
        }

        let mut items = Vec::with_capacity(num_fields);
        for index in 0..num_fields {
            let field = (index + 1) as FieldId;
            let id = self.lexicon.get_or_insert_value(field, value_of(index))?;
            items.push(Item::new(field, id));
        }

        self.push_event(uuid, Event { timestamp, items });
        Ok(())
    }

    fn push_event(&mut self, uuid: TrailUuid, event: Event) {
        self.stats.record(event.timestamp);
        let trail = self.trails.entry(uuid).or_default();
        if trail.is_empty() {
            self.stats.trail_count += 1;
        }
        trail.push(event);
    }

    /// Merges every trail of a finalized store into this builder.
    ///
    /// Values are re-keyed through this builder's lexicon; trails whose uuid
    /// is already present are merged and re-sorted at finalize.
    ///
    /// # Errors
    ///
    /// - `TrailError::FieldCountMismatch` if the stores declare a different
    ///   number of fields
    /// - `TrailError::FieldNameMismatch` if a name differs under
    ///   [`AppendSchema::ExactNames`]
    /// - `TrailError::AlreadyFinalized` after finalize or close
    /// - `TrailError::IterationFailure` if reading `store` fails
    ///
    /// A failed append leaves the builder as it was.
    pub fn append(&mut self, store: &TrailStore) -> Result<()> {
        if self.finalized {
            return Err(TrailError::AlreadyFinalized);
        }
        if store.num_fields() != self.lexicon.num_fields() {
            return Err(TrailError::FieldCountMismatch {
                expected: self.lexicon.num_fields(),
                actual: store.num_fields(),
            });
        }
        if self.config.append_schema == AppendSchema::ExactNames {
            let ours = self.lexicon.field_names();
            let theirs = store.field_names();
            if let Some(field) = (1..ours.len()).find(|&f| ours[f] != theirs[f]) {
                return Err(TrailError::FieldNameMismatch {
                    field: field as FieldId,
                    expected: ours[field].clone(),
                    actual: theirs[field].clone(),
                });
            }
        }

        // Stage everything; the builder only changes once the whole store
        // has been read.
        let mut lexicon = self.lexicon.clone();
        let remap = value_remap(&mut lexicon, store.lexicon())?;
        let mut staged: Vec<(TrailUuid, Event)> = Vec::new();

        let mut cursor = store.cursor();
        for ordinal in store.trail_ordinals() {
            let uuid = store.uuid_of(ordinal).ok_or_else(|| {
                TrailError::Corrupted(format!("trail ordinal {} has no uuid", ordinal))
            })?;
            cursor.bind(ordinal)?;
            while let Some(event) = cursor.next_event()? {
                let items = event
                    .items
                    .iter()
                    .map(|item| {
                        let (field, value) = item.decode();
                        let id = remap
                            .get(field as usize)
                            .and_then(|values| values.get(usize::try_from(value).ok()?))
                            .copied()
                            .ok_or_else(|| {
                                TrailError::Corrupted(format!(
                                    "item {:?} of trail {} not in lexicon",
                                    item, uuid
                                ))
                            })?;
                        Ok(Item::new(field, id))
                    })
                    .collect::<Result<Vec<_>>>()?;
                staged.push((
                    uuid,
                    Event {
                        timestamp: event.timestamp,
                        items,
                    },
                ));
            }
        }

        self.lexicon = lexicon;
        for (uuid, event) in staged {
            self.push_event(uuid, event);
        }

        debug!(
            "Appended {} trails ({} events) from {}",
            store.num_trails(),
            store.num_events(),
            store.path().display()
        );
        Ok(())
    }

    /// Seals the store and opens it.
    ///
    /// The seal runs once; later calls only reopen the finished file.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::FinalizeFailure` if writing the store fails, or
    /// `TrailError::OpenFailure` if the finished store cannot be reopened.
    pub fn finalize(&mut self) -> Result<TrailStore> {
        self.seal()?;
        TrailStore::open(&self.path)
    }

    /// Finalizes if needed and releases the builder's memory. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::FinalizeFailure` if the implicit finalize fails.
    pub fn close(&mut self) -> Result<()> {
        self.seal()
    }

    fn seal(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.write_store()
            .map_err(|e| TrailError::FinalizeFailure(Box::new(e)))?;

        self.finalized = true;
        self.trails = HashMap::new();
        info!(
            "Finalized trail store {}: {} trails, {} events",
            self.path.display(),
            self.stats.trail_count,
            self.stats.event_count
        );
        Ok(())
    }

    fn write_store(&mut self) -> Result<()> {
        let file = match self.tmp_file.take() {
            Some(file) => file,
            None => File::create(&self.tmp_path)?,
        };
        let mut writer = StoreWriter::new(
            file,
            &self.tmp_path,
            self.config.compression,
            self.lexicon.num_user_fields(),
        )?;

        let mut uuids: Vec<TrailUuid> = self.trails.keys().copied().collect();
        uuids.sort_unstable();
        for uuid in uuids {
            if let Some(events) = self.trails.get_mut(&uuid) {
                // Stable: events with equal timestamps keep insertion order.
                events.sort_by_key(|event| event.timestamp);
                writer.write_trail(uuid, events)?;
            }
        }

        writer.finish(&self.lexicon, self.config.sync_mode)?;
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}

impl Drop for TrailBuilder {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        self.tmp_file = None;
        match fs::remove_file(&self.tmp_path) {
            Ok(()) => debug!(
                "Discarded unfinalized trail builder {}",
                self.path.display()
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove {} on drop: {}",
                self.tmp_path.display(),
                e
            ),
        }
    }
}

/// Maps every value id of `other` to an id in `lexicon`, interning values
/// `lexicon` has not seen.
fn value_remap(lexicon: &mut Lexicon, other: &Lexicon) -> Result<Vec<Vec<ValueId>>> {
    let mut remap = vec![Vec::new()];
    for field in 1..other.num_fields() as FieldId {
        let size = other.lexicon_size(field).unwrap_or(0);
        let mut ids = Vec::with_capacity(size as usize);
        for value in 0..size {
            let bytes = other.value_bytes(field, value).ok_or_else(|| {
                TrailError::Corrupted(format!("value {} of field {} missing", value, field))
            })?;
            ids.push(lexicon.get_or_insert_value(field, bytes)?);
        }
        remap.push(ids);
    }
    Ok(remap)
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "store path has no file name")
    })?;
    let mut tmp = name.to_os_string();
    tmp.push(".tmp");
    Ok(path.with_file_name(tmp))
}
