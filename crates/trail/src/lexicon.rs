//! Lexicon: field names and per-field value dictionaries.
//!
//! Field 0 is always the timestamp field, named [`TIME_FIELD`]; user fields
//! follow in declaration order starting at 1. Every user field's value 0 is
//! the empty byte string, and further values receive sequential ids in
//! first-seen order.
//!
//! During construction the builder owns a mutable lexicon and grows it with
//! [`Lexicon::get_or_insert_value`]. A finalized store owns a read-only copy
//! loaded from the file, stamped with a fingerprint of its serialized form.

use crate::error::{Result, TrailError};
use crate::item::{FieldId, Item, ValueId, MAX_FIELDS, MAX_VALUE};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

/// Name of the reserved timestamp field.
pub const TIME_FIELD: &str = "time";

/// Maximum length of a field name in bytes.
pub const MAX_FIELD_NAME_LENGTH: usize = 255;

/// Maximum length of a single value in bytes.
pub const MAX_VALUE_LENGTH: usize = u32::MAX as usize;

/// Dictionary of the distinct values of one field.
#[derive(Debug, Clone, Default)]
struct ValueDict {
    values: Vec<Arc<[u8]>>,
    ids: HashMap<Arc<[u8]>, ValueId>,
}

impl ValueDict {
    /// Dictionary for a user field, seeded with the empty value at id 0.
    fn seeded() -> Self {
        let mut dict = Self::default();
        dict.push(Arc::from(&b""[..]));
        dict
    }

    fn push(&mut self, value: Arc<[u8]>) -> ValueId {
        let id = self.values.len() as ValueId;
        self.ids.insert(Arc::clone(&value), id);
        self.values.push(value);
        id
    }

    fn get(&self, value: &[u8]) -> Option<ValueId> {
        self.ids.get(value).copied()
    }

    fn resolve(&self, id: ValueId) -> Option<&[u8]> {
        self.values.get(usize::try_from(id).ok()?).map(|v| &v[..])
    }

    fn len(&self) -> u64 {
        self.values.len() as u64
    }
}

/// Bidirectional mapping between field names, field values and their ids.
#[derive(Debug, Clone)]
pub struct Lexicon {
    fields: Vec<String>,
    field_ids: HashMap<String, FieldId>,
    values: Vec<ValueDict>,
    max_value: ValueId,
    fingerprint: u64,
}

impl Lexicon {
    /// Creates a lexicon for the given user field names.
    ///
    /// # Errors
    ///
    /// - `TrailError::NoFields` if `field_names` is empty
    /// - `TrailError::InvalidFieldName` for empty, reserved, over-long names or
    ///   names with characters outside `[A-Za-z0-9_%-]`
    /// - `TrailError::DuplicateFieldName` if a name repeats
    /// - `TrailError::CapacityExceeded` if there are more fields than items
    ///   can address
    pub fn new<S: AsRef<str>>(field_names: &[S]) -> Result<Self> {
        if field_names.is_empty() {
            return Err(TrailError::NoFields);
        }
        if field_names.len() >= MAX_FIELDS as usize {
            return Err(TrailError::CapacityExceeded(format!(
                "{} fields declared, at most {} supported",
                field_names.len(),
                MAX_FIELDS - 1
            )));
        }

        let mut lexicon = Self::empty();
        for name in field_names {
            let name = name.as_ref();
            validate_field_name(name)?;
            lexicon.push_field(name.to_string(), ValueDict::seeded())?;
        }
        Ok(lexicon)
    }

    /// Lexicon holding only the time field.
    fn empty() -> Self {
        let mut field_ids = HashMap::new();
        field_ids.insert(TIME_FIELD.to_string(), 0);
        Self {
            fields: vec![TIME_FIELD.to_string()],
            field_ids,
            values: vec![ValueDict::default()],
            max_value: MAX_VALUE,
            fingerprint: 0,
        }
    }

    fn push_field(&mut self, name: String, dict: ValueDict) -> Result<()> {
        let id = self.fields.len() as FieldId;
        if self.field_ids.contains_key(&name) {
            return Err(TrailError::DuplicateFieldName(name));
        }
        self.field_ids.insert(name.clone(), id);
        self.fields.push(name);
        self.values.push(dict);
        Ok(())
    }

    /// Number of fields, including the time field.
    pub fn num_fields(&self) -> u64 {
        self.fields.len() as u64
    }

    /// Number of user fields (excluding the time field).
    pub fn num_user_fields(&self) -> usize {
        self.fields.len() - 1
    }

    /// Field names indexed by field id; index 0 is [`TIME_FIELD`].
    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    /// Looks up a field id by name.
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.field_ids.get(name).copied()
    }

    /// Looks up a field name by id.
    pub fn field_name(&self, field: FieldId) -> Option<&str> {
        self.fields.get(field as usize).map(String::as_str)
    }

    /// Looks up a value id without inserting.
    pub fn value_id(&self, field: FieldId, value: &[u8]) -> Option<ValueId> {
        self.values.get(field as usize)?.get(value)
    }

    /// Looks up a value id, assigning the next id on first sight.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::UnknownField` for field 0 or an undeclared field,
    /// and `TrailError::CapacityExceeded` when the field has no ids left.
    pub fn get_or_insert_value(&mut self, field: FieldId, value: &[u8]) -> Result<ValueId> {
        if let Some(id) = self.check_value(field, value)? {
            return Ok(id);
        }
        // check_value has resolved the field.
        let dict = &mut self.values[field as usize];
        Ok(dict.push(Arc::from(value)))
    }

    /// Checks that `value` can be interned into `field` without changing the
    /// lexicon. Returns its id if it is already known.
    ///
    /// # Errors
    ///
    /// Same as [`Lexicon::get_or_insert_value`].
    pub fn check_value(&self, field: FieldId, value: &[u8]) -> Result<Option<ValueId>> {
        if field == 0 {
            return Err(TrailError::UnknownField(TIME_FIELD.to_string()));
        }
        let dict = self
            .values
            .get(field as usize)
            .ok_or_else(|| TrailError::UnknownField(format!("#{}", field)))?;

        if let Some(id) = dict.get(value) {
            return Ok(Some(id));
        }
        if dict.len() > self.max_value {
            return Err(TrailError::CapacityExceeded(format!(
                "field {} has more than {} distinct values",
                field, self.max_value
            )));
        }
        if value.len() > MAX_VALUE_LENGTH {
            return Err(TrailError::CapacityExceeded(format!(
                "value of {} bytes in field {}",
                value.len(),
                field
            )));
        }
        Ok(None)
    }

    #[cfg(test)]
    pub(crate) fn with_max_value(mut self, max_value: ValueId) -> Self {
        self.max_value = max_value;
        self
    }

    /// Returns the bytes of a value id.
    pub fn value_bytes(&self, field: FieldId, value: ValueId) -> Option<&[u8]> {
        self.values.get(field as usize)?.resolve(value)
    }

    /// Number of distinct values of a field, including the empty value.
    pub fn lexicon_size(&self, field: FieldId) -> Option<u64> {
        self.values.get(field as usize).map(ValueDict::len)
    }

    /// Resolves a field name and value to an item, if both exist.
    pub fn item(&self, field: &str, value: &[u8]) -> Option<Item> {
        let field = self.field_id(field)?;
        let value = self.value_id(field, value)?;
        Some(Item::new(field, value))
    }

    /// Returns the field name of an item.
    pub fn item_field_name(&self, item: Item) -> Option<&str> {
        self.field_name(item.field())
    }

    /// Returns the value bytes of an item.
    pub fn item_value(&self, item: Item) -> Option<&[u8]> {
        self.value_bytes(item.field(), item.value())
    }

    /// Fingerprint of the serialized lexicon; zero while under construction.
    ///
    /// Two stores with equal fingerprints assign the same meaning to every
    /// item, so filters compiled for one are valid for the other.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub(crate) fn with_fingerprint(mut self, fingerprint: u64) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Writes the lexicon.
    ///
    /// Format:
    /// - field_count: u32
    /// - per field: name_len: u16 + name, value_count: u64,
    ///   then (value_len: u32 + value) for every value id >= 1
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.fields.len() as u32).to_le_bytes())?;

        for (name, dict) in self.fields.iter().zip(&self.values) {
            let name_bytes = name.as_bytes();
            writer.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
            writer.write_all(name_bytes)?;

            writer.write_all(&dict.len().to_le_bytes())?;
            // Value 0 is always the empty value and is not stored.
            for value in dict.values.iter().skip(1) {
                writer.write_all(&(value.len() as u32).to_le_bytes())?;
                writer.write_all(value)?;
            }
        }

        Ok(())
    }

    /// Reads a lexicon written by [`Lexicon::write_to`].
    ///
    /// # Errors
    ///
    /// Returns `TrailError::Corrupted` if the field list is malformed.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf2 = [0u8; 2];
        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];

        reader.read_exact(&mut buf4)?;
        let field_count = u32::from_le_bytes(buf4);
        if field_count < 2 || field_count > MAX_FIELDS {
            return Err(TrailError::Corrupted(format!(
                "lexicon declares {} fields",
                field_count
            )));
        }

        let mut lexicon = Self::empty();
        for field in 0..field_count {
            reader.read_exact(&mut buf2)?;
            let name_len = u16::from_le_bytes(buf2) as usize;
            let mut name_bytes = vec![0u8; name_len];
            reader.read_exact(&mut name_bytes)?;
            let name = String::from_utf8(name_bytes)
                .map_err(|e| TrailError::Corrupted(format!("Invalid UTF-8 in field name: {}", e)))?;

            reader.read_exact(&mut buf8)?;
            let value_count = u64::from_le_bytes(buf8);

            if field == 0 {
                if name != TIME_FIELD || value_count != 0 {
                    return Err(TrailError::Corrupted(format!(
                        "field 0 must be {:?} without values, got {:?}",
                        TIME_FIELD, name
                    )));
                }
                continue;
            }
            if value_count == 0 || value_count > MAX_VALUE + 1 {
                return Err(TrailError::Corrupted(format!(
                    "field {:?} declares {} values",
                    name, value_count
                )));
            }

            let mut dict = ValueDict::seeded();
            for _ in 1..value_count {
                reader.read_exact(&mut buf4)?;
                let value_len = u32::from_le_bytes(buf4) as usize;
                let mut value = vec![0u8; value_len];
                reader.read_exact(&mut value)?;
                if dict.get(&value).is_some() {
                    return Err(TrailError::Corrupted(format!(
                        "duplicate value in field {:?}",
                        name
                    )));
                }
                dict.push(Arc::from(value));
            }

            lexicon
                .push_field(name, dict)
                .map_err(|e| TrailError::Corrupted(e.to_string()))?;
        }

        Ok(lexicon)
    }
}

/// Checks a user field name.
fn validate_field_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != TIME_FIELD
        && name.len() <= MAX_FIELD_NAME_LENGTH
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'%'));
    if valid {
        Ok(())
    } else {
        Err(TrailError::InvalidFieldName(name.to_string()))
    }
}
