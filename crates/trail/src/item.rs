//! Item codec: a `(field, value)` pair packed into one integer.
//!
//! Items come in two widths. The high bit of the lowest byte selects the form:
//!
//! ```text
//! narrow (fits in 32 bits):
//!   bits 31..8   value id (24 bits)
//!   bit  7       0
//!   bits 6..0    field id (7 bits)
//!
//! wide (64 bits):
//!   bits 63..16  value id (48 bits)
//!   bit  15      0
//!   bits 14..8   field id, high 7 bits
//!   bit  7       1
//!   bits 6..0    field id, low 7 bits
//! ```
//!
//! The narrow form is chosen whenever both ids fit it. The all-zero item
//! ([`Item::NULL`]) decodes to field 0 / value 0; field 0 is the timestamp
//! slot, so the null item never occurs in a stored event.

use std::fmt;

/// Field identifier. Field 0 is reserved for the timestamp.
pub type FieldId = u32;

/// Per-field value identifier. Value 0 of every field is the empty value.
pub type ValueId = u64;

/// Number of addressable field ids (14-bit wide form).
pub const MAX_FIELDS: u32 = 1 << 14;

/// Largest field id representable in a narrow item.
pub const MAX_NARROW_FIELD: FieldId = 0x7f;

/// Largest value id representable in a narrow item.
pub const MAX_NARROW_VALUE: ValueId = (1 << 24) - 1;

/// Largest value id representable in a wide item.
pub const MAX_VALUE: ValueId = (1 << 48) - 1;

const WIDE_FLAG: u64 = 0x80;
const LOW7: u64 = 0x7f;

/// An encoded `(field, value)` pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Item(u64);

impl Item {
    /// The item that never appears in any event.
    ///
    /// Filters use it for terms whose value is not in the lexicon.
    pub const NULL: Item = Item(0);

    /// Encodes a field/value pair.
    ///
    /// `field` must be below [`MAX_FIELDS`] and `value` at most [`MAX_VALUE`];
    /// higher bits are discarded. Use [`Item::try_new`] for checked encoding.
    #[inline]
    pub const fn new(field: FieldId, value: ValueId) -> Self {
        let field = field as u64 & (MAX_FIELDS as u64 - 1);
        let value = value & MAX_VALUE;
        if field <= MAX_NARROW_FIELD as u64 && value <= MAX_NARROW_VALUE {
            Item(field | (value << 8))
        } else {
            Item(WIDE_FLAG | (field & LOW7) | ((field >> 7) << 8) | (value << 16))
        }
    }

    /// Encodes a field/value pair, returning `None` if either id is out of range.
    pub const fn try_new(field: FieldId, value: ValueId) -> Option<Self> {
        if field >= MAX_FIELDS || value > MAX_VALUE {
            return None;
        }
        Some(Self::new(field, value))
    }

    /// Reinterprets a raw integer as an item.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Item(raw)
    }

    /// Returns the raw integer.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns true for the 32-bit form.
    #[inline]
    pub const fn is_narrow(self) -> bool {
        self.0 & WIDE_FLAG == 0
    }

    /// Returns the field id.
    #[inline]
    pub const fn field(self) -> FieldId {
        if self.is_narrow() {
            (self.0 & LOW7) as FieldId
        } else {
            ((self.0 & LOW7) | (((self.0 >> 8) & LOW7) << 7)) as FieldId
        }
    }

    /// Returns the value id.
    #[inline]
    pub const fn value(self) -> ValueId {
        if self.is_narrow() {
            (self.0 >> 8) & MAX_NARROW_VALUE
        } else {
            self.0 >> 16
        }
    }

    /// Returns `(field, value)`.
    #[inline]
    pub const fn decode(self) -> (FieldId, ValueId) {
        (self.field(), self.value())
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Item({}:{})", self.field(), self.value())
    }
}

/// Encodes a field/value pair. See [`Item::new`].
#[inline]
pub const fn encode(field: FieldId, value: ValueId) -> Item {
    Item::new(field, value)
}

/// Decodes an item into `(field, value)`.
#[inline]
pub const fn decode(item: Item) -> (FieldId, ValueId) {
    item.decode()
}

/// Returns true if the item uses the narrow form.
#[inline]
pub const fn is_narrow(item: Item) -> bool {
    item.is_narrow()
}
