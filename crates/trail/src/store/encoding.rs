//! Per-trail event encoding.
//!
//! A trail block stores two payloads:
//!
//! ## Timestamps
//!
//! - `Raw`: 8 bytes LE per event.
//! - `DeltaOfDelta`: first value 64 bits raw, then a variable-length code per
//!   event based on the delta-of-delta:
//!   - `0`: `'0'` (1 bit)
//!   - `[-63, 64]`: `'10'` + 7 bits
//!   - `[-255, 256]`: `'110'` + 9 bits
//!   - `[-2047, 2048]`: `'1110'` + 12 bits
//!   - else: `'1111'` + 64 bits
//!
//!   Deltas use wrapping arithmetic so any `u64` sequence round-trips.
//!
//! ## Items
//!
//! Items are written as LEB128 varints of their raw integer form.
//!
//! - `Raw`: per event, the item count followed by every item.
//! - `Edge`: per event, the number of changed fields followed by the items
//!   that differ from the previous event of the same trail. The state before
//!   the first event holds value 0 (the empty value) for every field. Only
//!   trails whose events carry every field in order are edge encoded; others
//!   are stored `Raw`.

use crate::cursor::{Event, Timestamp};
use crate::error::{Result, TrailError};
use crate::item::Item;
use bitvec::prelude::*;

/// Timestamp encoding of a trail block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TimestampEncoding {
    /// 8 bytes per timestamp.
    Raw = 0,
    /// Delta-of-delta bit stream.
    #[default]
    DeltaOfDelta = 1,
}

impl TimestampEncoding {
    /// Creates a TimestampEncoding from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Raw),
            1 => Some(Self::DeltaOfDelta),
            _ => None,
        }
    }
}

/// Item encoding of a trail block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ItemEncoding {
    /// Every item of every event.
    Raw = 0,
    /// Only items that changed since the previous event.
    #[default]
    Edge = 1,
}

impl ItemEncoding {
    /// Creates an ItemEncoding from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Raw),
            1 => Some(Self::Edge),
            _ => None,
        }
    }
}

/// Encode an unsigned 64-bit integer as LEB128 into `buf`.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a LEB128 unsigned 64-bit integer from `buf` starting at `*pos`.
/// Advances `*pos` past the consumed bytes.
pub fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| TrailError::Corrupted("truncated varint".to_string()))?;
        *pos += 1;

        let payload = (byte & 0x7F) as u64;
        if shift >= 63 && payload > 1 {
            return Err(TrailError::Corrupted("varint overflow".to_string()));
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

fn push_bits(output: &mut BitVec<u8, Msb0>, value: u64, width: u32) {
    for i in (0..width).rev() {
        output.push((value >> i) & 1 == 1);
    }
}

/// Encoder for timestamps using delta-of-delta encoding.
#[derive(Debug, Default)]
pub struct TimestampEncoder {
    started: bool,
    prev_ts: u64,
    prev_delta: i64,
}

impl TimestampEncoder {
    /// Creates a new timestamp encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a timestamp into the output bit vector.
    pub fn encode(&mut self, timestamp: Timestamp, output: &mut BitVec<u8, Msb0>) {
        if !self.started {
            self.started = true;
            self.prev_ts = timestamp;
            self.prev_delta = 0;
            push_bits(output, timestamp, 64);
            return;
        }

        let delta = timestamp.wrapping_sub(self.prev_ts) as i64;
        let delta_of_delta = delta.wrapping_sub(self.prev_delta);

        if delta_of_delta == 0 {
            output.push(false);
        } else if (-63..=64).contains(&delta_of_delta) {
            push_bits(output, 0b10, 2);
            push_bits(output, (delta_of_delta + 63) as u64, 7);
        } else if (-255..=256).contains(&delta_of_delta) {
            push_bits(output, 0b110, 3);
            push_bits(output, (delta_of_delta + 255) as u64, 9);
        } else if (-2047..=2048).contains(&delta_of_delta) {
            push_bits(output, 0b1110, 4);
            push_bits(output, (delta_of_delta + 2047) as u64, 12);
        } else {
            push_bits(output, 0b1111, 4);
            push_bits(output, delta_of_delta as u64, 64);
        }

        self.prev_delta = delta;
        self.prev_ts = timestamp;
    }
}

/// Decoder for delta-of-delta encoded timestamps.
#[derive(Debug)]
pub struct TimestampDecoder {
    data: BitVec<u8, Msb0>,
    pos: usize,
    started: bool,
    prev_ts: u64,
    prev_delta: i64,
}

impl TimestampDecoder {
    /// Creates a new timestamp decoder over an encoded bit stream.
    pub fn new(data: BitVec<u8, Msb0>) -> Self {
        Self {
            data,
            pos: 0,
            started: false,
            prev_ts: 0,
            prev_delta: 0,
        }
    }

    fn read_bit(&mut self) -> Option<bool> {
        let bit = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(bit)
    }

    fn read_bits(&mut self, width: usize) -> Option<u64> {
        if self.pos + width > self.data.len() {
            return None;
        }
        let mut value = 0u64;
        for bit in &self.data[self.pos..self.pos + width] {
            value = (value << 1) | u64::from(*bit);
        }
        self.pos += width;
        Some(value)
    }

    /// Decodes the next timestamp, or `None` if the stream is exhausted or
    /// truncated.
    pub fn decode_next(&mut self) -> Option<Timestamp> {
        if !self.started {
            let ts = self.read_bits(64)?;
            self.started = true;
            self.prev_ts = ts;
            self.prev_delta = 0;
            return Some(ts);
        }

        let delta_of_delta = if !self.read_bit()? {
            0
        } else if !self.read_bit()? {
            self.read_bits(7)? as i64 - 63
        } else if !self.read_bit()? {
            self.read_bits(9)? as i64 - 255
        } else if !self.read_bit()? {
            self.read_bits(12)? as i64 - 2047
        } else {
            self.read_bits(64)? as i64
        };

        let delta = self.prev_delta.wrapping_add(delta_of_delta);
        let ts = self.prev_ts.wrapping_add(delta as u64);
        self.prev_delta = delta;
        self.prev_ts = ts;

        Some(ts)
    }
}

/// Encoded payloads of one trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTrail {
    /// Timestamp encoding used for `ts_data`.
    pub ts_encoding: TimestampEncoding,
    /// Item encoding used for `item_data`.
    pub item_encoding: ItemEncoding,
    /// Encoded timestamps.
    pub ts_data: Vec<u8>,
    /// Encoded items.
    pub item_data: Vec<u8>,
}

impl EncodedTrail {
    /// Encodes the events of one trail.
    ///
    /// `ItemEncoding::Edge` needs every event to carry exactly one item per
    /// field, for fields `1..=num_user_fields` in order, as the builder
    /// produces. A trail with any other event falls back to
    /// `ItemEncoding::Raw`; check [`EncodedTrail::item_encoding`] for the
    /// encoding actually used.
    pub fn encode(
        events: &[Event],
        ts_encoding: TimestampEncoding,
        item_encoding: ItemEncoding,
        num_user_fields: usize,
    ) -> Self {
        let item_encoding = match item_encoding {
            ItemEncoding::Edge
                if !events
                    .iter()
                    .all(|event| has_every_field(event, num_user_fields)) =>
            {
                ItemEncoding::Raw
            }
            other => other,
        };

        let ts_data = match ts_encoding {
            TimestampEncoding::Raw => {
                let mut out = Vec::with_capacity(events.len() * 8);
                for event in events {
                    out.extend_from_slice(&event.timestamp.to_le_bytes());
                }
                out
            }
            TimestampEncoding::DeltaOfDelta => {
                let mut bits = BitVec::<u8, Msb0>::new();
                let mut encoder = TimestampEncoder::new();
                for event in events {
                    encoder.encode(event.timestamp, &mut bits);
                }
                bits.set_uninitialized(false);
                bits.into_vec()
            }
        };

        let mut item_data = Vec::new();
        match item_encoding {
            ItemEncoding::Raw => {
                for event in events {
                    encode_varint(event.items.len() as u64, &mut item_data);
                    for item in &event.items {
                        encode_varint(item.raw(), &mut item_data);
                    }
                }
            }
            ItemEncoding::Edge => {
                let mut current = initial_state(num_user_fields);
                let mut changed = Vec::with_capacity(num_user_fields);
                for event in events {
                    changed.clear();
                    for (slot, &item) in event.items.iter().enumerate() {
                        if current[slot] != item {
                            current[slot] = item;
                            changed.push(item);
                        }
                    }
                    encode_varint(changed.len() as u64, &mut item_data);
                    for item in &changed {
                        encode_varint(item.raw(), &mut item_data);
                    }
                }
            }
        }

        Self {
            ts_encoding,
            item_encoding,
            ts_data,
            item_data,
        }
    }
}

fn initial_state(num_user_fields: usize) -> Vec<Item> {
    (1..=num_user_fields as u32).map(|f| Item::new(f, 0)).collect()
}

fn slot_of(item: Item, num_user_fields: usize) -> Option<usize> {
    let field = item.field() as usize;
    (1..=num_user_fields).contains(&field).then(|| field - 1)
}

/// True if `event` holds one item for each field `1..=num_user_fields`, in
/// field order.
fn has_every_field(event: &Event, num_user_fields: usize) -> bool {
    event.items.len() == num_user_fields
        && event
            .items
            .iter()
            .zip(1..)
            .all(|(item, field)| item.field() == field)
}

enum TimestampSource {
    Raw { data: Vec<u8>, pos: usize },
    DeltaOfDelta(TimestampDecoder),
}

/// Streaming decoder over the payloads of one trail.
///
/// Decodes one event per call; the items of the most recent event are
/// available through [`EventDecoder::current`] until the next call.
pub struct EventDecoder {
    timestamps: TimestampSource,
    item_encoding: ItemEncoding,
    item_data: Vec<u8>,
    item_pos: usize,
    num_user_fields: usize,
    current: Vec<Item>,
    remaining: u64,
}

impl std::fmt::Debug for EventDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDecoder")
            .field("item_encoding", &self.item_encoding)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl EventDecoder {
    /// Creates a decoder for `event_count` events.
    pub fn new(payload: EncodedTrail, event_count: u64, num_user_fields: usize) -> Self {
        let timestamps = match payload.ts_encoding {
            TimestampEncoding::Raw => TimestampSource::Raw {
                data: payload.ts_data,
                pos: 0,
            },
            TimestampEncoding::DeltaOfDelta => TimestampSource::DeltaOfDelta(
                TimestampDecoder::new(BitVec::from_vec(payload.ts_data)),
            ),
        };
        let current = match payload.item_encoding {
            ItemEncoding::Raw => Vec::new(),
            ItemEncoding::Edge => initial_state(num_user_fields),
        };

        Self {
            timestamps,
            item_encoding: payload.item_encoding,
            item_data: payload.item_data,
            item_pos: 0,
            num_user_fields,
            current,
            remaining: event_count,
        }
    }

    /// Number of events not yet decoded.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Items of the most recently decoded event.
    pub fn current(&self) -> &[Item] {
        &self.current
    }

    /// Decodes the next event and returns its timestamp, or `None` when all
    /// events have been decoded.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::Corrupted` if a payload ends early or holds an
    /// item for an undeclared field.
    pub fn next_event(&mut self) -> Result<Option<Timestamp>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let timestamp = self.next_timestamp()?;

        let count = decode_varint(&self.item_data, &mut self.item_pos)?;
        if count > (self.item_data.len() - self.item_pos) as u64 {
            return Err(TrailError::Corrupted(format!(
                "event declares {} items, {} bytes left",
                count,
                self.item_data.len() - self.item_pos
            )));
        }

        match self.item_encoding {
            ItemEncoding::Raw => {
                self.current.clear();
                for _ in 0..count {
                    let raw = decode_varint(&self.item_data, &mut self.item_pos)?;
                    self.current.push(Item::from_raw(raw));
                }
            }
            ItemEncoding::Edge => {
                for _ in 0..count {
                    let item = Item::from_raw(decode_varint(&self.item_data, &mut self.item_pos)?);
                    let slot = slot_of(item, self.num_user_fields).ok_or_else(|| {
                        TrailError::Corrupted(format!("item for undeclared field {}", item.field()))
                    })?;
                    self.current[slot] = item;
                }
            }
        }

        self.remaining -= 1;
        Ok(Some(timestamp))
    }

    fn next_timestamp(&mut self) -> Result<Timestamp> {
        let truncated = || TrailError::Corrupted("truncated timestamp payload".to_string());
        match &mut self.timestamps {
            TimestampSource::Raw { data, pos } => {
                let bytes = data.get(*pos..*pos + 8).ok_or_else(truncated)?;
                *pos += 8;
                let mut buf8 = [0u8; 8];
                buf8.copy_from_slice(bytes);
                Ok(u64::from_le_bytes(buf8))
            }
            TimestampSource::DeltaOfDelta(decoder) => decoder.decode_next().ok_or_else(truncated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timestamp: Timestamp, items: &[(u32, u64)]) -> Event {
        Event {
            timestamp,
            items: items.iter().map(|&(f, v)| Item::new(f, v)).collect(),
        }
    }

    fn decode_all(encoded: EncodedTrail, count: u64, fields: usize) -> Vec<Event> {
        let mut decoder = EventDecoder::new(encoded, count, fields);
        let mut out = Vec::new();
        while let Some(timestamp) = decoder.next_event().unwrap() {
            out.push(Event {
                timestamp,
                items: decoder.current().to_vec(),
            });
        }
        out
    }

    fn roundtrip_timestamps(timestamps: &[u64]) -> Vec<u64> {
        let mut bits = BitVec::<u8, Msb0>::new();
        let mut encoder = TimestampEncoder::new();
        for &ts in timestamps {
            encoder.encode(ts, &mut bits);
        }
        let mut decoder = TimestampDecoder::new(bits);
        timestamps.iter().map(|_| decoder.decode_next().unwrap()).collect()
    }

    #[test]
    fn test_varint_roundtrip() {
        let mut buf = Vec::new();
        for value in [0, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            buf.clear();
            encode_varint(value, &mut buf);
            let mut pos = 0;
            assert_eq!(decode_varint(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_varint_truncated() {
        let mut pos = 0;
        assert!(matches!(
            decode_varint(&[0x80, 0x80], &mut pos),
            Err(TrailError::Corrupted(_))
        ));
    }

    #[test]
    fn test_timestamp_encoder_zero_delta() {
        let mut bits = BitVec::<u8, Msb0>::new();
        let mut encoder = TimestampEncoder::new();
        for ts in [100, 110, 120, 130] {
            encoder.encode(ts, &mut bits);
        }
        // 64 bits raw, '10'+7 for the first delta, then '0' twice.
        assert_eq!(bits.len(), 64 + 9 + 1 + 1);
    }

    #[test]
    fn test_timestamp_buckets_roundtrip() {
        let timestamps = [
            1_000, 1_000, 1_064, 1_100, 1_400, 3_000, 9_000_000, 9_000_001,
        ];
        assert_eq!(roundtrip_timestamps(&timestamps), timestamps);
    }

    #[test]
    fn test_timestamp_extremes_roundtrip() {
        let timestamps = [0, u64::MAX, 0, u64::MAX / 2, 1, u64::MAX];
        assert_eq!(roundtrip_timestamps(&timestamps), timestamps);
    }

    #[test]
    fn test_timestamp_decoder_truncated() {
        let mut bits = BitVec::<u8, Msb0>::new();
        push_bits(&mut bits, 7, 32);
        let mut decoder = TimestampDecoder::new(bits);
        assert_eq!(decoder.decode_next(), None);
    }

    #[test]
    fn test_edge_encoding_emits_changes_only() {
        let events = vec![
            event(1, &[(1, 0), (2, 0)]),
            event(2, &[(1, 1), (2, 0)]),
            event(3, &[(1, 1), (2, 0)]),
        ];
        let encoded = EncodedTrail::encode(
            &events,
            TimestampEncoding::DeltaOfDelta,
            ItemEncoding::Edge,
            2,
        );
        assert_eq!(encoded.item_encoding, ItemEncoding::Edge);
        // counts 0, 1, 0 around one two-byte item (257)
        assert_eq!(encoded.item_data, vec![0, 1, 0x81, 0x02, 0]);
        assert_eq!(decode_all(encoded, 3, 2), events);
    }

    #[test]
    fn test_raw_encoding_roundtrip() {
        let events = vec![
            event(5, &[(1, 3), (2, 70_000)]),
            event(5, &[(1, 0), (2, 1)]),
            event(9, &[(1, 3), (2, 1)]),
        ];
        let encoded =
            EncodedTrail::encode(&events, TimestampEncoding::Raw, ItemEncoding::Raw, 2);
        assert_eq!(encoded.ts_data.len(), 24);
        assert_eq!(decode_all(encoded, 3, 2), events);
    }

    #[test]
    fn test_wide_items_roundtrip() {
        let dense = |ts: u64, last: u64| {
            let mut items: Vec<(u32, u64)> = (1..200).map(|f| (f, 0)).collect();
            items[0] = (1, 1 << 30);
            items.push((200, last));
            event(ts, &items)
        };
        let events = vec![dense(10, 5), dense(20, 6)];
        let encoded = EncodedTrail::encode(
            &events,
            TimestampEncoding::DeltaOfDelta,
            ItemEncoding::Edge,
            200,
        );
        assert_eq!(encoded.item_encoding, ItemEncoding::Edge);
        let decoded = decode_all(encoded, 2, 200);
        assert_eq!(decoded, events);
        assert_eq!(decoded[1].items[0], Item::new(1, 1 << 30));
        assert_eq!(decoded[1].items[199], Item::new(200, 6));
        assert_eq!(decoded[1].items[5], Item::new(6, 0));
    }

    #[test]
    fn test_irregular_events_fall_back_to_raw() {
        // A missing field, a repeated field and an undeclared field.
        let events = vec![
            event(1, &[(1, 1), (2, 1)]),
            event(2, &[(1, 2)]),
            event(3, &[(1, 1), (1, 2)]),
            event(4, &[(2, 3), (1, 1)]),
            event(5, &[(1, 1), (2, 1), (3, 1)]),
        ];
        let encoded = EncodedTrail::encode(
            &events,
            TimestampEncoding::DeltaOfDelta,
            ItemEncoding::Edge,
            2,
        );
        assert_eq!(encoded.item_encoding, ItemEncoding::Raw);
        assert_eq!(decode_all(encoded, 5, 2), events);
    }

    #[test]
    fn test_decoder_detects_truncated_items() {
        let events = vec![event(1, &[(1, 1)]), event(2, &[(1, 2)])];
        let mut encoded =
            EncodedTrail::encode(&events, TimestampEncoding::Raw, ItemEncoding::Edge, 1);
        encoded.item_data.truncate(4);

        let mut decoder = EventDecoder::new(encoded, 2, 1);
        assert!(decoder.next_event().unwrap().is_some());
        assert!(matches!(decoder.next_event(), Err(TrailError::Corrupted(_))));
    }

    #[test]
    fn test_empty_trail() {
        let encoded =
            EncodedTrail::encode(&[], TimestampEncoding::DeltaOfDelta, ItemEncoding::Edge, 2);
        assert!(encoded.ts_data.is_empty());
        assert!(encoded.item_data.is_empty());
        let mut decoder = EventDecoder::new(encoded, 0, 2);
        assert_eq!(decoder.next_event().unwrap(), None);
    }
}
