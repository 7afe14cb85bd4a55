//! Cursors: streaming, optionally filtered reads of one trail.
//!
//! ```text
//! Unbound ──bind──▶ Bound ──next──▶ Iterating ──▶ Exhausted
//!    ▲                 ▲                              │
//!    │                 └────────────bind──────────────┘
//!    └── free() from any state leads to Freed
//! ```
//!
//! A cursor decodes its trail lazily: binding only records the ordinal, the
//! block is read on the first advance and dropped once the trail is
//! exhausted. Iteration is single-pass; rebinding restarts it.

use crate::error::{Result, TrailError};
use crate::filter::{EventFilter, FilterSpec};
use crate::item::Item;
use crate::lexicon::Lexicon;
use crate::store::encoding::EventDecoder;
use crate::store::StoreShared;
use crate::uuid::TrailUuid;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Event timestamp. Units are chosen by the writer.
pub type Timestamp = u64;

/// A decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    /// Event timestamp.
    pub timestamp: Timestamp,
    /// Items in stored order; stores written by the builder hold one item
    /// per user field.
    pub items: Vec<Item>,
}

impl Event {
    /// Value bytes of every item, in item order.
    pub fn values<'a>(&self, lexicon: &'a Lexicon) -> Vec<&'a [u8]> {
        self.items
            .iter()
            .filter_map(|&item| lexicon.item_value(item))
            .collect()
    }

    /// Field name to value bytes. A field that occurs twice keeps its last
    /// value.
    pub fn to_map<'a>(&self, lexicon: &'a Lexicon) -> BTreeMap<&'a str, &'a [u8]> {
        self.items
            .iter()
            .filter_map(|&item| Some((lexicon.item_field_name(item)?, lexicon.item_value(item)?)))
            .collect()
    }

    /// Like [`Event::to_map`] with values decoded as UTF-8, replacing
    /// invalid sequences.
    pub fn to_string_map<'a>(&self, lexicon: &'a Lexicon) -> BTreeMap<&'a str, Cow<'a, str>> {
        self.to_map(lexicon)
            .into_iter()
            .map(|(field, value)| (field, String::from_utf8_lossy(value)))
            .collect()
    }
}

/// Lifecycle state of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No trail bound.
    Unbound,
    /// Bound to a trail, nothing read yet.
    Bound,
    /// Reading events.
    Iterating,
    /// No further events; advancing reports completion again.
    Exhausted,
    /// Released; every advance reports completion.
    Freed,
}

/// Cursor over the events of one trail.
///
/// Created by [`TrailStore::cursor`](crate::TrailStore::cursor). A cursor
/// keeps the store's file open; it is `Send` but not meant to be shared
/// between threads, so give each thread its own.
pub struct TrailCursor {
    store: Arc<StoreShared>,
    state: CursorState,
    ordinal: Option<u64>,
    filter: Option<Arc<EventFilter>>,
    decoder: Option<EventDecoder>,
    event: Event,
    failed: bool,
}

impl std::fmt::Debug for TrailCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrailCursor")
            .field("state", &self.state)
            .field("ordinal", &self.ordinal)
            .field("filter", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

impl TrailCursor {
    pub(crate) fn new(store: Arc<StoreShared>) -> Self {
        Self {
            store,
            state: CursorState::Unbound,
            ordinal: None,
            filter: None,
            decoder: None,
            event: Event::default(),
            failed: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Bound trail ordinal.
    pub fn ordinal(&self) -> Option<u64> {
        self.ordinal
    }

    /// Uuid of the bound trail.
    pub fn uuid(&self) -> Option<TrailUuid> {
        self.store.entry(self.ordinal?).map(|entry| entry.uuid)
    }

    /// Binds the cursor to a trail and resets iteration.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::CursorBindFailure` if the ordinal is out of
    /// range, the store is closed, or the cursor was freed.
    pub fn bind(&mut self, ordinal: u64) -> Result<()> {
        let reason = if self.state == CursorState::Freed {
            Some("cursor was freed")
        } else if self.store.is_closed() {
            Some("store is closed")
        } else if ordinal >= self.store.num_trails() {
            Some("ordinal out of range")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(TrailError::CursorBindFailure { ordinal, reason });
        }

        self.ordinal = Some(ordinal);
        self.decoder = None;
        self.event.items.clear();
        self.failed = false;
        self.state = CursorState::Bound;
        Ok(())
    }

    /// Raw number of events in the bound trail, ignoring the filter; 0 when
    /// unbound.
    pub fn length(&self) -> u64 {
        self.ordinal
            .and_then(|ordinal| self.store.entry(ordinal))
            .map_or(0, |entry| entry.event_count)
    }

    /// Attaches a filter; it applies from the next advance on.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::FilterAttachFailure` if the filter was compiled
    /// against a lexicon other than this store's.
    pub fn set_filter(&mut self, filter: Arc<EventFilter>) -> Result<()> {
        let store = self.store.lexicon().fingerprint();
        if let Some(fingerprint) = filter.lexicon_fingerprint() {
            if fingerprint != store {
                return Err(TrailError::FilterAttachFailure {
                    filter: fingerprint,
                    store,
                });
            }
        }
        self.filter = Some(filter);
        Ok(())
    }

    /// Compiles specs against the store's lexicon and attaches the result.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::UnknownField` if a spec names a missing field.
    pub fn with_filter_specs(&mut self, specs: &[FilterSpec]) -> Result<()> {
        let filter = EventFilter::compile(self.store.lexicon(), specs)?;
        self.set_filter(Arc::new(filter))
    }

    /// Detaches the filter.
    pub fn clear_filter(&mut self) {
        self.filter = None;
    }

    /// Attached filter.
    pub fn filter(&self) -> Option<&Arc<EventFilter>> {
        self.filter.as_ref()
    }

    /// Lexicon of the cursor's store.
    pub fn lexicon(&self) -> &Lexicon {
        self.store.lexicon()
    }

    /// Advances to the next event that passes the filter.
    ///
    /// Returns `Ok(None)` once the trail is exhausted, and on every call
    /// after that.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::IterationFailure` if the store was closed or the
    /// trail block is corrupt. After a corrupt block the cursor is
    /// exhausted; after a close every advance fails.
    pub fn next_event(&mut self) -> Result<Option<&Event>> {
        let ordinal = match (self.state, self.ordinal) {
            (CursorState::Unbound | CursorState::Freed, _) | (_, None) => return Ok(None),
            (_, Some(ordinal)) => ordinal,
        };

        if self.store.is_closed() {
            self.decoder = None;
            return Err(TrailError::IterationFailure {
                ordinal,
                source: Box::new(TrailError::StoreClosed),
            });
        }
        if self.state == CursorState::Exhausted {
            return Ok(None);
        }

        if self.decoder.is_none() {
            match self.store.read_block(ordinal) {
                Ok(block) => {
                    let num_user_fields = self.store.lexicon().num_user_fields();
                    self.decoder = Some(EventDecoder::new(
                        block.payload,
                        block.event_count,
                        num_user_fields,
                    ));
                    self.state = CursorState::Iterating;
                }
                Err(e) => return Err(self.fail(ordinal, e)),
            }
        }

        loop {
            let Some(decoder) = self.decoder.as_mut() else {
                self.state = CursorState::Exhausted;
                return Ok(None);
            };
            match decoder.next_event() {
                Ok(Some(timestamp)) => {
                    let pass = self
                        .filter
                        .as_ref()
                        .map_or(true, |filter| filter.matches(decoder.current()));
                    if pass {
                        self.event.timestamp = timestamp;
                        self.event.items.clear();
                        self.event.items.extend_from_slice(decoder.current());
                        return Ok(Some(&self.event));
                    }
                }
                Ok(None) => {
                    self.decoder = None;
                    self.state = CursorState::Exhausted;
                    return Ok(None);
                }
                Err(e) => return Err(self.fail(ordinal, e)),
            }
        }
    }

    fn fail(&mut self, ordinal: u64, source: TrailError) -> TrailError {
        warn!("Iteration over trail {} failed: {}", ordinal, source);
        self.decoder = None;
        self.state = CursorState::Exhausted;
        TrailError::IterationFailure {
            ordinal,
            source: Box::new(source),
        }
    }

    /// Releases the decode buffer and the filter reference. Idempotent.
    pub fn free(&mut self) {
        self.state = CursorState::Freed;
        self.ordinal = None;
        self.filter = None;
        self.decoder = None;
        self.event = Event::default();
    }
}

/// Yields owned events; stops after the first error.
impl Iterator for TrailCursor {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event.clone())),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
