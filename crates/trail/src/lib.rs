//! Alopex Trail - Embedded Event Trail Store
//!
//! This crate stores timestamped events grouped into trails, one trail per
//! entity uuid, in an immutable, memory-mapped file.
//!
//! # Components
//!
//! - [`TrailBuilder`]: Accumulates events and seals them into a store
//! - [`TrailStore`]: Opened, read-only store with trail and lexicon lookups
//! - [`TrailCursor`]: Streams the events of one trail, optionally filtered
//! - [`EventFilter`]: Boolean filter over items in conjunctive normal form
//!
//! # Example
//!
//! ```rust,no_run
//! use alopex_trail::{FilterSpec, TrailBuilder};
//!
//! # fn main() -> alopex_trail::Result<()> {
//! let mut builder = TrailBuilder::open("events.trail", &["action", "page"])?;
//! builder.add("771799eb-6a0d-4555-9917-0a5d449b35ab", 1_500_000, &["view", "home"])?;
//! builder.add("771799eb-6a0d-4555-9917-0a5d449b35ab", 1_500_042, &["click", "home"])?;
//! let store = builder.finalize()?;
//!
//! let mut cursor = store.cursor_for(0)?;
//! cursor.with_filter_specs(&[FilterSpec::new("action", "click")])?;
//! while let Some(event) = cursor.next_event()? {
//!     println!("{} {:?}", event.timestamp, event.to_string_map(store.lexicon()));
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod builder;
pub mod cursor;
pub mod error;
pub mod filter;
pub mod item;
pub mod lexicon;
pub mod store;
pub mod uuid;

pub use builder::{AppendSchema, BuilderConfig, BuilderStats, TrailBuilder};
pub use cursor::{CursorState, Event, Timestamp, TrailCursor};
pub use error::{Result, TrailError};
pub use filter::{EventFilter, FilterSpec, FilterTerm};
pub use item::{FieldId, Item, ValueId};
pub use lexicon::Lexicon;
pub use store::file::{CompressionType, SyncMode};
pub use store::{AccessMode, StorageEngine, StoreConfig, TrailStore};
pub use crate::uuid::TrailUuid;
