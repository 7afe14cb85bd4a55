//! Boolean event filters in conjunctive normal form.
//!
//! A filter is a list of clauses; a clause is a list of terms. An event
//! matches when every clause has at least one satisfied term. A term
//! `(item, negate = false)` is satisfied when the event holds the item,
//! `(item, negate = true)` when it does not.
//!
//! A filter without clauses matches no events.

use crate::error::{Result, TrailError};
use crate::item::Item;
use crate::lexicon::{Lexicon, TIME_FIELD};

/// One literal of a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterTerm {
    /// Item to look for.
    pub item: Item,
    /// Match events that do not hold the item.
    pub negate: bool,
}

impl FilterTerm {
    /// Evaluates the term against an event's items.
    pub fn matches(&self, items: &[Item]) -> bool {
        items.contains(&self.item) != self.negate
    }
}

/// A `field = value` condition in source form.
///
/// Specs are compiled in order: the first spec opens the first clause, and
/// every later spec either joins the current clause (`and = false`, OR) or
/// opens a new one (`and = true`, AND). The first spec's `and` flag is
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    /// Field name.
    pub field: String,
    /// Value bytes.
    pub value: Vec<u8>,
    /// Invert the condition.
    pub negate: bool,
    /// Start a new clause.
    pub and: bool,
}

impl FilterSpec {
    /// Creates an OR-joined, non-negated spec.
    pub fn new(field: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        Self {
            field: field.into(),
            value: value.as_ref().to_vec(),
            negate: false,
            and: false,
        }
    }

    /// Inverts the condition.
    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    /// Starts a new clause with this spec.
    pub fn and(mut self) -> Self {
        self.and = true;
        self
    }
}

/// Compiled event filter.
///
/// Compiled filters are immutable once attached to a cursor; share them
/// between cursors with `Arc<EventFilter>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    clauses: Vec<Vec<FilterTerm>>,
    fingerprint: Option<u64>,
}

impl EventFilter {
    /// Creates an empty filter, which matches nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a term to the current clause, opening the first clause if
    /// there is none.
    pub fn add_term(&mut self, item: Item, negate: bool) -> &mut Self {
        if self.clauses.is_empty() {
            self.clauses.push(Vec::new());
        }
        if let Some(clause) = self.clauses.last_mut() {
            clause.push(FilterTerm { item, negate });
        }
        self
    }

    /// Opens a new, empty clause; following terms go into it.
    pub fn new_clause(&mut self) -> &mut Self {
        self.clauses.push(Vec::new());
        self
    }

    /// Number of clauses.
    pub fn num_clauses(&self) -> usize {
        self.clauses.len()
    }

    /// Terms of a clause.
    pub fn clause(&self, clause: usize) -> Option<&[FilterTerm]> {
        self.clauses.get(clause).map(Vec::as_slice)
    }

    /// A single term of a clause.
    pub fn term(&self, clause: usize, index: usize) -> Option<FilterTerm> {
        self.clauses.get(clause)?.get(index).copied()
    }

    /// Fingerprint of the lexicon this filter was compiled against, if any.
    ///
    /// Filters built by hand with [`EventFilter::add_term`] carry none and
    /// attach to any cursor.
    pub fn lexicon_fingerprint(&self) -> Option<u64> {
        self.fingerprint
    }

    /// Evaluates the filter against an event's items.
    pub fn matches(&self, items: &[Item]) -> bool {
        !self.clauses.is_empty()
            && self
                .clauses
                .iter()
                .all(|clause| clause.iter().any(|term| term.matches(items)))
    }

    /// Compiles specs against a lexicon.
    ///
    /// A value missing from the lexicon compiles to [`Item::NULL`], which no
    /// event holds: a plain term on it never matches, a negated one always
    /// does.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::UnknownField` if a spec names a field that is not
    /// a user field of the lexicon.
    pub fn compile(lexicon: &Lexicon, specs: &[FilterSpec]) -> Result<Self> {
        let mut filter = Self {
            clauses: Vec::new(),
            fingerprint: Some(lexicon.fingerprint()),
        };

        for (i, spec) in specs.iter().enumerate() {
            let field = match lexicon.field_id(&spec.field) {
                Some(field) if spec.field != TIME_FIELD => field,
                _ => return Err(TrailError::UnknownField(spec.field.clone())),
            };
            let item = lexicon
                .value_id(field, &spec.value)
                .map_or(Item::NULL, |value| Item::new(field, value));

            if i > 0 && spec.and {
                filter.new_clause();
            }
            filter.add_term(item, spec.negate);
        }

        Ok(filter)
    }
}
