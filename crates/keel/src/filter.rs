//! Store-side record predicates.
//!
//! Adapters never filter client-side: every bound, membership test and value lookup is
//! expressed as a [`Filter`] and pushed down to the store, which evaluates it with
//! [`Filter::matches`] (in-memory) or translates it to its own query language.

use crate::record::{Record, RecordId};

/// A predicate over stored records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Matches every record
    All,
    /// `_id == value`
    IdEquals(RecordId),
    /// `_id > value`
    IdGreaterThan(RecordId),
    /// `_id >= value`
    IdGreaterOrEqual(RecordId),
    /// `_id < value`
    IdLessThan(RecordId),
    /// `_id` is one of the listed ids
    IdIn(Vec<RecordId>),
    /// `hash_json_value == value`
    HashEquals(String),
    /// `hash_json_value` is one of the listed fingerprints
    HashIn(Vec<String>),
    /// All of the sub-filters match (empty list matches everything)
    And(Vec<Self>),
    /// Any of the sub-filters matches (empty list matches nothing)
    Or(Vec<Self>),
    /// The sub-filter does not match
    Not(Box<Self>),
}

impl Filter {
    /// Conjunction of two filters, flattening `All` and nested `And`s.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, f) | (f, Self::All) => f,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            },
            (Self::And(mut left), f) => {
                left.push(f);
                Self::And(left)
            },
            (f, Self::And(mut right)) => {
                right.insert(0, f);
                Self::And(right)
            },
            (a, b) => Self::And(vec![a, b]),
        }
    }

    /// Negation.
    #[must_use]
    #[allow(clippy::should_implement_trait, reason = "mirrors the store's $not operator")]
    pub fn not(self) -> Self { Self::Not(Box::new(self)) }

    /// `_id == key` for string keys.
    pub fn key(key: &str) -> Self { Self::IdEquals(RecordId::from(key)) }

    /// `_id in keys` for string keys.
    pub fn keys<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::IdIn(keys.into_iter().map(RecordId::from).collect())
    }

    /// Records strictly after `id` in traversal order.
    pub fn after(id: RecordId, order: SortOrder) -> Self {
        match order {
            SortOrder::Ascending => Self::IdGreaterThan(id),
            SortOrder::Descending => Self::IdLessThan(id),
        }
    }

    /// Evaluates the filter against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match *self {
            Self::All => true,
            Self::IdEquals(ref id) => record.id == *id,
            Self::IdGreaterThan(ref id) => record.id > *id,
            Self::IdGreaterOrEqual(ref id) => record.id >= *id,
            Self::IdLessThan(ref id) => record.id < *id,
            Self::IdIn(ref ids) => ids.contains(&record.id),
            Self::HashEquals(ref hash) => record.hash_json_value == *hash,
            Self::HashIn(ref hashes) => hashes.contains(&record.hash_json_value),
            Self::And(ref filters) => filters.iter().all(|f| f.matches(record)),
            Self::Or(ref filters) => filters.iter().any(|f| f.matches(record)),
            Self::Not(ref filter) => !filter.matches(record),
        }
    }
}

/// Sort order by `_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending order
    Ascending,
    /// Descending order
    Descending,
}

/// Sort and limit options of a find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindOptions {
    /// Order of the returned records by `_id`
    pub sort:  SortOrder,
    /// Maximum number of records to return
    pub limit: Option<usize>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            sort:  SortOrder::Ascending,
            limit: None,
        }
    }
}

impl FindOptions {
    /// Unlimited find in the given order.
    pub const fn sorted(sort: SortOrder) -> Self {
        Self {
            sort,
            limit: None,
        }
    }

    /// Caps the number of returned records.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
