use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{filter::Filter, record::RecordId, KeelError, Result};

/// Half-open key interval `[from, to)`; a missing bound is unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    /// Inclusive lower bound
    pub from: Option<String>,
    /// Exclusive upper bound
    pub to:   Option<String>,
}

impl KeyRange {
    /// The range covering every key.
    pub const fn unbounded() -> Self {
        Self {
            from: None,
            to:   None,
        }
    }

    /// Creates a range.
    ///
    /// # Errors
    /// `KeelError::InvalidArgument` when `from` sorts after `to`.
    pub fn new(from: Option<&str>, to: Option<&str>) -> Result<Self> {
        if let (Some(from), Some(to)) = (from, to) &&
            from > to
        {
            return Err(KeelError::InvalidArgument {
                reason: format!("range start '{from}' is after range end '{to}'"),
            });
        }
        Ok(Self {
            from: from.map(str::to_owned),
            to:   to.map(str::to_owned),
        })
    }

    /// Whether `key` lies in the range.
    pub fn contains(&self, key: &str) -> bool {
        self.from.as_deref().is_none_or(|from| key >= from) && self.to.as_deref().is_none_or(|to| key < to)
    }

    /// Narrows this range by `other`; the result never extends past either range.
    ///
    /// Disjoint ranges intersect to an empty range.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let from = match (self.from.as_ref(), other.from.as_ref()) {
            (Some(a), Some(b)) => Some(a.max(b).clone()),
            (a, b) => a.or(b).cloned(),
        };
        let to = match (self.to.as_ref(), other.to.as_ref()) {
            (Some(a), Some(b)) => Some(a.min(b).clone()),
            (a, b) => a.or(b).cloned(),
        };
        let to = match (from.as_ref(), to) {
            (Some(from), Some(to)) if *from > to => Some(from.clone()),
            (_, to) => to,
        };
        Self {
            from,
            to,
        }
    }

    /// The store filter selecting the range.
    pub fn filter(&self) -> Filter {
        let lower = self
            .from
            .as_ref()
            .map_or(Filter::All, |from| Filter::IdGreaterOrEqual(RecordId::from(from.as_str())));
        let upper = self
            .to
            .as_ref()
            .map_or(Filter::All, |to| Filter::IdLessThan(RecordId::from(to.as_str())));
        lower.and(upper)
    }

    pub(crate) fn check(&self, key: &str) -> Result<()> {
        if self.contains(key) {
            Ok(())
        }
        else {
            Err(KeelError::KeyOutOfRange {
                key:   key.to_owned(),
                range: self.to_string(),
            })
        }
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.from.as_deref().unwrap_or(".."),
            self.to.as_deref().unwrap_or("..")
        )
    }
}
