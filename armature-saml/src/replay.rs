//! Detection of replayed assertions.

use crate::types::Saml2Id;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Ids of assertions that have already produced claims.
///
/// Entries are never removed, so an assertion id can be consumed at most
/// once for the life of the process.
#[derive(Debug, Default)]
pub struct ReplayCache {
    consumed: DashMap<Saml2Id, DateTime<Utc>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` consumed. Returns false if it already was.
    pub fn try_consume(&self, id: &Saml2Id) -> bool {
        match self.consumed.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Utc::now());
                true
            }
        }
    }

    pub fn contains(&self, id: &Saml2Id) -> bool {
        self.consumed.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.consumed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty()
    }
}
