//! Correlation of outgoing AuthnRequests with incoming responses.

use crate::refresh::to_delta;
use crate::types::{EntityId, Saml2Id};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// What was recorded when a request was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequestState {
    /// The identity provider the request was sent to.
    pub idp: EntityId,
    /// Where the caller wants to go after sign-in.
    pub return_location: Option<Url>,
    pub created_at: DateTime<Utc>,
}

impl PendingRequestState {
    pub fn new(idp: EntityId, return_location: Option<Url>) -> Self {
        Self {
            idp,
            return_location,
            created_at: Utc::now(),
        }
    }
}

/// Outstanding AuthnRequests keyed by request id.
///
/// Each entry can be consumed exactly once: [`try_consume`](Self::try_consume)
/// removes it atomically, so concurrent responses naming the same request id
/// cannot both succeed. Entries older than the store's lifetime are never
/// handed out and are evicted whenever a new request is added.
#[derive(Debug)]
pub struct PendingRequestStore {
    requests: DashMap<Saml2Id, PendingRequestState>,
    lifetime: TimeDelta,
}

impl Default for PendingRequestStore {
    fn default() -> Self {
        Self::with_lifetime(DEFAULT_LIFETIME)
    }
}

impl PendingRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lifetime(lifetime: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            lifetime: to_delta(lifetime),
        }
    }

    pub fn add(&self, id: Saml2Id, state: PendingRequestState) {
        self.evict_expired_at(Utc::now());
        self.requests.insert(id, state);
    }

    /// Removes and returns the state recorded for `id`, unless it has expired.
    pub fn try_consume(&self, id: &Saml2Id) -> Option<PendingRequestState> {
        self.try_consume_at(id, Utc::now())
    }

    fn try_consume_at(&self, id: &Saml2Id, now: DateTime<Utc>) -> Option<PendingRequestState> {
        let (_, state) = self.requests.remove(id)?;
        if self.is_expired(&state, now) {
            debug!("Pending request {} to {} expired", id, state.idp);
            return None;
        }
        Some(state)
    }

    /// Drops every request older than the lifetime.
    pub fn evict_expired(&self) {
        self.evict_expired_at(Utc::now());
    }

    fn evict_expired_at(&self, now: DateTime<Utc>) {
        self.requests.retain(|_, state| !self.is_expired(state, now));
    }

    fn is_expired(&self, state: &PendingRequestState, now: DateTime<Utc>) -> bool {
        state
            .created_at
            .checked_add_signed(self.lifetime)
            .is_some_and(|deadline| now >= deadline)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
