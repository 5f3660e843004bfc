//! Turning validated assertions into identity claims.

use crate::assertion::Saml2Assertion;
use crate::error::{Result, SamlError};
use crate::refresh::to_delta;
use crate::replay::ReplayCache;
use crate::types::EntityId;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

/// Well-known claim type URIs.
pub mod claim_types {
    pub const NAME_IDENTIFIER: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";
}

/// A single statement about a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
    pub issuer: EntityId,
    pub original_issuer: EntityId,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>, issuer: EntityId) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
            original_issuer: issuer.clone(),
            issuer,
        }
    }
}

/// The claims of one authenticated subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimsIdentity {
    claims: Vec<Claim>,
}

impl ClaimsIdentity {
    pub fn new(claims: Vec<Claim>) -> Self {
        Self { claims }
    }

    pub fn with_claim(mut self, claim: Claim) -> Self {
        self.claims.push(claim);
        self
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    pub fn find_first(&self, claim_type: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.claim_type == claim_type)
    }

    pub fn name_identifier(&self) -> Option<&str> {
        self.find_first(claim_types::NAME_IDENTIFIER).map(|c| c.value.as_str())
    }
}

/// Checks assertions for replay, validity window and audience, and converts
/// each into one [`ClaimsIdentity`].
#[derive(Debug)]
pub struct ClaimsExtractor<'a> {
    audience: &'a EntityId,
    replay_cache: &'a ReplayCache,
    max_clock_skew: Duration,
}

impl<'a> ClaimsExtractor<'a> {
    /// `audience` is this service provider's entity id.
    pub fn new(audience: &'a EntityId, replay_cache: &'a ReplayCache, max_clock_skew: Duration) -> Self {
        Self {
            audience,
            replay_cache,
            max_clock_skew,
        }
    }

    pub fn extract(&self, assertions: &[Saml2Assertion]) -> Result<Vec<ClaimsIdentity>> {
        self.extract_at(assertions, Utc::now())
    }

    fn extract_at(&self, assertions: &[Saml2Assertion], now: DateTime<Utc>) -> Result<Vec<ClaimsIdentity>> {
        assertions
            .iter()
            .map(|assertion| {
                if !self.replay_cache.try_consume(&assertion.id) {
                    warn!("Replayed assertion {} from {}", assertion.id, assertion.issuer);
                    return Err(SamlError::Replay(assertion.id.to_string()));
                }
                self.check_conditions(assertion, now)?;
                Ok(identity_of(assertion))
            })
            .collect()
    }

    fn check_conditions(&self, assertion: &Saml2Assertion, now: DateTime<Utc>) -> Result<()> {
        let Some(conditions) = &assertion.conditions else {
            return Ok(());
        };
        let skew = to_delta(self.max_clock_skew);
        if let Some(not_on_or_after) = conditions.not_on_or_after
            && now >= not_on_or_after.checked_add_signed(skew).unwrap_or(DateTime::<Utc>::MAX_UTC)
        {
            return Err(SamlError::Expired(assertion.id.to_string()));
        }
        if let Some(not_before) = conditions.not_before
            && now < not_before.checked_sub_signed(skew).unwrap_or(DateTime::<Utc>::MIN_UTC)
        {
            return Err(SamlError::NotYetValid(assertion.id.to_string()));
        }
        if !conditions
            .audience_restrictions
            .iter()
            .all(|restriction| restriction.contains(self.audience))
        {
            return Err(SamlError::AudienceMismatch(assertion.id.to_string()));
        }
        Ok(())
    }
}

fn identity_of(assertion: &Saml2Assertion) -> ClaimsIdentity {
    let issuer = &assertion.issuer;
    let subject = assertion
        .subject
        .iter()
        .map(|s| Claim::new(claim_types::NAME_IDENTIFIER, s.value.clone(), issuer.clone()));
    let attributes = assertion.attributes.iter().flat_map(|a| {
        a.values
            .iter()
            .map(|v| Claim::new(a.name.clone(), v.clone(), issuer.clone()))
    });
    ClaimsIdentity::new(subject.chain(attributes).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::{Conditions, NameId, Saml2Attribute};
    use crate::types::Saml2Id;
    use chrono::TimeDelta;

    fn assertion(id: &str, conditions: Option<Conditions>) -> Saml2Assertion {
        Saml2Assertion {
            id: Saml2Id::new(id),
            issuer: "https://idp.example.com".into(),
            issue_instant: Utc::now(),
            subject: Some(NameId {
                value: "SomeUser".into(),
                format: None,
            }),
            conditions,
            attributes: vec![Saml2Attribute {
                name: "role".into(),
                values: vec!["admin".into(), "user".into()],
            }],
        }
    }

    fn sp() -> EntityId {
        "https://sp.example.com".into()
    }

    #[test]
    fn test_extract_one_identity_per_assertion() {
        let cache = ReplayCache::new();
        let audience = sp();
        let extractor = ClaimsExtractor::new(&audience, &cache, Duration::from_secs(300));
        let identities = extractor
            .extract(&[assertion("a1", None), assertion("a2", None)])
            .unwrap();

        assert_eq!(identities.len(), 2);
        let identity = &identities[0];
        assert_eq!(identity.name_identifier(), Some("SomeUser"));
        assert_eq!(identity.claims().len(), 3);
        assert!(identity
            .claims()
            .iter()
            .all(|c| c.issuer.as_str() == "https://idp.example.com" && c.original_issuer == c.issuer));
    }

    #[test]
    fn test_replay_rejected() {
        let cache = ReplayCache::new();
        let audience = sp();
        let extractor = ClaimsExtractor::new(&audience, &cache, Duration::ZERO);
        extractor.extract(&[assertion("a1", None)]).unwrap();
        assert_eq!(
            extractor.extract(&[assertion("a1", None)]),
            Err(SamlError::Replay("a1".into()))
        );
    }

    #[test]
    fn test_expired_with_skew() {
        let cache = ReplayCache::new();
        let audience = sp();
        let extractor = ClaimsExtractor::new(&audience, &cache, Duration::from_secs(60));
        let now = Utc::now();
        let conditions = |offset: i64| Conditions {
            not_on_or_after: Some(now + TimeDelta::seconds(offset)),
            ..Default::default()
        };

        assert!(extractor.extract_at(&[assertion("a1", Some(conditions(-30)))], now).is_ok());
        assert_eq!(
            extractor.extract_at(&[assertion("a2", Some(conditions(-61)))], now),
            Err(SamlError::Expired("a2".into()))
        );
    }

    #[test]
    fn test_not_yet_valid() {
        let cache = ReplayCache::new();
        let audience = sp();
        let extractor = ClaimsExtractor::new(&audience, &cache, Duration::from_secs(60));
        let now = Utc::now();
        let conditions = Conditions {
            not_before: Some(now + TimeDelta::minutes(5)),
            ..Default::default()
        };
        assert_eq!(
            extractor.extract_at(&[assertion("a1", Some(conditions))], now),
            Err(SamlError::NotYetValid("a1".into()))
        );
    }

    #[test]
    fn test_audience_restriction() {
        let cache = ReplayCache::new();
        let audience = sp();
        let extractor = ClaimsExtractor::new(&audience, &cache, Duration::ZERO);
        let restricted = |audience_restrictions: Vec<Vec<EntityId>>| Conditions {
            audience_restrictions,
            ..Default::default()
        };

        assert!(extractor
            .extract(&[assertion("a1", Some(restricted(vec![vec!["urn:other".into(), sp()]])))])
            .is_ok());
        assert_eq!(
            extractor.extract(&[assertion("a2", Some(restricted(vec![vec!["urn:other".into()]])))]),
            Err(SamlError::AudienceMismatch("a2".into()))
        );
    }

    #[test]
    fn test_every_audience_restriction_must_name_sp() {
        let cache = ReplayCache::new();
        let audience = sp();
        let extractor = ClaimsExtractor::new(&audience, &cache, Duration::ZERO);
        let conditions = Conditions {
            audience_restrictions: vec![vec![sp()], vec!["https://other-sp.example.com".into()]],
            ..Default::default()
        };
        assert_eq!(
            extractor.extract(&[assertion("a1", Some(conditions))]),
            Err(SamlError::AudienceMismatch("a1".into()))
        );

        let conditions = Conditions {
            audience_restrictions: vec![vec![sp()], vec!["urn:other".into(), sp()]],
            ..Default::default()
        };
        assert!(extractor.extract(&[assertion("a2", Some(conditions))]).is_ok());
    }
}
