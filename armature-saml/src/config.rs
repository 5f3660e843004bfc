//! Service provider configuration.
//!
//! Configuration is a plain immutable value: build it once at startup, with
//! the `with_*` builders or by deserializing it, then hand it to
//! [`ServiceProvider`](crate::ServiceProvider).

use crate::error::{Result, SamlError};
use crate::types::{Binding, EntityId, NameIdPolicy};
use armature_saml_metadata::ResolverConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// Complete engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    pub sp: SpOptions,
    #[serde(default)]
    pub identity_providers: Vec<IdentityProviderConfig>,
    #[serde(default)]
    pub federations: Vec<FederationConfig>,
    #[serde(default)]
    pub metadata: MetadataOptions,
}

impl Options {
    pub fn new(sp: SpOptions) -> Self {
        Self {
            sp,
            identity_providers: Vec::new(),
            federations: Vec::new(),
            metadata: MetadataOptions::default(),
        }
    }

    pub fn with_identity_provider(mut self, idp: IdentityProviderConfig) -> Self {
        self.identity_providers.push(idp);
        self
    }

    pub fn with_federation(mut self, federation: FederationConfig) -> Self {
        self.federations.push(federation);
        self
    }

    pub fn with_metadata_options(mut self, metadata: MetadataOptions) -> Self {
        self.metadata = metadata;
        self
    }

    /// Rejects configurations the registry cannot represent, such as two
    /// identity providers with the same entity id.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for idp in &self.identity_providers {
            if !seen.insert(&idp.entity_id) {
                return Err(SamlError::Configuration(format!(
                    "Duplicate Idp configuration for entity id \"{}\".",
                    idp.entity_id
                )));
            }
        }
        if self.sp.signing_key_pem.is_none() && self.sp.signing_behavior == SigningBehavior::Always {
            return Err(SamlError::Configuration(
                "Signing behavior is Always, but no signing key is configured.".into(),
            ));
        }
        Ok(())
    }
}

/// When outgoing AuthnRequests are signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SigningBehavior {
    Never,
    Always,
    #[default]
    IfIdpWantAuthnRequestsSigned,
}

/// This service provider.
#[derive(Debug, Clone, Deserialize)]
pub struct SpOptions {
    pub entity_id: EntityId,
    pub assertion_consumer_service_url: Url,
    #[serde(default)]
    pub signing_behavior: SigningBehavior,
    /// PKCS#8 or PKCS#1 PEM private key used to sign requests.
    #[serde(default)]
    pub signing_key_pem: Option<String>,
    /// PEM certificate published in signed requests.
    #[serde(default)]
    pub signing_certificate_pem: Option<String>,
    #[serde(default = "default_max_clock_skew")]
    pub max_clock_skew: Duration,
    #[serde(default)]
    pub attribute_consuming_service_index: Option<u16>,
    #[serde(default)]
    pub name_id_policy: Option<NameIdPolicy>,
    /// How long a sent AuthnRequest waits for its response.
    #[serde(default = "default_pending_request_lifetime")]
    pub pending_request_lifetime: Duration,
}

fn default_max_clock_skew() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_pending_request_lifetime() -> Duration {
    Duration::from_secs(60 * 60)
}

impl SpOptions {
    pub fn new(entity_id: impl Into<EntityId>, assertion_consumer_service_url: Url) -> Self {
        Self {
            entity_id: entity_id.into(),
            assertion_consumer_service_url,
            signing_behavior: SigningBehavior::default(),
            signing_key_pem: None,
            signing_certificate_pem: None,
            max_clock_skew: default_max_clock_skew(),
            attribute_consuming_service_index: None,
            name_id_policy: None,
            pending_request_lifetime: default_pending_request_lifetime(),
        }
    }

    pub fn with_signing_behavior(mut self, behavior: SigningBehavior) -> Self {
        self.signing_behavior = behavior;
        self
    }

    pub fn with_signing_key(mut self, key_pem: impl Into<String>, certificate_pem: Option<String>) -> Self {
        self.signing_key_pem = Some(key_pem.into());
        self.signing_certificate_pem = certificate_pem;
        self
    }

    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    pub fn with_attribute_consuming_service_index(mut self, index: u16) -> Self {
        self.attribute_consuming_service_index = Some(index);
        self
    }

    pub fn with_name_id_policy(mut self, policy: NameIdPolicy) -> Self {
        self.name_id_policy = Some(policy);
        self
    }

    pub fn with_pending_request_lifetime(mut self, lifetime: Duration) -> Self {
        self.pending_request_lifetime = lifetime;
        self
    }
}

/// A statically configured identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProviderConfig {
    pub entity_id: EntityId,
    #[serde(default)]
    pub destination_url: Option<Url>,
    #[serde(default)]
    pub binding: Option<Binding>,
    /// Trusted signing certificate (PEM or base64 DER), kept across metadata
    /// reloads.
    #[serde(default)]
    pub signing_certificate: Option<String>,
    #[serde(default)]
    pub allow_unsolicited_authn_response: bool,
    #[serde(default)]
    pub load_metadata: bool,
    /// Defaults to the entity id.
    #[serde(default)]
    pub metadata_location: Option<String>,
    #[serde(default)]
    pub want_authn_requests_signed: bool,
}

impl IdentityProviderConfig {
    pub fn new(entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_id: entity_id.into(),
            destination_url: None,
            binding: None,
            signing_certificate: None,
            allow_unsolicited_authn_response: false,
            load_metadata: false,
            metadata_location: None,
            want_authn_requests_signed: false,
        }
    }

    pub fn with_destination(mut self, url: Url) -> Self {
        self.destination_url = Some(url);
        self
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn with_signing_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.signing_certificate = Some(certificate.into());
        self
    }

    pub fn allow_unsolicited(mut self, allow: bool) -> Self {
        self.allow_unsolicited_authn_response = allow;
        self
    }

    /// Loads (and keeps refreshing) metadata from `location`, or from the
    /// entity id when `None`.
    pub fn with_metadata(mut self, location: Option<String>) -> Self {
        self.load_metadata = true;
        self.metadata_location = location;
        self
    }

    pub fn want_authn_requests_signed(mut self, want: bool) -> Self {
        self.want_authn_requests_signed = want;
        self
    }

    /// Where metadata is loaded from.
    pub fn effective_metadata_location(&self) -> &str {
        self.metadata_location
            .as_deref()
            .unwrap_or_else(|| self.entity_id.as_str())
    }
}

/// A federation whose metadata lists many identity providers.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    pub metadata_location: String,
    #[serde(default)]
    pub allow_unsolicited_authn_response: bool,
}

impl FederationConfig {
    pub fn new(metadata_location: impl Into<String>, allow_unsolicited_authn_response: bool) -> Self {
        Self {
            metadata_location: metadata_location.into(),
            allow_unsolicited_authn_response,
        }
    }
}

/// Metadata loading and refresh settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataOptions {
    /// Lifetime of metadata that states neither `validUntil` nor
    /// `cacheDuration`.
    pub default_cache_duration: Duration,
    /// Minimum time between two reload attempts of the same metadata, and
    /// between dynamic federation refreshes.
    pub min_refresh_interval: Duration,
    pub http_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            default_cache_duration: Duration::from_secs(15 * 60),
            min_refresh_interval: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

impl MetadataOptions {
    pub fn with_default_cache_duration(mut self, duration: Duration) -> Self {
        self.default_cache_duration = duration;
        self
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// HTTP settings for the metadata resolver.
    pub fn resolver_config(&self) -> ResolverConfig {
        let mut builder = ResolverConfig::builder().timeout(self.http_timeout);
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        builder.build()
    }
}
