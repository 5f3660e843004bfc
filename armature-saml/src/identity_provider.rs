//! Identity providers and their published metadata snapshots.
//!
//! Everything an identity provider learns from metadata (binding, SSO URL,
//! artifact resolution services, signing keys, validity) lives in one
//! immutable [`IdpSnapshot`]. Reloads build a new snapshot and swap it in, so
//! readers see either the old or the new metadata, never a mix.

use crate::config::{IdentityProviderConfig, MetadataOptions, SigningBehavior, SpOptions};
use crate::error::{Result, SamlError};
use crate::pending::{PendingRequestState, PendingRequestStore};
use crate::refresh::{MetadataRefreshScheduler, RefreshState, RefreshTarget, metadata_valid_until};
use crate::request::Saml2AuthenticationRequest;
use crate::types::{Binding, EntityId};
use armature_saml_metadata::{EntityDescriptor, IdpSsoDescriptor, MetadataLocator, MetadataSource};
use armature_xmldsig::{SigningCredentials, VerificationKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// The metadata-derived state of an identity provider at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct IdpSnapshot {
    pub binding: Binding,
    pub single_sign_on_service_url: Url,
    pub artifact_resolution_service_urls: BTreeMap<u16, Url>,
    /// Configured key first, then keys from metadata.
    pub signing_keys: Vec<VerificationKey>,
    pub want_authn_requests_signed: bool,
    /// `None` when the provider is not backed by metadata.
    pub metadata_valid_until: Option<DateTime<Utc>>,
}

impl IdpSnapshot {
    fn new(
        entity_id: &EntityId,
        binding: Option<Binding>,
        single_sign_on_service_url: Option<Url>,
        signing_keys: Vec<VerificationKey>,
    ) -> Result<Self> {
        let missing = |what: &str| {
            SamlError::Configuration(format!("Missing {what} configuration on Idp {entity_id}."))
        };
        let binding = binding.ok_or_else(|| missing("binding"))?;
        if signing_keys.is_empty() {
            return Err(missing("signing certificate"));
        }
        let single_sign_on_service_url =
            single_sign_on_service_url.ok_or_else(|| missing("assertion consumer service url"))?;
        Ok(Self {
            binding,
            single_sign_on_service_url,
            artifact_resolution_service_urls: BTreeMap::new(),
            signing_keys,
            want_authn_requests_signed: false,
            metadata_valid_until: None,
        })
    }
}

struct MetadataLink {
    locator: MetadataLocator,
    source: Arc<dyn MetadataSource>,
}

/// A remote party trusted to authenticate users.
pub struct IdentityProvider {
    entity_id: EntityId,
    allow_unsolicited_authn_response: bool,
    configured_key: Option<VerificationKey>,
    configured_want_signed: bool,
    default_cache_duration: Duration,
    metadata: Option<MetadataLink>,
    snapshot: RwLock<Arc<IdpSnapshot>>,
    scheduler: OnceLock<MetadataRefreshScheduler>,
}

impl IdentityProvider {
    /// Builds a configured identity provider.
    ///
    /// With `load_metadata` set, the first metadata load happens here and
    /// its failure fails construction; later reloads run in the background.
    /// Must be called within a tokio runtime when metadata is loaded.
    pub async fn from_config(
        config: &IdentityProviderConfig,
        options: &MetadataOptions,
        source: Arc<dyn MetadataSource>,
    ) -> Result<Arc<Self>> {
        let configured_key = config
            .signing_certificate
            .as_deref()
            .map(VerificationKey::parse)
            .transpose()
            .map_err(|e| {
                SamlError::Configuration(format!(
                    "Invalid signing certificate configuration on Idp {}: {e}",
                    config.entity_id
                ))
            })?;

        if !config.load_metadata {
            let mut snapshot = IdpSnapshot::new(
                &config.entity_id,
                config.binding,
                config.destination_url.clone(),
                configured_key.iter().cloned().collect(),
            )?;
            snapshot.want_authn_requests_signed = config.want_authn_requests_signed;
            return Ok(Arc::new(Self {
                entity_id: config.entity_id.clone(),
                allow_unsolicited_authn_response: config.allow_unsolicited_authn_response,
                configured_key,
                configured_want_signed: config.want_authn_requests_signed,
                default_cache_duration: options.default_cache_duration,
                metadata: None,
                snapshot: RwLock::new(Arc::new(snapshot)),
                scheduler: OnceLock::new(),
            }));
        }

        let locator = MetadataLocator::parse(config.effective_metadata_location())?;
        let entity = source.load_idp(&locator).await?;
        let snapshot = build_snapshot(
            &config.entity_id,
            configured_key.as_ref(),
            config.want_authn_requests_signed,
            options.default_cache_duration,
            &entity,
        )?;
        let valid_until = snapshot.metadata_valid_until.unwrap_or_else(Utc::now);
        info!("Loaded metadata for Idp {}, valid until {}", config.entity_id, valid_until);
        let idp = Self {
            entity_id: config.entity_id.clone(),
            allow_unsolicited_authn_response: config.allow_unsolicited_authn_response,
            configured_key,
            configured_want_signed: config.want_authn_requests_signed,
            default_cache_duration: options.default_cache_duration,
            metadata: Some(MetadataLink { locator, source }),
            snapshot: RwLock::new(Arc::new(snapshot)),
            scheduler: OnceLock::new(),
        };

        let idp = Arc::new(idp);
        let target: Arc<dyn RefreshTarget> = idp.clone();
        let scheduler =
            MetadataRefreshScheduler::spawn(Arc::downgrade(&target), valid_until, options.min_refresh_interval);
        // Freshly built, so the cell is empty.
        let _ = idp.scheduler.set(scheduler);
        Ok(idp)
    }

    /// Builds an identity provider from a federation member's metadata. Its
    /// refresh is driven by the federation.
    pub fn from_metadata(
        entity: &EntityDescriptor,
        allow_unsolicited_authn_response: bool,
        options: &MetadataOptions,
    ) -> Result<Arc<Self>> {
        let entity_id = EntityId::new(entity.entity_id.as_str());
        let snapshot = build_snapshot(&entity_id, None, false, options.default_cache_duration, entity)?;
        Ok(Arc::new(Self {
            entity_id,
            allow_unsolicited_authn_response,
            configured_key: None,
            configured_want_signed: false,
            default_cache_duration: options.default_cache_duration,
            metadata: None,
            snapshot: RwLock::new(Arc::new(snapshot)),
            scheduler: OnceLock::new(),
        }))
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn allow_unsolicited_authn_response(&self) -> bool {
        self.allow_unsolicited_authn_response
    }

    /// The current metadata snapshot. Asks for a background reload when the
    /// snapshot is past its validity, without waiting for it.
    pub fn snapshot(&self) -> Arc<IdpSnapshot> {
        let snapshot = self.snapshot.read().clone();
        if let Some(scheduler) = self.scheduler.get()
            && let Some(valid_until) = snapshot.metadata_valid_until
            && Utc::now() >= valid_until
        {
            scheduler.trigger();
        }
        snapshot
    }

    pub fn binding(&self) -> Binding {
        self.snapshot().binding
    }

    pub fn single_sign_on_service_url(&self) -> Url {
        self.snapshot().single_sign_on_service_url.clone()
    }

    pub fn artifact_resolution_service_urls(&self) -> BTreeMap<u16, Url> {
        self.snapshot().artifact_resolution_service_urls.clone()
    }

    pub fn signing_keys(&self) -> Vec<VerificationKey> {
        self.snapshot().signing_keys.clone()
    }

    pub fn want_authn_requests_signed(&self) -> bool {
        self.snapshot().want_authn_requests_signed
    }

    pub fn metadata_valid_until(&self) -> Option<DateTime<Utc>> {
        self.snapshot().metadata_valid_until
    }

    /// State of the background refresh, if this provider has one.
    pub fn refresh_state(&self) -> Option<RefreshState> {
        self.scheduler.get().map(MetadataRefreshScheduler::state)
    }

    /// Loads metadata again and publishes it. Returns when it goes stale.
    pub async fn reload_metadata(&self) -> Result<DateTime<Utc>> {
        let Some(link) = &self.metadata else {
            return Err(SamlError::Configuration(format!(
                "Metadata loading is not enabled for Idp {}.",
                self.entity_id
            )));
        };
        let entity = link.source.load_idp(&link.locator).await?;
        self.apply_metadata(&entity)
    }

    /// Replaces the metadata-derived state with `entity`'s.
    pub(crate) fn apply_metadata(&self, entity: &EntityDescriptor) -> Result<DateTime<Utc>> {
        let snapshot = build_snapshot(
            &self.entity_id,
            self.configured_key.as_ref(),
            self.configured_want_signed,
            self.default_cache_duration,
            entity,
        )?;
        let valid_until = snapshot.metadata_valid_until.unwrap_or_else(Utc::now);
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(valid_until)
    }

    /// Builds an AuthnRequest to this provider and records it as pending.
    pub fn create_authenticate_request(
        &self,
        return_location: Option<Url>,
        sp: &SpOptions,
        credentials: Option<&SigningCredentials>,
        pending: &PendingRequestStore,
    ) -> Result<Saml2AuthenticationRequest> {
        let snapshot = self.snapshot();
        let mut request =
            Saml2AuthenticationRequest::new(sp.entity_id.clone(), snapshot.single_sign_on_service_url.clone())
                .with_assertion_consumer_service_url(sp.assertion_consumer_service_url.clone())
                .with_attribute_consuming_service_index(sp.attribute_consuming_service_index)
                .with_name_id_policy(sp.name_id_policy);

        let sign = match sp.signing_behavior {
            SigningBehavior::Never => false,
            SigningBehavior::Always => true,
            SigningBehavior::IfIdpWantAuthnRequestsSigned => snapshot.want_authn_requests_signed,
        };
        if sign {
            let credentials = credentials.ok_or_else(|| {
                SamlError::Configuration(format!(
                    "Idp \"{}\" is configured for signed AuthenticateRequests, but ServiceCertificates configuration contains no certificate with usage \"Signing\" or \"Both\".",
                    self.entity_id
                ))
            })?;
            request = request.with_signing_credentials(credentials.clone());
        }

        pending.add(
            request.id.clone(),
            PendingRequestState::new(self.entity_id.clone(), return_location),
        );
        debug!("Created AuthnRequest {} for Idp {}", request.id, self.entity_id);
        Ok(request)
    }
}

/// The snapshot `entity`'s metadata describes, keeping the configured key.
fn build_snapshot(
    expected: &EntityId,
    configured_key: Option<&VerificationKey>,
    configured_want_signed: bool,
    default_cache_duration: Duration,
    entity: &EntityDescriptor,
) -> Result<IdpSnapshot> {
    if entity.entity_id != expected.as_str() {
        return Err(SamlError::Configuration(format!(
            "Unexpected entity id \"{}\" found when loading metadata for \"{}\".",
            entity.entity_id, expected
        )));
    }
    let descriptor = entity.idp_sso_descriptor.as_ref().ok_or_else(|| {
        SamlError::Configuration(format!("No IDPSSODescriptor found in metadata for Idp {expected}."))
    })?;
    let (binding, url) = select_single_sign_on_service(descriptor).ok_or_else(|| {
        SamlError::Configuration(format!(
            "No supported single sign-on binding found in metadata for Idp {}.",
            expected
        ))
    })?;

    let keys = configured_key
        .into_iter()
        .chain(descriptor.signing_keys())
        .cloned()
        .collect();
    let mut snapshot = IdpSnapshot::new(expected, Some(binding), Some(url), keys)?;
    snapshot.artifact_resolution_service_urls = descriptor
        .artifact_resolution_services
        .iter()
        .map(|s| (s.index, s.endpoint.location.clone()))
        .collect();
    snapshot.want_authn_requests_signed =
        configured_want_signed || descriptor.want_authn_requests_signed;
    snapshot.metadata_valid_until = Some(metadata_valid_until(
        Utc::now(),
        entity.valid_until,
        entity.cache_duration,
        default_cache_duration,
    ));
    Ok(snapshot)
}

/// Redirect if offered, else the first supported binding in listed order.
fn select_single_sign_on_service(descriptor: &IdpSsoDescriptor) -> Option<(Binding, Url)> {
    let supported = || {
        descriptor.single_sign_on_services.iter().filter_map(|service| {
            Binding::from_uri(&service.binding)
                .filter(Binding::supports_authn_requests)
                .map(|binding| (binding, service.location.clone()))
        })
    };
    supported()
        .find(|(binding, _)| *binding == Binding::HttpRedirect)
        .or_else(|| supported().next())
}

#[async_trait]
impl RefreshTarget for IdentityProvider {
    fn refresh_name(&self) -> String {
        format!("Idp {}", self.entity_id)
    }

    async fn reload_metadata(&self) -> Result<DateTime<Utc>> {
        IdentityProvider::reload_metadata(self).await
    }
}

impl fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityProvider")
            .field("entity_id", &self.entity_id)
            .field("allow_unsolicited_authn_response", &self.allow_unsolicited_authn_response)
            .field("snapshot", &self.snapshot.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    const METADATA_URL: &str = "https://idp.example.com/metadata";

    fn sp() -> SpOptions {
        SpOptions::new("https://sp.example.com", Url::parse("https://sp.example.com/acs").unwrap())
    }

    fn static_config() -> IdentityProviderConfig {
        IdentityProviderConfig::new("https://idp.example.com")
            .with_binding(Binding::HttpPost)
            .with_destination(Url::parse("https://idp.example.com/sso").unwrap())
            .with_signing_certificate(IDP_CERT)
    }

    fn metadata_config() -> IdentityProviderConfig {
        IdentityProviderConfig::new("https://idp.example.com").with_metadata(Some(METADATA_URL.into()))
    }

    fn fast_refresh() -> MetadataOptions {
        MetadataOptions::default().with_min_refresh_interval(Duration::from_millis(20))
    }

    async fn load(config: &IdentityProviderConfig, source: StaticSource) -> Result<Arc<IdentityProvider>> {
        IdentityProvider::from_config(config, &MetadataOptions::default(), Arc::new(source)).await
    }

    #[tokio::test]
    async fn test_static_configuration() {
        let idp = load(&static_config(), StaticSource::new()).await.unwrap();
        assert_eq!(idp.binding(), Binding::HttpPost);
        assert_eq!(idp.single_sign_on_service_url().as_str(), "https://idp.example.com/sso");
        assert_eq!(idp.signing_keys().len(), 1);
        assert_eq!(idp.metadata_valid_until(), None);
        assert_eq!(idp.refresh_state(), None);
    }

    #[tokio::test]
    async fn test_missing_configuration_fails() {
        let mut config = static_config();
        config.binding = None;
        let err = load(&config, StaticSource::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing binding configuration on Idp https://idp.example.com.");

        let mut config = static_config();
        config.signing_certificate = None;
        let err = load(&config, StaticSource::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing signing certificate configuration on Idp https://idp.example.com."
        );

        let mut config = static_config();
        config.destination_url = None;
        let err = load(&config, StaticSource::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing assertion consumer service url configuration on Idp https://idp.example.com."
        );
    }

    #[tokio::test]
    async fn test_invalid_certificate_fails() {
        let config = static_config().with_signing_certificate("not a certificate");
        let err = load(&config, StaticSource::new()).await.unwrap_err();
        assert!(matches!(err, SamlError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_metadata_prefers_redirect_binding() {
        let xml = idp_entity(
            "https://idp.example.com",
            &[(POST, "https://idp.example.com/post"), (REDIRECT, "https://idp.example.com/redirect")],
            IDP_CERT,
            "",
        );
        let idp = load(&metadata_config(), StaticSource::new().with(METADATA_URL, xml))
            .await
            .unwrap();
        assert_eq!(idp.binding(), Binding::HttpRedirect);
        assert_eq!(idp.single_sign_on_service_url().as_str(), "https://idp.example.com/redirect");
        assert_eq!(
            idp.artifact_resolution_service_urls().get(&4).map(Url::as_str),
            Some("https://idp.example.com/ars")
        );
        assert!(idp.metadata_valid_until().is_some());
        assert_eq!(idp.refresh_state(), Some(RefreshState::Fresh));
    }

    #[tokio::test]
    async fn test_metadata_falls_back_to_listed_order() {
        let xml = idp_entity(
            "https://idp.example.com",
            &[(ARTIFACT, "https://idp.example.com/artifact"), (POST, "https://idp.example.com/post")],
            IDP_CERT,
            "",
        );
        let idp = load(&metadata_config(), StaticSource::new().with(METADATA_URL, xml))
            .await
            .unwrap();
        assert_eq!(idp.binding(), Binding::HttpPost);
        assert_eq!(idp.single_sign_on_service_url().as_str(), "https://idp.example.com/post");
    }

    #[tokio::test]
    async fn test_metadata_with_only_unsupported_bindings_fails() {
        let xml = idp_entity(
            "https://idp.example.com",
            &[(ARTIFACT, "https://idp.example.com/artifact")],
            IDP_CERT,
            "",
        );
        let err = load(&metadata_config(), StaticSource::new().with(METADATA_URL, xml))
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_metadata_entity_id_mismatch() {
        let xml = idp_entity("https://other.example.com", &[(REDIRECT, "https://x/sso")], IDP_CERT, "");
        let err = load(&metadata_config(), StaticSource::new().with(METADATA_URL, xml))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected entity id \"https://other.example.com\" found when loading metadata for \"https://idp.example.com\"."
        );
    }

    #[tokio::test]
    async fn test_initial_load_failure_propagates() {
        let err = load(&metadata_config(), StaticSource::new()).await.unwrap_err();
        assert!(matches!(err, SamlError::MetadataLoad(_)));
    }

    #[tokio::test]
    async fn test_configured_key_survives_reload() {
        let source = Arc::new(StaticSource::new().with(
            METADATA_URL,
            idp_entity("https://idp.example.com", &[(REDIRECT, "https://idp.example.com/sso")], IDP_CERT, ""),
        ));
        let config = metadata_config().with_signing_certificate(SP_CERT);
        let idp = IdentityProvider::from_config(&config, &MetadataOptions::default(), source.clone())
            .await
            .unwrap();
        let configured = VerificationKey::parse(SP_CERT).unwrap();
        assert_eq!(
            idp.signing_keys(),
            vec![configured.clone(), VerificationKey::parse(IDP_CERT).unwrap()]
        );

        source.set(
            METADATA_URL,
            idp_entity("https://idp.example.com", &[(REDIRECT, "https://idp.example.com/sso")], ATTACKER_CERT, ""),
        );
        idp.reload_metadata().await.unwrap();
        assert_eq!(
            idp.signing_keys(),
            vec![configured, VerificationKey::parse(ATTACKER_CERT).unwrap()]
        );
    }

    #[tokio::test]
    async fn test_stale_metadata_reloads_in_background() {
        let source = Arc::new(StaticSource::new().with(
            METADATA_URL,
            idp_entity(
                "https://idp.example.com",
                &[(REDIRECT, "https://idp.example.com/old")],
                IDP_CERT,
                r#"cacheDuration="PT0S""#,
            ),
        ));
        let idp = IdentityProvider::from_config(&metadata_config(), &fast_refresh(), source.clone())
            .await
            .unwrap();

        source.set(
            METADATA_URL,
            idp_entity("https://idp.example.com", &[(REDIRECT, "https://idp.example.com/new")], IDP_CERT, ""),
        );
        assert!(eventually(|| idp.single_sign_on_service_url().as_str() == "https://idp.example.com/new").await);
        assert!(source.loads() >= 2);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_snapshot() {
        let source = Arc::new(StaticSource::new().with(
            METADATA_URL,
            idp_entity(
                "https://idp.example.com",
                &[(REDIRECT, "https://idp.example.com/sso")],
                IDP_CERT,
                r#"cacheDuration="PT0S""#,
            ),
        ));
        let idp = IdentityProvider::from_config(&metadata_config(), &fast_refresh(), source.clone())
            .await
            .unwrap();
        let before = idp.snapshot();
        source.remove(METADATA_URL);

        assert!(eventually(|| idp.refresh_state() == Some(RefreshState::Failed)).await);
        let after = idp.snapshot();
        assert_eq!(after.single_sign_on_service_url, before.single_sign_on_service_url);
        assert_eq!(after.signing_keys, before.signing_keys);
    }

    #[tokio::test]
    async fn test_create_authenticate_request_registers_pending() {
        let idp = load(&static_config(), StaticSource::new()).await.unwrap();
        let pending = PendingRequestStore::new();
        let return_location = Url::parse("https://sp.example.com/home").unwrap();
        let request = idp
            .create_authenticate_request(Some(return_location.clone()), &sp(), None, &pending)
            .unwrap();

        assert_eq!(request.destination.as_ref().map(Url::as_str), Some("https://idp.example.com/sso"));
        assert_eq!(request.issuer.as_str(), "https://sp.example.com");
        assert!(request.signing_credentials.is_none());
        let state = pending.try_consume(&request.id).unwrap();
        assert_eq!(state.idp, *idp.entity_id());
        assert_eq!(state.return_location, Some(return_location));
    }

    #[tokio::test]
    async fn test_signing_behavior() {
        let config = static_config().want_authn_requests_signed(true);
        let idp = load(&config, StaticSource::new()).await.unwrap();
        let pending = PendingRequestStore::new();

        let err = idp.create_authenticate_request(None, &sp(), None, &pending).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Idp \"https://idp.example.com\" is configured for signed AuthenticateRequests, but ServiceCertificates configuration contains no certificate with usage \"Signing\" or \"Both\"."
        );

        let credentials = SigningCredentials::from_pem(SP_KEY).unwrap();
        let request = idp
            .create_authenticate_request(None, &sp(), Some(&credentials), &pending)
            .unwrap();
        assert!(request.signing_credentials.is_some());

        let never = sp().with_signing_behavior(SigningBehavior::Never);
        let request = idp
            .create_authenticate_request(None, &never, Some(&credentials), &pending)
            .unwrap();
        assert!(request.signing_credentials.is_none());
    }
}
