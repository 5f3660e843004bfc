//! The service provider: the surface framework adapters use.

use crate::claims::{ClaimsExtractor, ClaimsIdentity};
use crate::config::Options;
use crate::error::{Result, SamlError};
use crate::identity_provider::IdentityProvider;
use crate::pending::PendingRequestStore;
use crate::registry::{FederationManager, IdentityProviderRegistry};
use crate::replay::ReplayCache;
use crate::request::Saml2AuthenticationRequest;
use crate::response::Saml2Response;
use crate::types::EntityId;
use armature_saml_metadata::{MetadataResolver, MetadataSource};
use armature_xmldsig::{SignatureValidator, SigningCredentials, XmlSignatureVerifier};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// A SAML2 service provider.
///
/// Adapters use four operations: [`create_authenticate_request`],
/// [`read_response`], [`validate`] and [`claims`].
///
/// [`create_authenticate_request`]: Self::create_authenticate_request
/// [`read_response`]: Self::read_response
/// [`validate`]: Self::validate
/// [`claims`]: Self::claims
pub struct ServiceProvider {
    options: Arc<Options>,
    registry: Arc<IdentityProviderRegistry>,
    pending: PendingRequestStore,
    replay_cache: ReplayCache,
    verifier: Arc<dyn SignatureValidator>,
    signing_credentials: Option<SigningCredentials>,
}

impl ServiceProvider {
    /// Builds a service provider that loads metadata over HTTP and from files.
    pub async fn new(options: Options) -> Result<Self> {
        Self::builder(options).build().await
    }

    pub fn builder(options: Options) -> ServiceProviderBuilder {
        ServiceProviderBuilder {
            options,
            source: None,
            manager: None,
            verifier: None,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn registry(&self) -> &IdentityProviderRegistry {
        &self.registry
    }

    pub fn pending_requests(&self) -> &PendingRequestStore {
        &self.pending
    }

    pub fn replay_cache(&self) -> &ReplayCache {
        &self.replay_cache
    }

    /// Builds an AuthnRequest to `idp`, or to the first known identity
    /// provider, and records it so the response can be correlated.
    pub async fn create_authenticate_request(
        &self,
        idp: Option<&EntityId>,
        return_location: Option<Url>,
    ) -> Result<Saml2AuthenticationRequest> {
        let idp = match idp {
            Some(entity_id) => self
                .registry
                .resolve(entity_id)
                .await
                .ok_or_else(|| SamlError::UnknownIdentityProvider(entity_id.to_string()))?,
            None => self
                .registry
                .all()
                .into_iter()
                .next()
                .ok_or_else(|| SamlError::Configuration("No Idp is configured.".into()))?,
        };
        idp.create_authenticate_request(
            return_location,
            &self.options.sp,
            self.signing_credentials.as_ref(),
            &self.pending,
        )
    }

    pub fn read_response(&self, xml: &str) -> Result<Saml2Response> {
        Saml2Response::read(xml)
    }

    /// Reads the base64 `SAMLResponse` form value of an HTTP POST.
    pub fn read_response_base64(&self, encoded: &str) -> Result<Saml2Response> {
        Saml2Response::from_base64(encoded)
    }

    /// The identity provider that issued `response`.
    pub async fn identity_provider_for(&self, response: &Saml2Response) -> Option<Arc<IdentityProvider>> {
        self.registry.resolve(response.issuer()?).await
    }

    /// Validates `response` against its issuer. A response from an unknown
    /// issuer is invalid.
    pub async fn validate(&self, response: &Saml2Response) -> bool {
        let Some(idp) = self.identity_provider_for(response).await else {
            debug!("Response {} has no known issuer: {:?}", response.id(), response.issuer());
            return false;
        };
        response.validate(&idp, &self.pending, self.verifier.as_ref())
    }

    /// Claims of a validated response. See [`Saml2Response::claims`].
    pub fn claims(&self, response: &Saml2Response) -> Result<Vec<ClaimsIdentity>> {
        let extractor = ClaimsExtractor::new(
            &self.options.sp.entity_id,
            &self.replay_cache,
            self.options.sp.max_clock_skew,
        );
        response.claims(&extractor)
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("entity_id", &self.options.sp.entity_id)
            .field("registry", &self.registry)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Builder for [`ServiceProvider`], for replacing its collaborators.
pub struct ServiceProviderBuilder {
    options: Options,
    source: Option<Arc<dyn MetadataSource>>,
    manager: Option<Arc<dyn FederationManager>>,
    verifier: Option<Arc<dyn SignatureValidator>>,
}

impl ServiceProviderBuilder {
    pub fn with_metadata_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_federation_manager(mut self, manager: Arc<dyn FederationManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn with_signature_validator(mut self, verifier: Arc<dyn SignatureValidator>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Loads the signing key and every identity provider. Must run within a
    /// tokio runtime.
    pub async fn build(self) -> Result<ServiceProvider> {
        let options = self.options;
        options.validate()?;

        let signing_credentials = options
            .sp
            .signing_key_pem
            .as_deref()
            .map(|pem| {
                let credentials = SigningCredentials::from_pem(pem)?;
                match &options.sp.signing_certificate_pem {
                    Some(cert) => credentials.with_certificate_pem(cert),
                    None => Ok(credentials),
                }
            })
            .transpose()
            .map_err(|e| SamlError::Configuration(format!("Invalid service provider signing key: {e}")))?;

        let source: Arc<dyn MetadataSource> = match self.source {
            Some(source) => source,
            None => Arc::new(MetadataResolver::new(&options.metadata.resolver_config())?),
        };
        let registry = IdentityProviderRegistry::build(&options, source, self.manager).await?;
        info!("SAML2 service provider {} ready", options.sp.entity_id);
        let pending = PendingRequestStore::with_lifetime(options.sp.pending_request_lifetime);

        Ok(ServiceProvider {
            options: Arc::new(options),
            registry: Arc::new(registry),
            pending,
            replay_cache: ReplayCache::new(),
            verifier: self
                .verifier
                .unwrap_or_else(|| Arc::new(XmlSignatureVerifier::new())),
            signing_credentials,
        })
    }
}
