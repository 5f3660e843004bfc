//! SAML2 service provider engine for Armature.
//!
//! Builds AuthnRequests, validates responses from identity providers and turns
//! their assertions into claims. Identity providers come from configuration,
//! from federation metadata and from a pluggable [`FederationManager`]; their
//! metadata is refreshed in the background.
//!
//! ```no_run
//! use armature_saml::{IdentityProviderConfig, Options, ServiceProvider, SpOptions};
//! use url::Url;
//!
//! # async fn run(saml_response: &str) -> armature_saml::Result<()> {
//! let options = Options::new(SpOptions::new(
//!     "https://sp.example.com",
//!     Url::parse("https://sp.example.com/acs").unwrap(),
//! ))
//! .with_identity_provider(
//!     IdentityProviderConfig::new("https://idp.example.com")
//!         .with_metadata(Some("https://idp.example.com/metadata".into())),
//! );
//! let sp = ServiceProvider::new(options).await?;
//!
//! let request = sp.create_authenticate_request(None, None).await?;
//! let xml = request.to_xml()?;
//! # let _ = xml;
//!
//! let response = sp.read_response_base64(saml_response)?;
//! if sp.validate(&response).await {
//!     for identity in sp.claims(&response)? {
//!         println!("{:?}", identity.name_identifier());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod assertion;
pub mod claims;
pub mod config;
pub mod error;
pub mod federation;
pub mod identity_provider;
pub mod pending;
pub mod refresh;
pub mod registry;
pub mod replay;
pub mod request;
pub mod response;
pub mod service_provider;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use assertion::{Conditions, NameId, Saml2Assertion, Saml2Attribute};
pub use claims::{Claim, ClaimsExtractor, ClaimsIdentity, claim_types};
pub use config::{
    FederationConfig, IdentityProviderConfig, MetadataOptions, Options, SigningBehavior, SpOptions,
};
pub use error::{Result, SamlError};
pub use federation::Federation;
pub use identity_provider::{IdentityProvider, IdpSnapshot};
pub use pending::{PendingRequestState, PendingRequestStore};
pub use refresh::{MetadataRefreshScheduler, RefreshState, RefreshTarget};
pub use registry::{FederationManager, IdentityProviderRegistry};
pub use replay::ReplayCache;
pub use request::{Saml2AuthenticationRequest, generate_relay_state};
pub use response::{Saml2Response, Saml2ResponseBuilder};
pub use service_provider::{ServiceProvider, ServiceProviderBuilder};
pub use types::{Binding, EntityId, NameIdFormat, NameIdPolicy, Saml2Id, StatusCode};
