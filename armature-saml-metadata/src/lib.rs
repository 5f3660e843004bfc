//! SAML2 metadata for Armature.
//!
//! Fetches IdP and federation metadata from files or HTTP(S) and parses the
//! parts a service provider needs: SSO endpoints, artifact resolution
//! endpoints, signing keys and cache lifetimes.
//!
//! ```no_run
//! use armature_saml_metadata::{MetadataLocator, MetadataResolver, MetadataSource};
//!
//! # async fn example() -> armature_saml_metadata::Result<()> {
//! let resolver = MetadataResolver::default_resolver()?;
//! let locator = MetadataLocator::parse("https://idp.example.com/metadata")?;
//! let idp = resolver.load_idp(&locator).await?;
//! println!("loaded {}", idp.entity_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod locator;
pub mod model;
pub mod resolver;
pub mod xsd;

pub use config::{ResolverConfig, ResolverConfigBuilder};
pub use error::{MetadataError, Result};
pub use locator::MetadataLocator;
pub use model::{
    EntitiesDescriptor, EntityDescriptor, Endpoint, IdpSsoDescriptor, IndexedEndpoint, KeyDescriptor,
    KeyUse, Metadata,
};
pub use resolver::{MetadataResolver, MetadataSource};
