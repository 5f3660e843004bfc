//! Loading metadata from files and URLs.

use crate::config::ResolverConfig;
use crate::error::{MetadataError, Result};
use crate::locator::MetadataLocator;
use crate::model::{EntitiesDescriptor, EntityDescriptor, Metadata};
use async_trait::async_trait;
use tracing::debug;

/// A source of parsed metadata documents.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetches and parses the document at `locator`.
    async fn load(&self, locator: &MetadataLocator) -> Result<Metadata>;

    /// Loads a document that must be a single `EntityDescriptor`.
    async fn load_idp(&self, locator: &MetadataLocator) -> Result<EntityDescriptor> {
        match self.load(locator).await? {
            Metadata::Entity(entity) => Ok(entity),
            Metadata::Entities(_) => Err(MetadataError::Load {
                locator: locator.to_string(),
                cause: "expected an EntityDescriptor, found an EntitiesDescriptor".into(),
            }),
        }
    }

    /// Loads a federation. A single `EntityDescriptor` is accepted as a
    /// federation of one.
    async fn load_federation(&self, locator: &MetadataLocator) -> Result<EntitiesDescriptor> {
        Ok(self.load(locator).await?.into_entities())
    }
}

/// Loads metadata from `file` paths and `http(s)` URLs.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    client: reqwest::Client,
}

impl MetadataResolver {
    /// Create a resolver with the given configuration.
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::limited(config.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(redirect)
            .build()
            .map_err(|e| MetadataError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Create a resolver with default configuration.
    pub fn default_resolver() -> Result<Self> {
        Self::new(&ResolverConfig::default())
    }

    /// Fetches the raw document text.
    pub async fn fetch(&self, locator: &MetadataLocator) -> Result<String> {
        debug!(%locator, "Fetching SAML metadata");
        let load_error = |cause: String| MetadataError::Load {
            locator: locator.to_string(),
            cause,
        };
        match locator {
            MetadataLocator::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| load_error(e.to_string())),
            MetadataLocator::Http(url) => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| load_error(e.to_string()))?;
                response.text().await.map_err(|e| load_error(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl MetadataSource for MetadataResolver {
    async fn load(&self, locator: &MetadataLocator) -> Result<Metadata> {
        let text = self.fetch(locator).await?;
        Metadata::parse(&text).map_err(|e| MetadataError::Load {
            locator: locator.to_string(),
            cause: e.to_string(),
        })
    }
}
