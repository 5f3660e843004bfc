//! Federations: identity providers listed in a shared metadata document.

use crate::config::{FederationConfig, MetadataOptions};
use crate::error::Result;
use crate::identity_provider::IdentityProvider;
use crate::refresh::{MetadataRefreshScheduler, RefreshState, RefreshTarget, metadata_valid_until};
use crate::types::EntityId;
use armature_saml_metadata::{EntitiesDescriptor, MetadataLocator, MetadataSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// The identity providers of one federation, kept in step with its metadata.
pub struct Federation {
    locator: MetadataLocator,
    allow_unsolicited_authn_response: bool,
    options: MetadataOptions,
    source: Arc<dyn MetadataSource>,
    identity_providers: RwLock<Arc<Vec<Arc<IdentityProvider>>>>,
    generation: AtomicU64,
    scheduler: OnceLock<MetadataRefreshScheduler>,
}

impl Federation {
    /// Loads the federation metadata and starts refreshing it.
    pub async fn load(
        config: &FederationConfig,
        options: &MetadataOptions,
        source: Arc<dyn MetadataSource>,
    ) -> Result<Arc<Self>> {
        let locator = MetadataLocator::parse(&config.metadata_location)?;
        let federation = Arc::new(Self {
            locator,
            allow_unsolicited_authn_response: config.allow_unsolicited_authn_response,
            options: options.clone(),
            source,
            identity_providers: RwLock::new(Arc::new(Vec::new())),
            generation: AtomicU64::new(0),
            scheduler: OnceLock::new(),
        });
        let valid_until = federation.reload().await?;

        let target: Arc<dyn RefreshTarget> = federation.clone();
        let scheduler =
            MetadataRefreshScheduler::spawn(Arc::downgrade(&target), valid_until, options.min_refresh_interval);
        let _ = federation.scheduler.set(scheduler);
        Ok(federation)
    }

    /// Member identity providers, in metadata order.
    pub fn identity_providers(&self) -> Arc<Vec<Arc<IdentityProvider>>> {
        if let Some(scheduler) = self.scheduler.get() {
            scheduler.trigger();
        }
        self.identity_providers.read().clone()
    }

    /// Bumped every time the member list is republished.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Like [`generation`](Self::generation), first asking for a reload if
    /// the metadata is stale.
    pub(crate) fn poll_generation(&self) -> u64 {
        if let Some(scheduler) = self.scheduler.get() {
            scheduler.trigger();
        }
        self.generation()
    }

    pub fn refresh_state(&self) -> Option<RefreshState> {
        self.scheduler.get().map(MetadataRefreshScheduler::state)
    }

    /// Loads the metadata again and republishes the member list.
    pub async fn reload(&self) -> Result<DateTime<Utc>> {
        let entities = self.source.load_federation(&self.locator).await?;
        self.apply(&entities);
        Ok(metadata_valid_until(
            Utc::now(),
            entities.valid_until,
            entities.cache_duration,
            self.options.default_cache_duration,
        ))
    }

    /// Existing members are updated in place, so anyone holding one keeps
    /// seeing current metadata. A member whose new entry cannot be applied
    /// keeps its previous snapshot. Members no longer listed are dropped.
    fn apply(&self, entities: &EntitiesDescriptor) {
        let current = self.identity_providers.read().clone();
        let by_id: HashMap<&EntityId, &Arc<IdentityProvider>> =
            current.iter().map(|idp| (idp.entity_id(), idp)).collect();

        let mut members = Vec::new();
        for entity in entities.identity_providers() {
            match by_id.get(&EntityId::new(entity.entity_id.as_str())).copied() {
                Some(idp) => {
                    if let Err(e) = idp.apply_metadata(entity) {
                        warn!(
                            "Keeping previous metadata for Idp {} in federation {}: {}",
                            entity.entity_id, self.locator, e
                        );
                    }
                    members.push(idp.clone());
                }
                None => match IdentityProvider::from_metadata(
                    entity,
                    self.allow_unsolicited_authn_response,
                    &self.options,
                ) {
                    Ok(idp) => members.push(idp),
                    Err(e) => warn!(
                        "Skipping Idp {} in federation {}: {}",
                        entity.entity_id, self.locator, e
                    ),
                },
            }
        }

        info!("Loaded {} Idps from federation {}", members.len(), self.locator);
        *self.identity_providers.write() = Arc::new(members);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl RefreshTarget for Federation {
    fn refresh_name(&self) -> String {
        format!("federation {}", self.locator)
    }

    async fn reload_metadata(&self) -> Result<DateTime<Utc>> {
        self.reload().await
    }
}

impl fmt::Debug for Federation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Federation")
            .field("locator", &self.locator)
            .field("allow_unsolicited_authn_response", &self.allow_unsolicited_authn_response)
            .field("identity_providers", &self.identity_providers.read().len())
            .finish()
    }
}
