//! One lookup over configured, federation and dynamic identity providers.
//!
//! The registry keeps three layers: identity providers from configuration,
//! members of configured federations, and a dynamic set supplied by a
//! [`FederationManager`]. A merged view is rebuilt only when a layer
//! republishes, so lookups are plain map reads.

use crate::config::Options;
use crate::error::Result;
use crate::federation::Federation;
use crate::identity_provider::IdentityProvider;
use crate::types::EntityId;
use armature_saml_metadata::MetadataSource;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Supplies identity providers known only at runtime.
#[async_trait]
pub trait FederationManager: Send + Sync {
    /// The complete current set. It replaces the previous one.
    async fn load_identity_providers(&self) -> Result<Vec<Arc<IdentityProvider>>>;
}

#[derive(Default)]
struct IdpSet {
    generations: Vec<u64>,
    order: Vec<Arc<IdentityProvider>>,
    index: HashMap<EntityId, usize>,
}

/// All identity providers this service provider trusts.
pub struct IdentityProviderRegistry {
    configured: Vec<Arc<IdentityProvider>>,
    federations: Vec<Arc<Federation>>,
    manager: Option<Arc<dyn FederationManager>>,
    dynamic: RwLock<Arc<Vec<Arc<IdentityProvider>>>>,
    dynamic_generation: AtomicU64,
    last_dynamic_refresh: Mutex<Option<Instant>>,
    min_refresh_interval: Duration,
    merged: RwLock<Arc<IdpSet>>,
}

impl IdentityProviderRegistry {
    /// Loads every configured identity provider and federation. Their first
    /// metadata loads happen here; a failure fails the build. A failing
    /// federation manager only leaves the dynamic layer empty.
    pub async fn build(
        options: &Options,
        source: Arc<dyn MetadataSource>,
        manager: Option<Arc<dyn FederationManager>>,
    ) -> Result<Self> {
        options.validate()?;

        let mut configured = Vec::with_capacity(options.identity_providers.len());
        for config in &options.identity_providers {
            configured.push(IdentityProvider::from_config(config, &options.metadata, source.clone()).await?);
        }
        let mut federations = Vec::with_capacity(options.federations.len());
        for config in &options.federations {
            federations.push(Federation::load(config, &options.metadata, source.clone()).await?);
        }

        let registry = Self {
            configured,
            federations,
            manager,
            dynamic: RwLock::new(Arc::new(Vec::new())),
            dynamic_generation: AtomicU64::new(0),
            last_dynamic_refresh: Mutex::new(None),
            min_refresh_interval: options.metadata.min_refresh_interval,
            merged: RwLock::new(Arc::new(IdpSet::default())),
        };
        // Logged by refresh_dynamic; the dynamic layer starts empty on failure.
        let _ = registry.refresh_dynamic().await;
        info!("Identity provider registry ready with {} Idps", registry.all().len());
        Ok(registry)
    }

    pub fn lookup(&self, entity_id: &EntityId) -> Option<Arc<IdentityProvider>> {
        let set = self.current();
        set.index.get(entity_id).map(|&i| set.order[i].clone())
    }

    /// Like [`lookup`](Self::lookup), refreshing the dynamic layer on a miss
    /// if the refresh interval allows it.
    pub async fn resolve(&self, entity_id: &EntityId) -> Option<Arc<IdentityProvider>> {
        if let Some(idp) = self.lookup(entity_id) {
            return Some(idp);
        }
        match self.refresh_dynamic().await {
            Ok(true) => self.lookup(entity_id),
            _ => None,
        }
    }

    /// Configured identity providers first, then federation members, then
    /// dynamic ones.
    pub fn all(&self) -> Vec<Arc<IdentityProvider>> {
        self.current().order.clone()
    }

    /// Replaces the dynamic layer with the federation manager's current set.
    /// Runs at most once per minimum refresh interval; returns whether it
    /// ran. On failure the previous set stays.
    pub async fn refresh_dynamic(&self) -> Result<bool> {
        let Some(manager) = &self.manager else {
            return Ok(false);
        };
        {
            let mut last = self.last_dynamic_refresh.lock();
            if last.is_some_and(|at| at.elapsed() < self.min_refresh_interval) {
                return Ok(false);
            }
            *last = Some(Instant::now());
        }

        match manager.load_identity_providers().await {
            Ok(idps) => {
                debug!("Loaded {} dynamic Idps", idps.len());
                *self.dynamic.write() = Arc::new(idps);
                self.dynamic_generation.fetch_add(1, Ordering::AcqRel);
                Ok(true)
            }
            Err(e) => {
                warn!("Loading dynamic Idps failed, keeping previous set: {}", e);
                Err(e)
            }
        }
    }

    fn generations(&self) -> Vec<u64> {
        self.federations
            .iter()
            .map(|f| f.poll_generation())
            .chain(std::iter::once(self.dynamic_generation.load(Ordering::Acquire)))
            .collect()
    }

    fn current(&self) -> Arc<IdpSet> {
        let generations = self.generations();
        {
            let merged = self.merged.read();
            if merged.generations == generations {
                return merged.clone();
            }
        }

        let mut order = self.configured.clone();
        for federation in &self.federations {
            order.extend(federation.identity_providers().iter().cloned());
        }
        order.extend(self.dynamic.read().iter().cloned());

        let mut index = HashMap::with_capacity(order.len());
        for (i, idp) in order.iter().enumerate() {
            index.entry(idp.entity_id().clone()).or_insert(i);
        }
        let set = Arc::new(IdpSet {
            generations,
            order,
            index,
        });
        *self.merged.write() = set.clone();
        set
    }
}

impl std::fmt::Debug for IdentityProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProviderRegistry")
            .field("configured", &self.configured.len())
            .field("federations", &self.federations)
            .field("dynamic", &self.dynamic.read().len())
            .finish()
    }
}
