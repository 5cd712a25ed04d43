/*!
Named set of storage tiers.
*/

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::{LocalFileStorage, MemoryStorage, PayloadStore};
use crate::config::{StrataConfig, TierBackend, TierConfig};
use crate::{Result, StrataError};

/// Maps tier names to payload stores and knows which tier is primary
#[derive(Clone)]
pub struct TierRegistry {
    primary: String,
    tiers: HashMap<String, Arc<dyn PayloadStore>>,
}

impl std::fmt::Debug for TierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierRegistry")
            .field("primary", &self.primary)
            .field("tiers", &self.names())
            .finish()
    }
}

impl TierRegistry {
    /// Create a registry whose primary tier is `store`
    pub fn new<S: Into<String>>(primary: S, store: Arc<dyn PayloadStore>) -> Self {
        let primary = primary.into();
        let mut tiers = HashMap::new();
        tiers.insert(primary.clone(), store);
        Self { primary, tiers }
    }

    /// Add or replace a tier
    pub fn register<S: Into<String>>(&mut self, name: S, store: Arc<dyn PayloadStore>) -> &mut Self {
        self.tiers.insert(name.into(), store);
        self
    }

    pub fn with_tier<S: Into<String>>(mut self, name: S, store: Arc<dyn PayloadStore>) -> Self {
        self.register(name, store);
        self
    }

    /// Build every configured tier
    pub fn from_config(config: &StrataConfig) -> Result<Self> {
        config.validate()?;
        let mut tiers = HashMap::new();
        for tier in &config.tiers {
            tiers.insert(tier.name.clone(), build_store(tier)?);
        }
        info!(
            primary = %config.primary_tier,
            tiers = tiers.len(),
            "Configured storage tiers"
        );
        Ok(Self {
            primary: config.primary_tier.clone(),
            tiers,
        })
    }

    /// Look up a tier; unknown names are `InvalidTarget`
    pub fn get(&self, name: &str) -> Result<Arc<dyn PayloadStore>> {
        self.tiers
            .get(name)
            .cloned()
            .ok_or_else(|| StrataError::invalid_target(format!("unknown storage tier '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tiers.contains_key(name)
    }

    pub fn primary(&self) -> Arc<dyn PayloadStore> {
        // the constructor always registers the primary tier
        Arc::clone(&self.tiers[&self.primary])
    }

    pub fn primary_name(&self) -> &str {
        &self.primary
    }

    /// Sorted tier names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tiers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fail fast with `InvalidTarget` if the tier is unknown or cannot be reached
    pub fn ensure_reachable(&self, name: &str) -> Result<Arc<dyn PayloadStore>> {
        let store = self.get(name)?;
        store.check_reachable().map_err(|e| {
            warn!(tier = %name, error = %e, "Storage tier is unreachable");
            StrataError::invalid_target(format!("storage tier '{name}' is unreachable: {e}"))
        })?;
        Ok(store)
    }
}

fn build_store(tier: &TierConfig) -> Result<Arc<dyn PayloadStore>> {
    match &tier.backend {
        TierBackend::Local { path } => Ok(Arc::new(LocalFileStorage::new(path))),
        TierBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
        #[cfg(feature = "s3")]
        TierBackend::S3 { bucket, region } => Ok(Arc::new(super::S3PayloadStore::new(
            bucket.clone(),
            region.clone(),
        )?)),
        #[cfg(not(feature = "s3"))]
        TierBackend::S3 { .. } => Err(StrataError::validation(format!(
            "tier '{}' uses S3 but strata was built without the `s3` feature",
            tier.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_primary() {
        let registry = TierRegistry::new("hot", Arc::new(MemoryStorage::new()))
            .with_tier("cold", Arc::new(MemoryStorage::new()));

        assert_eq!(registry.primary_name(), "hot");
        assert_eq!(registry.names(), vec!["cold".to_string(), "hot".to_string()]);
        assert!(registry.get("cold").is_ok());
        assert!(matches!(
            registry.get("glacier"),
            Err(StrataError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_unreachable_tier_is_invalid_target() {
        let cold = Arc::new(MemoryStorage::new());
        cold.set_offline(true);
        let registry =
            TierRegistry::new("hot", Arc::new(MemoryStorage::new())).with_tier("cold", cold);

        assert!(matches!(
            registry.ensure_reachable("cold"),
            Err(StrataError::InvalidTarget(_))
        ));
        assert!(registry.ensure_reachable("hot").is_ok());
    }

    #[test]
    fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StrataConfig::single_tier(TierConfig::local("hot", dir.path()))
            .with_tier(TierConfig::memory("cold"));

        let registry = TierRegistry::from_config(&config).unwrap();
        assert_eq!(registry.primary().store_type(), "local");
        assert_eq!(registry.get("cold").unwrap().store_type(), "memory");
    }

    #[cfg(not(feature = "s3"))]
    #[test]
    fn test_s3_tier_requires_feature() {
        let config = StrataConfig::single_tier(TierConfig::memory("hot"))
            .with_tier(TierConfig::s3("cold", "archive", None));
        assert!(TierRegistry::from_config(&config).is_err());
    }
}
