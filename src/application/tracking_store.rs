use crate::domain::models::{BlockedSite, TabId, TimeLimits, TimeSpent};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::{KeyValueStore, StorageArea};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub const BLOCKED_SITES_KEY: &str = "blockedSites";
pub const TIME_LIMITED_SITES_KEY: &str = "timeLimitedSites";
pub const TOTAL_TIME_SPENT_KEY: &str = "totalTimeSpent";

/// In-memory mirror of the persisted records plus the per-tab sampling clock.
#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    pub blocked_sites: Vec<BlockedSite>,
    pub time_limits: TimeLimits,
    pub time_spent: TimeSpent,
    pub active_sessions: HashMap<TabId, DateTime<Utc>>,
}

impl TrackerState {
    pub fn is_blocked(&self, domain: &str) -> bool {
        self.blocked_sites.iter().any(|site| site.domain == domain)
    }

    /// Appends `site` unless its domain is already blocked.
    pub fn push_blocked(&mut self, site: BlockedSite) -> bool {
        if self.is_blocked(&site.domain) {
            return false;
        }
        self.blocked_sites.push(site);
        true
    }

    pub fn remove_blocked(&mut self, domain: &str) -> bool {
        let before = self.blocked_sites.len();
        self.blocked_sites.retain(|site| site.domain != domain);
        self.blocked_sites.len() != before
    }

    /// Positive limit in minutes, if the domain is time-limited.
    pub fn limit_minutes(&self, domain: &str) -> Option<u32> {
        self.time_limits.get(domain).copied().filter(|minutes| *minutes > 0)
    }

    pub fn add_time_spent(&mut self, domain: &str, seconds: f64) -> f64 {
        let total = self.time_spent.entry(domain.to_string()).or_insert(0.0);
        *total += seconds.max(0.0);
        *total
    }

    pub fn time_spent_for(&self, domain: &str) -> f64 {
        self.time_spent.get(domain).copied().unwrap_or(0.0)
    }
}

/// Typed access to the three persisted records.
pub struct TrackingStore<S>
where
    S: KeyValueStore,
{
    store: Arc<S>,
}

impl<S> Clone for TrackingStore<S>
where
    S: KeyValueStore,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> TrackingStore<S>
where
    S: KeyValueStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn read<T>(&self, area: StorageArea, key: &str) -> Result<T, InfraError>
    where
        T: DeserializeOwned + Default,
    {
        match self.store.get(area, key)? {
            Some(serde_json::Value::Null) | None => Ok(T::default()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    fn write<T>(&self, area: StorageArea, key: &str, value: &T) -> Result<(), InfraError>
    where
        T: Serialize,
    {
        self.store.set(area, key, &serde_json::to_value(value)?)
    }

    pub fn load_blocked(&self) -> Result<Vec<BlockedSite>, InfraError> {
        self.read(StorageArea::Sync, BLOCKED_SITES_KEY)
    }

    pub fn load_limits(&self) -> Result<TimeLimits, InfraError> {
        self.read(StorageArea::Sync, TIME_LIMITED_SITES_KEY)
    }

    pub fn load_time_spent(&self) -> Result<TimeSpent, InfraError> {
        self.read(StorageArea::Local, TOTAL_TIME_SPENT_KEY)
    }

    pub fn save_blocked(&self, blocked_sites: &[BlockedSite]) -> Result<(), InfraError> {
        for site in blocked_sites {
            site.validate().map_err(InfraError::InvalidInput)?;
        }
        self.write(StorageArea::Sync, BLOCKED_SITES_KEY, &blocked_sites)
    }

    pub fn save_limits(&self, time_limits: &TimeLimits) -> Result<(), InfraError> {
        self.write(StorageArea::Sync, TIME_LIMITED_SITES_KEY, time_limits)
    }

    pub fn save_time_spent(&self, time_spent: &TimeSpent) -> Result<(), InfraError> {
        self.write(StorageArea::Local, TOTAL_TIME_SPENT_KEY, time_spent)
    }
}
