use crate::application::rule_sync::{blocked_page_url, RuleSynchronizer};
use crate::application::tracking_store::{
    TrackerState, TrackingStore, BLOCKED_SITES_KEY, TIME_LIMITED_SITES_KEY,
};
use crate::domain::models::{
    canonical_domain_from_url, format_blocked_at, BlockedSite, NativeRule, ResourceType,
};
use crate::infrastructure::config::LimiterConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::{KeyValueStore, StorageArea, StorageChange};
use crate::infrastructure::rule_engine::{evaluate_redirect, NativeRuleEngine};
use crate::infrastructure::tab_host::TabHost;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Owns the tracker state. Every operation takes the state lock for its whole
/// transaction, so ticks, tab events and control messages never interleave.
pub struct LimiterService<S, R, T>
where
    S: KeyValueStore,
    R: NativeRuleEngine,
    T: TabHost,
{
    pub(crate) tracking: TrackingStore<S>,
    pub(crate) rules: RuleSynchronizer<R>,
    pub(crate) tabs: Arc<T>,
    pub(crate) state: Mutex<TrackerState>,
    timezone: Option<Tz>,
    now_provider: NowProvider,
}

impl<S, R, T> LimiterService<S, R, T>
where
    S: KeyValueStore,
    R: NativeRuleEngine,
    T: TabHost,
{
    pub fn new(store: Arc<S>, rule_engine: Arc<R>, tabs: Arc<T>, config: &LimiterConfig) -> Self {
        Self {
            tracking: TrackingStore::new(store),
            rules: RuleSynchronizer::new(
                rule_engine,
                config.extension_root.clone(),
                config.rule_capacity,
            ),
            tabs,
            state: Mutex::new(TrackerState::default()),
            timezone: config.timezone,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    /// Loads the three persisted records and installs the native rules.
    /// A record that fails to load is logged and left empty.
    pub async fn initialize(&self) -> Result<(), InfraError> {
        let mut state = self.state.lock().await;
        state.blocked_sites = self.tracking.load_blocked().unwrap_or_else(|error| {
            tracing::warn!(%error, "failed to load blocked sites");
            Vec::new()
        });
        state.time_limits = self.tracking.load_limits().unwrap_or_else(|error| {
            tracing::warn!(%error, "failed to load time limits");
            Default::default()
        });
        state.time_spent = self.tracking.load_time_spent().unwrap_or_else(|error| {
            tracing::warn!(%error, "failed to load time spent");
            Default::default()
        });
        self.rules.sync(&state.blocked_sites).await?;
        tracing::info!(
            blocked = state.blocked_sites.len(),
            limited = state.time_limits.len(),
            "tracker state loaded"
        );
        Ok(())
    }

    pub async fn snapshot(&self) -> TrackerState {
        self.state.lock().await.clone()
    }

    pub async fn installed_rules(&self) -> Result<Vec<NativeRule>, InfraError> {
        self.rules.engine().dynamic_rules().await
    }

    /// Where the installed rules send a top-level navigation to `url`, if
    /// anywhere.
    pub async fn resolve_navigation(&self, url: &str) -> Result<Option<String>, InfraError> {
        let rules = self.installed_rules().await?;
        evaluate_redirect(&rules, url, ResourceType::MainFrame)
    }

    /// Appends a blocked entry for `domain`, persists it and resyncs the
    /// native rules. Returns `false` when the domain was already blocked.
    /// A list that would overflow the rule capacity is refused before any
    /// state changes.
    pub(crate) async fn add_blocked(
        &self,
        state: &mut TrackerState,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        if state.is_blocked(domain) {
            return Ok(false);
        }
        self.rules.ensure_capacity(state.blocked_sites.len() + 1)?;
        state.push_blocked(BlockedSite::new(domain, format_blocked_at(now, self.timezone)));
        self.tracking.save_blocked(&state.blocked_sites)?;
        self.rules.sync(&state.blocked_sites).await?;
        Ok(true)
    }

    /// Blocks `domain` and sends every open tab on it to the blocked page.
    pub(crate) async fn block_domain(
        &self,
        state: &mut TrackerState,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, InfraError> {
        if !self.add_blocked(state, domain, now).await? {
            return Ok(false);
        }
        let redirected = self.redirect_domain_tabs(domain).await?;
        tracing::info!(domain, redirected, "domain blocked");
        Ok(true)
    }

    pub(crate) fn blocked_page_for(&self, domain: &str) -> Result<String, InfraError> {
        blocked_page_url(self.rules.extension_root(), domain)
    }

    pub(crate) async fn redirect_domain_tabs(&self, domain: &str) -> Result<usize, InfraError> {
        let target = self.blocked_page_for(domain)?;
        let mut redirected = 0;
        for tab in self.tabs.all_tabs().await? {
            let on_domain = tab
                .url
                .as_deref()
                .and_then(canonical_domain_from_url)
                .is_some_and(|tab_domain| tab_domain == domain);
            if on_domain {
                self.tabs.navigate(tab.id, &target).await?;
                redirected += 1;
            }
        }
        Ok(redirected)
    }

    /// Refreshes the mirrors after a persisted `sync` record changed. A changed
    /// block-list also resyncs the native rules.
    pub async fn reload_from_change(&self, change: &StorageChange) -> Result<(), InfraError> {
        if change.area != StorageArea::Sync {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        match change.key.as_str() {
            BLOCKED_SITES_KEY => {
                let blocked_sites = self.tracking.load_blocked()?;
                if blocked_sites != state.blocked_sites {
                    state.blocked_sites = blocked_sites;
                    self.rules.sync(&state.blocked_sites).await?;
                }
            }
            TIME_LIMITED_SITES_KEY => {
                state.time_limits = self.tracking.load_limits()?;
            }
            _ => {}
        }
        Ok(())
    }
}
