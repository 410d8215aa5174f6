use crate::application::service::LimiterService;
use crate::domain::models::{canonical_domain_from_url, TabEvent, TabId, TabStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::{KeyValueStore, StorageArea, StorageChange};
use crate::infrastructure::rule_engine::NativeRuleEngine;
use crate::infrastructure::tab_host::TabHost;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// No focused tab, or its URL has no host.
    Idle,
    Untracked { domain: String },
    /// First sample for the tab; no time attributed yet.
    SessionStarted { domain: String },
    Accumulated { domain: String, total_seconds: f64 },
    Blocked { domain: String, total_seconds: f64 },
}

impl<S, R, T> LimiterService<S, R, T>
where
    S: KeyValueStore,
    R: NativeRuleEngine,
    T: TabHost,
{
    pub async fn tick(&self) -> Result<TickOutcome, InfraError> {
        let mut state = self.state.lock().await;
        let Some(tab) = self.tabs.focused_tab().await? else {
            state.active_sessions.clear();
            return Ok(TickOutcome::Idle);
        };
        // Only the focused tab keeps a session. A tab that lost focus between
        // ticks starts over when it regains it.
        state.active_sessions.retain(|tab_id, _| *tab_id == tab.id);
        let Some(domain) = tab.url.as_deref().and_then(canonical_domain_from_url) else {
            tracing::debug!(tab_id = tab.id, "focused tab url has no host");
            state.active_sessions.remove(&tab.id);
            return Ok(TickOutcome::Idle);
        };
        let Some(limit_minutes) = state.limit_minutes(&domain) else {
            state.active_sessions.remove(&tab.id);
            return Ok(TickOutcome::Untracked { domain });
        };

        let now = self.now();
        let Some(last_sample) = state.active_sessions.insert(tab.id, now) else {
            return Ok(TickOutcome::SessionStarted { domain });
        };

        let elapsed_seconds = (now - last_sample).num_milliseconds().max(0) as f64 / 1000.0;
        let total_seconds = state.add_time_spent(&domain, elapsed_seconds);
        self.tracking.save_time_spent(&state.time_spent)?;

        let allowed_seconds = f64::from(limit_minutes) * 60.0;
        if total_seconds >= allowed_seconds && !state.is_blocked(&domain) {
            self.block_domain(&mut state, &domain, now).await?;
            return Ok(TickOutcome::Blocked {
                domain,
                total_seconds,
            });
        }

        Ok(TickOutcome::Accumulated {
            domain,
            total_seconds,
        })
    }

    pub async fn handle_tab_event(&self, event: &TabEvent) -> Result<(), InfraError> {
        match event {
            TabEvent::Activated { tab_id } => self.on_tab_activated(*tab_id).await,
            TabEvent::Removed { tab_id } => self.on_tab_removed(*tab_id).await,
            TabEvent::Updated {
                tab_id,
                status: TabStatus::Loading,
                url: Some(url),
            } => {
                self.intercept_navigation(*tab_id, url).await?;
            }
            TabEvent::Updated { .. } => {}
        }
        Ok(())
    }

    /// Focus restarts the sampling clock, so time only counts while a tab
    /// stays focused across consecutive ticks.
    pub async fn on_tab_activated(&self, tab_id: TabId) {
        let now = self.now();
        self.state.lock().await.active_sessions.insert(tab_id, now);
    }

    pub async fn on_tab_removed(&self, tab_id: TabId) {
        self.state.lock().await.active_sessions.remove(&tab_id);
    }

    /// Sends a tab that starts loading a blocked domain to the blocked page.
    pub async fn intercept_navigation(&self, tab_id: TabId, url: &str) -> Result<bool, InfraError> {
        let state = self.state.lock().await;
        let Some(domain) = canonical_domain_from_url(url) else {
            tracing::debug!(tab_id, "ignoring navigation to url without host");
            return Ok(false);
        };
        if !state.is_blocked(&domain) {
            return Ok(false);
        }
        let target = self.blocked_page_for(&domain)?;
        self.tabs.navigate(tab_id, &target).await?;
        tracing::info!(tab_id, %domain, "navigation to blocked domain intercepted");
        Ok(true)
    }
}

/// Ticks forever at `period`. A tick that overruns delays the next one
/// instead of queueing a burst.
pub async fn run_monitor<S, R, T>(service: Arc<LimiterService<S, R, T>>, period: Duration)
where
    S: KeyValueStore,
    R: NativeRuleEngine,
    T: TabHost,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        match service.tick().await {
            Ok(TickOutcome::Blocked {
                domain,
                total_seconds,
            }) => {
                tracing::info!(%domain, total_seconds, "time limit reached");
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "monitor tick failed"),
        }
    }
}

/// Keeps the mirrors in step with persisted changes and forwards `sync`
/// changes to `on_change` (the UI refresh hook). Returns once the store is
/// dropped.
pub async fn watch_storage_changes<S, R, T, F>(
    service: Arc<LimiterService<S, R, T>>,
    mut changes: broadcast::Receiver<StorageChange>,
    on_change: F,
) where
    S: KeyValueStore,
    R: NativeRuleEngine,
    T: TabHost,
    F: Fn(&StorageChange) + Send,
{
    loop {
        match changes.recv().await {
            Ok(change) => {
                if let Err(error) = service.reload_from_change(&change).await {
                    tracing::warn!(%error, key = %change.key, "failed to reload changed record");
                }
                if change.area == StorageArea::Sync {
                    on_change(&change);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "storage change notifications dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
