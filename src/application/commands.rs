use crate::application::bootstrap::bootstrap_workspace;
use crate::application::monitor::TickOutcome;
use crate::application::service::{LimiterService, NowProvider};
use crate::application::settings::{SiteLimitOutcome, SiteOverview};
use crate::domain::models::{BrowserTab, ControlMessage, ControlResponse, NativeRule, TabEvent};
use crate::infrastructure::config::{load_limiter_config, LimiterConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::{KeyValueStore, SqliteKeyValueStore, StorageChange};
use crate::infrastructure::rule_engine::SqliteRuleEngine;
use crate::infrastructure::tab_host::{BridgeTabHost, TabNavigation};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub type DesktopLimiter = LimiterService<SqliteKeyValueStore, SqliteRuleEngine, BridgeTabHost>;

pub struct AppState {
    database_path: PathBuf,
    logs_dir: PathBuf,
    config: LimiterConfig,
    store: Arc<SqliteKeyValueStore>,
    tab_host: Arc<BridgeTabHost>,
    limiter: Arc<DesktopLimiter>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::build(&workspace_root, None)
    }

    #[cfg(test)]
    pub(crate) fn with_now_provider(
        workspace_root: PathBuf,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        Self::build(&workspace_root, Some(now_provider))
    }

    fn build(workspace_root: &Path, now_provider: Option<NowProvider>) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(workspace_root)?;
        let config = load_limiter_config(&bootstrap.config_dir)?;

        let store = Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path));
        let rule_engine = Arc::new(SqliteRuleEngine::new(&bootstrap.database_path));
        let tab_host = Arc::new(BridgeTabHost::default());
        let mut limiter = LimiterService::new(
            Arc::clone(&store),
            rule_engine,
            Arc::clone(&tab_host),
            &config,
        );
        if let Some(now_provider) = now_provider {
            limiter = limiter.with_now_provider(now_provider);
        }

        Ok(Self {
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            config,
            store,
            tab_host,
            limiter: Arc::new(limiter),
            log_guard: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn limiter(&self) -> Arc<DesktopLimiter> {
        Arc::clone(&self.limiter)
    }

    pub fn subscribe_storage(&self) -> broadcast::Receiver<StorageChange> {
        self.store.subscribe()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

pub async fn initialize_impl(state: &AppState) -> Result<(), InfraError> {
    state.limiter.initialize().await?;
    state.log_info(
        "initialize",
        &format!(
            "tracker ready app={} database={}",
            state.config.app_name,
            state.database_path.display()
        ),
    );
    Ok(())
}

pub async fn handle_message_impl(
    state: &AppState,
    message: ControlMessage,
) -> Result<ControlResponse, InfraError> {
    let summary = match &message {
        ControlMessage::UpdateBlockingRules => "updateBlockingRules".to_string(),
        ControlMessage::UnblockSite { domain } => format!("unblockSite domain={domain}"),
    };
    let response = state.limiter.handle_message(message).await?;
    state.log_info("handle_message", &summary);
    Ok(response)
}

pub async fn set_site_limit_impl(
    state: &AppState,
    site: String,
    limit: String,
) -> Result<SiteLimitOutcome, InfraError> {
    let outcome = state.limiter.set_site_limit(&site, &limit).await?;
    let message = match &outcome {
        SiteLimitOutcome::Blocked {
            domain,
            already_blocked,
        } => format!("blocked domain={domain} already_blocked={already_blocked}"),
        SiteLimitOutcome::Limited { domain, minutes } => {
            format!("limited domain={domain} minutes={minutes}")
        }
    };
    state.log_info("set_site_limit", &message);
    Ok(outcome)
}

pub async fn remove_time_limit_impl(state: &AppState, domain: String) -> Result<bool, InfraError> {
    let removed = state.limiter.remove_time_limit(&domain).await?;
    if removed {
        state.log_info("remove_time_limit", &format!("removed domain={}", domain.trim()));
    }
    Ok(removed)
}

pub fn list_sites_impl(state: &AppState) -> Result<SiteOverview, InfraError> {
    state.limiter.site_overview()
}

pub async fn list_rules_impl(state: &AppState) -> Result<Vec<NativeRule>, InfraError> {
    state.limiter.installed_rules().await
}

pub async fn resolve_navigation_impl(
    state: &AppState,
    url: String,
) -> Result<Option<String>, InfraError> {
    state.limiter.resolve_navigation(&url).await
}

pub fn sync_tabs_impl(state: &AppState, tabs: Vec<BrowserTab>) -> Result<usize, InfraError> {
    let count = tabs.len();
    state.tab_host.sync_tabs(tabs)?;
    Ok(count)
}

/// Mirrors the event into the tab registry first, so the tracker sees the
/// same tab state the browser reported.
pub async fn report_tab_event_impl(state: &AppState, event: TabEvent) -> Result<(), InfraError> {
    tracing::debug!(tab_id = event.tab_id(), ?event, "tab event reported");
    match &event {
        TabEvent::Activated { tab_id } => state.tab_host.focus_tab(*tab_id)?,
        TabEvent::Removed { tab_id } => state.tab_host.remove_tab(*tab_id)?,
        TabEvent::Updated {
            tab_id,
            url: Some(url),
            ..
        } => state.tab_host.set_url(*tab_id, Some(url.clone()))?,
        TabEvent::Updated { .. } => {}
    }
    state.limiter.handle_tab_event(&event).await
}

pub fn clear_tab_focus_impl(state: &AppState) -> Result<(), InfraError> {
    state.tab_host.clear_focus()
}

pub fn take_tab_navigations_impl(state: &AppState) -> Result<Vec<TabNavigation>, InfraError> {
    state.tab_host.take_navigations()
}

pub async fn tick_now_impl(state: &AppState) -> Result<TickOutcome, InfraError> {
    let outcome = state.limiter.tick().await?;
    if let TickOutcome::Blocked {
        domain,
        total_seconds,
    } = &outcome
    {
        state.log_info(
            "tick_now",
            &format!("limit reached domain={domain} total_seconds={total_seconds}"),
        );
    }
    Ok(outcome)
}
