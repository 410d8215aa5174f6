use crate::domain::models::{BrowserTab, TabId};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[async_trait]
pub trait TabHost: Send + Sync {
    /// Active tab of the focused window, if any.
    async fn focused_tab(&self) -> Result<Option<BrowserTab>, InfraError>;
    async fn all_tabs(&self) -> Result<Vec<BrowserTab>, InfraError>;
    async fn navigate(&self, tab_id: TabId, url: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TabNavigation {
    pub tab_id: TabId,
    pub url: String,
}

#[derive(Debug, Default)]
struct BridgeState {
    tabs: BTreeMap<TabId, BrowserTab>,
    focused: Option<TabId>,
    pending: Vec<TabNavigation>,
}

/// Tab registry mirrored from the browser bridge. The bridge pushes tab
/// snapshots and events in and drains the navigations requested here.
#[derive(Debug, Default)]
pub struct BridgeTabHost {
    state: Mutex<BridgeState>,
}

impl BridgeTabHost {
    fn lock(&self) -> Result<MutexGuard<'_, BridgeState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("tab registry: {error}")))
    }

    /// Replaces the registry with a full snapshot from the bridge.
    pub fn sync_tabs(&self, tabs: Vec<BrowserTab>) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        state.focused = tabs.iter().find(|tab| tab.active).map(|tab| tab.id);
        state.tabs = tabs.into_iter().map(|tab| (tab.id, tab)).collect();
        Ok(())
    }

    pub fn upsert_tab(&self, tab: BrowserTab) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        if tab.active {
            state.focused = Some(tab.id);
        }
        state.tabs.insert(tab.id, tab);
        Ok(())
    }

    pub fn set_url(&self, tab_id: TabId, url: Option<String>) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        let tab = state.tabs.entry(tab_id).or_insert_with(|| BrowserTab {
            id: tab_id,
            url: None,
            active: false,
        });
        tab.url = url;
        Ok(())
    }

    pub fn focus_tab(&self, tab_id: TabId) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        for (id, tab) in state.tabs.iter_mut() {
            tab.active = *id == tab_id;
        }
        state.focused = Some(tab_id);
        Ok(())
    }

    /// Marks the browser window as unfocused: no tab is sampled.
    pub fn clear_focus(&self) -> Result<(), InfraError> {
        self.lock()?.focused = None;
        Ok(())
    }

    pub fn remove_tab(&self, tab_id: TabId) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        state.tabs.remove(&tab_id);
        if state.focused == Some(tab_id) {
            state.focused = None;
        }
        Ok(())
    }

    pub fn take_navigations(&self) -> Result<Vec<TabNavigation>, InfraError> {
        Ok(std::mem::take(&mut self.lock()?.pending))
    }
}

#[async_trait]
impl TabHost for BridgeTabHost {
    async fn focused_tab(&self) -> Result<Option<BrowserTab>, InfraError> {
        let state = self.lock()?;
        Ok(state.focused.and_then(|id| state.tabs.get(&id).cloned()))
    }

    async fn all_tabs(&self) -> Result<Vec<BrowserTab>, InfraError> {
        Ok(self.lock()?.tabs.values().cloned().collect())
    }

    async fn navigate(&self, tab_id: TabId, url: &str) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        let tab = state
            .tabs
            .get_mut(&tab_id)
            .ok_or(InfraError::TabNotFound(tab_id))?;
        tab.url = Some(url.to_string());
        state.pending.push(TabNavigation {
            tab_id,
            url: url.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: TabId, url: &str, active: bool) -> BrowserTab {
        BrowserTab {
            id,
            url: Some(url.to_string()),
            active,
        }
    }

    #[tokio::test]
    async fn snapshot_sets_focused_tab() {
        let host = BridgeTabHost::default();
        host.sync_tabs(vec![
            tab(1, "https://a.com", false),
            tab(2, "https://b.com", true),
        ])
        .expect("sync tabs");

        let focused = host.focused_tab().await.expect("focused").expect("some tab");
        assert_eq!(focused.id, 2);

        host.focus_tab(1).expect("focus");
        let focused = host.focused_tab().await.expect("focused").expect("some tab");
        assert_eq!(focused.id, 1);

        host.clear_focus().expect("clear focus");
        assert!(host.focused_tab().await.expect("focused").is_none());
    }

    #[tokio::test]
    async fn navigation_updates_registry_and_queues_for_bridge() {
        let host = BridgeTabHost::default();
        host.upsert_tab(tab(4, "https://a.com", true)).expect("upsert");
        host.navigate(4, "tauri://localhost/blocked.html?domain=a.com")
            .await
            .expect("navigate");

        let tabs = host.all_tabs().await.expect("tabs");
        assert_eq!(
            tabs[0].url.as_deref(),
            Some("tauri://localhost/blocked.html?domain=a.com")
        );
        assert_eq!(host.take_navigations().expect("drain").len(), 1);
        assert!(host.take_navigations().expect("drain again").is_empty());
    }

    #[tokio::test]
    async fn navigating_unknown_tab_fails() {
        let host = BridgeTabHost::default();
        let result = host.navigate(99, "https://a.com").await;
        assert!(matches!(result, Err(InfraError::TabNotFound(99))));
    }

    #[tokio::test]
    async fn removing_focused_tab_clears_focus() {
        let host = BridgeTabHost::default();
        host.upsert_tab(tab(1, "https://a.com", true)).expect("upsert");
        host.remove_tab(1).expect("remove");
        assert!(host.focused_tab().await.expect("focused").is_none());
        assert!(host.all_tabs().await.expect("tabs").is_empty());
    }
}
