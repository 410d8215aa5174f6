use crate::application::rule_sync::blocked_page_domain;
use crate::application::service::LimiterService;
use crate::domain::models::{normalize_domain, ControlMessage, ControlResponse, NativeRule};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::KeyValueStore;
use crate::infrastructure::rule_engine::NativeRuleEngine;
use crate::infrastructure::tab_host::TabHost;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnblockOutcome {
    pub domain: String,
    pub was_blocked: bool,
    pub restored_tabs: usize,
}

impl<S, R, T> LimiterService<S, R, T>
where
    S: KeyValueStore,
    R: NativeRuleEngine,
    T: TabHost,
{
    /// Entry point for the settings UI channel.
    pub async fn handle_message(&self, message: ControlMessage) -> Result<ControlResponse, InfraError> {
        match message {
            ControlMessage::UpdateBlockingRules => {
                if let Err(error) = self.update_blocking_rules().await {
                    tracing::error!(%error, "blocking rule resync failed");
                }
                Ok(ControlResponse::updated())
            }
            ControlMessage::UnblockSite { domain } => {
                self.unblock_site(&domain).await?;
                Ok(ControlResponse::unblocked())
            }
        }
    }

    /// Reloads the persisted block-list and reinstalls the native rules.
    pub async fn update_blocking_rules(&self) -> Result<Vec<NativeRule>, InfraError> {
        let mut state = self.state.lock().await;
        state.blocked_sites = self.tracking.load_blocked()?;
        self.rules.sync(&state.blocked_sites).await
    }

    pub async fn unblock_site(&self, domain: &str) -> Result<UnblockOutcome, InfraError> {
        let domain = normalize_domain(domain)
            .ok_or_else(|| InfraError::InvalidInput("domain must not be empty".to_string()))?;

        let mut state = self.state.lock().await;
        let was_blocked = state.remove_blocked(&domain);
        state.time_spent.insert(domain.clone(), 0.0);

        self.tracking.save_blocked(&state.blocked_sites)?;
        self.rules.sync(&state.blocked_sites).await?;
        self.tracking.save_time_spent(&state.time_spent)?;
        let restored_tabs = self.restore_blocked_tabs(&domain).await?;

        tracing::info!(%domain, was_blocked, restored_tabs, "domain unblocked");
        Ok(UnblockOutcome {
            domain,
            was_blocked,
            restored_tabs,
        })
    }

    /// Sends tabs parked on the blocked page for `domain` back to the site.
    async fn restore_blocked_tabs(&self, domain: &str) -> Result<usize, InfraError> {
        let live_url = format!("https://{domain}");
        let mut restored = 0;
        for tab in self.tabs.all_tabs().await? {
            let parked_here = tab
                .url
                .as_deref()
                .and_then(|url| blocked_page_domain(self.rules.extension_root(), url))
                .is_some_and(|blocked| blocked == domain);
            if parked_here {
                self.tabs.navigate(tab.id, &live_url).await?;
                restored += 1;
            }
        }
        Ok(restored)
    }
}
