use crate::application::service::LimiterService;
use crate::domain::models::{canonicalize_site_input, normalize_domain};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::key_value_store::KeyValueStore;
use crate::infrastructure::rule_engine::NativeRuleEngine;
use crate::infrastructure::tab_host::TabHost;
use serde::Serialize;

const INVALID_LIMIT_MESSAGE: &str = "Please enter a valid site and time limit (0 or more).";
const INVALID_URL_MESSAGE: &str = "Invalid URL";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SiteLimitOutcome {
    Blocked { domain: String, already_blocked: bool },
    Limited { domain: String, minutes: u32 },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlockedSiteView {
    pub domain: String,
    pub blocked_at: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimeLimitView {
    pub domain: String,
    pub minutes: u32,
    pub spent_seconds: f64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SiteOverview {
    pub blocked: Vec<BlockedSiteView>,
    pub time_limits: Vec<TimeLimitView>,
}

fn parse_limit_minutes(raw: &str) -> Result<u32, InfraError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|minutes| u32::try_from(minutes).ok())
        .ok_or_else(|| InfraError::InvalidInput(INVALID_LIMIT_MESSAGE.to_string()))
}

impl<S, R, T> LimiterService<S, R, T>
where
    S: KeyValueStore,
    R: NativeRuleEngine,
    T: TabHost,
{
    /// Limit `0` blocks the site right away; any other value stores or
    /// overwrites the site's daily allowance. Input is validated before any
    /// state changes.
    pub async fn set_site_limit(&self, site: &str, limit: &str) -> Result<SiteLimitOutcome, InfraError> {
        if site.trim().is_empty() {
            return Err(InfraError::InvalidInput(INVALID_LIMIT_MESSAGE.to_string()));
        }
        let minutes = parse_limit_minutes(limit)?;
        let domain = canonicalize_site_input(site)
            .map_err(|_| InfraError::InvalidInput(INVALID_URL_MESSAGE.to_string()))?;

        if minutes == 0 {
            return self.block_now(domain).await;
        }

        let mut state = self.state.lock().await;
        state.time_limits.insert(domain.clone(), minutes);
        self.tracking.save_limits(&state.time_limits)?;
        tracing::info!(%domain, minutes, "time limit set");
        Ok(SiteLimitOutcome::Limited { domain, minutes })
    }

    async fn block_now(&self, domain: String) -> Result<SiteLimitOutcome, InfraError> {
        let mut state = self.state.lock().await;
        let added = self.add_blocked(&mut state, &domain, self.now()).await?;
        if added {
            tracing::info!(%domain, "site blocked from settings");
        }
        Ok(SiteLimitOutcome::Blocked {
            domain,
            already_blocked: !added,
        })
    }

    pub async fn remove_time_limit(&self, domain: &str) -> Result<bool, InfraError> {
        let Some(domain) = normalize_domain(domain) else {
            return Ok(false);
        };
        let mut state = self.state.lock().await;
        if state.time_limits.remove(&domain).is_none() {
            return Ok(false);
        }
        self.tracking.save_limits(&state.time_limits)?;
        Ok(true)
    }

    /// View model for the settings lists, read straight from persistence.
    pub fn site_overview(&self) -> Result<SiteOverview, InfraError> {
        let time_spent = self.tracking.load_time_spent()?;
        let blocked = self
            .tracking
            .load_blocked()?
            .into_iter()
            .map(|site| BlockedSiteView {
                label: format!("{} (Blocked at: {})", site.domain, site.blocked_at),
                domain: site.domain,
                blocked_at: site.blocked_at,
            })
            .collect();
        let time_limits = self
            .tracking
            .load_limits()?
            .into_iter()
            .map(|(domain, minutes)| TimeLimitView {
                label: format!("{domain}: {minutes} min"),
                spent_seconds: time_spent.get(&domain).copied().unwrap_or(0.0),
                domain,
                minutes,
            })
            .collect();

        Ok(SiteOverview {
            blocked,
            time_limits,
        })
    }
}
