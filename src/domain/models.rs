use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

pub type TabId = u64;

/// Minutes allowed per canonical domain.
pub type TimeLimits = BTreeMap<String, u32>;

/// Accumulated seconds per canonical domain.
pub type TimeSpent = BTreeMap<String, f64>;

const BLOCKED_AT_FORMAT: &str = "%-I:%M:%S %p";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedSite {
    pub domain: String,
    #[serde(rename = "blockedAt")]
    pub blocked_at: String,
}

impl BlockedSite {
    pub fn new(domain: impl Into<String>, blocked_at: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            blocked_at: blocked_at.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.domain, "blocked_site.domain")?;
        if normalize_domain(&self.domain).as_deref() != Some(self.domain.as_str()) {
            return Err(format!(
                "blocked_site.domain must be canonical, got '{}'",
                self.domain
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleRedirect {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleAction {
    pub redirect: RuleRedirect,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub regex_filter: String,
    pub resource_types: Vec<ResourceType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NativeRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

impl NativeRule {
    pub fn validate(&self) -> Result<(), String> {
        if self.id == 0 {
            return Err("rule.id must be >= 1".to_string());
        }
        if self.priority == 0 {
            return Err("rule.priority must be >= 1".to_string());
        }
        validate_non_empty(&self.condition.regex_filter, "rule.condition.regex_filter")?;
        validate_non_empty(&self.action.redirect.url, "rule.action.redirect.url")?;
        if self.condition.resource_types.is_empty() {
            return Err("rule.condition.resource_types must not be empty".to_string());
        }
        Ok(())
    }

    pub fn redirect_url(&self) -> &str {
        &self.action.redirect.url
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserTab {
    pub id: TabId,
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Loading,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TabEvent {
    Activated {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
    Removed {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
    Updated {
        #[serde(rename = "tabId")]
        tab_id: TabId,
        status: TabStatus,
        url: Option<String>,
    },
}

impl TabEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            Self::Activated { tab_id } | Self::Removed { tab_id } | Self::Updated { tab_id, .. } => {
                *tab_id
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    UpdateBlockingRules,
    UnblockSite { domain: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Updated,
    Unblocked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlResponse {
    pub status: ControlStatus,
}

impl ControlResponse {
    pub fn updated() -> Self {
        Self {
            status: ControlStatus::Updated,
        }
    }

    pub fn unblocked() -> Self {
        Self {
            status: ControlStatus::Unblocked,
        }
    }
}

/// Lowercases a bare hostname and strips one leading `www.`.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_ascii_lowercase();
    let domain = lowered.strip_prefix("www.").unwrap_or(&lowered);
    if domain.is_empty() {
        return None;
    }
    Some(domain.to_string())
}

/// Canonical domain of a full URL, or `None` when the URL has no host.
pub fn canonical_domain_from_url(raw_url: &str) -> Option<String> {
    let parsed = Url::parse(raw_url.trim()).ok()?;
    parsed.host_str().and_then(normalize_domain)
}

/// Turns user input such as `www.Example.com/path` into `example.com`.
pub fn canonicalize_site_input(input: &str) -> Result<String, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("site must not be empty".to_string());
    }
    let candidate = if trimmed.starts_with("http") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    canonical_domain_from_url(&candidate).ok_or_else(|| format!("invalid site '{trimmed}'"))
}

pub fn format_blocked_at(now: DateTime<Utc>, timezone: Option<Tz>) -> String {
    match timezone {
        Some(tz) => now.with_timezone(&tz).format(BLOCKED_AT_FORMAT).to_string(),
        None => now
            .with_timezone(&Local)
            .format(BLOCKED_AT_FORMAT)
            .to_string(),
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
