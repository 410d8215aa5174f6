use crate::domain::models::{
    BlockedSite, NativeRule, ResourceType, RuleAction, RuleCondition, RuleRedirect,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::rule_engine::NativeRuleEngine;
use std::sync::Arc;
use url::Url;

const BLOCKED_PAGE: &str = "blocked.html";
const RULE_PRIORITY: u32 = 1;

/// Matches `domain` and any subdomain over http or https, stopping at the end
/// of the host so `example.com.evil.com` is not caught by `example.com`.
pub fn build_domain_regex(domain: &str) -> String {
    format!(
        r"^https?://(?:[^/?#]+\.)?{}(?::[0-9]+)?(?:[/?#]|$)",
        regex::escape(domain)
    )
}

/// `<extension-root>/blocked.html?domain=<domain>`
pub fn blocked_page_url(extension_root: &Url, domain: &str) -> Result<String, InfraError> {
    let mut url = extension_root.join(BLOCKED_PAGE).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid blocked page url: {error}"))
    })?;
    url.query_pairs_mut().clear().append_pair("domain", domain);
    Ok(url.to_string())
}

/// Domain carried by a blocked-page URL, if `raw_url` is one.
pub fn blocked_page_domain(extension_root: &Url, raw_url: &str) -> Option<String> {
    let parsed = Url::parse(raw_url).ok()?;
    let page = extension_root.join(BLOCKED_PAGE).ok()?;
    if parsed.scheme() != page.scheme()
        || parsed.host_str() != page.host_str()
        || parsed.path() != page.path()
    {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(key, _)| key == "domain")
        .map(|(_, value)| value.into_owned())
}

pub fn build_rules(
    blocked_sites: &[BlockedSite],
    extension_root: &Url,
) -> Result<Vec<NativeRule>, InfraError> {
    (1u32..)
        .zip(blocked_sites)
        .map(|(id, site)| {
            Ok(NativeRule {
                id,
                priority: RULE_PRIORITY,
                action: RuleAction {
                    redirect: RuleRedirect {
                        url: blocked_page_url(extension_root, &site.domain)?,
                    },
                },
                condition: RuleCondition {
                    regex_filter: build_domain_regex(&site.domain),
                    resource_types: vec![ResourceType::MainFrame],
                },
            })
        })
        .collect()
}

pub struct RuleSynchronizer<R>
where
    R: NativeRuleEngine,
{
    engine: Arc<R>,
    extension_root: Url,
    capacity: u32,
}

impl<R> RuleSynchronizer<R>
where
    R: NativeRuleEngine,
{
    pub fn new(engine: Arc<R>, extension_root: Url, capacity: u32) -> Self {
        Self {
            engine,
            extension_root,
            capacity,
        }
    }

    pub fn engine(&self) -> &Arc<R> {
        &self.engine
    }

    pub fn extension_root(&self) -> &Url {
        &self.extension_root
    }

    /// Fails when `blocked` sites would not fit in the rule id range.
    pub fn ensure_capacity(&self, blocked: usize) -> Result<(), InfraError> {
        if blocked > self.capacity as usize {
            return Err(InfraError::RuleCapacityExceeded {
                blocked,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Replaces the installed rule set with one rule per blocked site.
    /// Fails without touching the engine when the list exceeds the capacity.
    pub async fn sync(&self, blocked_sites: &[BlockedSite]) -> Result<Vec<NativeRule>, InfraError> {
        self.ensure_capacity(blocked_sites.len())?;

        let rules = build_rules(blocked_sites, &self.extension_root)?;
        let mut remove_ids = (1..=self.capacity).collect::<Vec<_>>();
        remove_ids.extend(
            self.engine
                .dynamic_rules()
                .await?
                .into_iter()
                .map(|rule| rule.id)
                .filter(|id| *id > self.capacity),
        );

        self.engine.update_dynamic_rules(&remove_ids, &rules).await?;
        tracing::info!(rules = rules.len(), "dynamic blocking rules updated");
        Ok(rules)
    }
}
