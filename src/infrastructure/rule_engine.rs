use crate::domain::models::{NativeRule, ResourceType};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use async_trait::async_trait;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Browser-enforced redirect rules, addressed by numeric id.
#[async_trait]
pub trait NativeRuleEngine: Send + Sync {
    /// Removes `remove_rule_ids` (unknown ids are ignored) and then installs
    /// `add_rules`. Either everything is applied or nothing is.
    async fn update_dynamic_rules(
        &self,
        remove_rule_ids: &[u32],
        add_rules: &[NativeRule],
    ) -> Result<(), InfraError>;

    async fn dynamic_rules(&self) -> Result<Vec<NativeRule>, InfraError>;
}

fn validate_new_rules(add_rules: &[NativeRule]) -> Result<(), InfraError> {
    let mut seen = HashSet::new();
    for rule in add_rules {
        rule.validate().map_err(InfraError::InvalidInput)?;
        Regex::new(&rule.condition.regex_filter)?;
        if !seen.insert(rule.id) {
            return Err(InfraError::DuplicateRuleId(rule.id));
        }
    }
    Ok(())
}

/// Redirect target for a request, picking the highest priority matching rule
/// and the lowest id among equals.
pub fn evaluate_redirect(
    rules: &[NativeRule],
    url: &str,
    resource_type: ResourceType,
) -> Result<Option<String>, InfraError> {
    let mut best: Option<&NativeRule> = None;
    for rule in rules {
        if !rule.condition.resource_types.contains(&resource_type) {
            continue;
        }
        if !Regex::new(&rule.condition.regex_filter)?.is_match(url) {
            continue;
        }
        let better = match best {
            None => true,
            Some(current) => {
                rule.priority > current.priority
                    || (rule.priority == current.priority && rule.id < current.id)
            }
        };
        if better {
            best = Some(rule);
        }
    }
    Ok(best.map(|rule| rule.redirect_url().to_string()))
}

#[derive(Debug, Default)]
pub struct InMemoryRuleEngine {
    rules: Mutex<BTreeMap<u32, NativeRule>>,
    update_calls: AtomicUsize,
}

impl InMemoryRuleEngine {
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NativeRuleEngine for InMemoryRuleEngine {
    async fn update_dynamic_rules(
        &self,
        remove_rule_ids: &[u32],
        add_rules: &[NativeRule],
    ) -> Result<(), InfraError> {
        validate_new_rules(add_rules)?;
        let mut rules = self
            .rules
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("rule engine: {error}")))?;

        let mut next = rules.clone();
        for id in remove_rule_ids {
            next.remove(id);
        }
        for rule in add_rules {
            if next.contains_key(&rule.id) {
                return Err(InfraError::DuplicateRuleId(rule.id));
            }
            next.insert(rule.id, rule.clone());
        }
        *rules = next;
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn dynamic_rules(&self) -> Result<Vec<NativeRule>, InfraError> {
        let rules = self
            .rules
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("rule engine: {error}")))?;
        Ok(rules.values().cloned().collect())
    }
}

/// Keeps the installed rule set in SQLite so it survives restarts, the way a
/// browser keeps dynamic rules across sessions.
#[derive(Debug, Clone)]
pub struct SqliteRuleEngine {
    db_path: PathBuf,
}

impl SqliteRuleEngine {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }
}

#[async_trait]
impl NativeRuleEngine for SqliteRuleEngine {
    async fn update_dynamic_rules(
        &self,
        remove_rule_ids: &[u32],
        add_rules: &[NativeRule],
    ) -> Result<(), InfraError> {
        validate_new_rules(add_rules)?;
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;

        for id in remove_rule_ids {
            transaction.execute("DELETE FROM native_rules WHERE id = ?1", params![id])?;
        }
        for rule in add_rules {
            let existing: Option<u32> = transaction
                .query_row(
                    "SELECT id FROM native_rules WHERE id = ?1",
                    params![rule.id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(InfraError::DuplicateRuleId(rule.id));
            }
            transaction.execute(
                "INSERT INTO native_rules (id, payload) VALUES (?1, ?2)",
                params![rule.id, serde_json::to_string(rule)?],
            )?;
        }

        transaction.commit()?;
        Ok(())
    }

    async fn dynamic_rules(&self) -> Result<Vec<NativeRule>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare("SELECT payload FROM native_rules ORDER BY id")?;
        let payloads = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(InfraError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{RuleAction, RuleCondition, RuleRedirect};
    use crate::infrastructure::storage::initialize_database;
    use std::fs;

    fn rule(id: u32, priority: u32, regex: &str, redirect: &str) -> NativeRule {
        NativeRule {
            id,
            priority,
            action: RuleAction {
                redirect: RuleRedirect {
                    url: redirect.to_string(),
                },
            },
            condition: RuleCondition {
                regex_filter: regex.to_string(),
                resource_types: vec![ResourceType::MainFrame],
            },
        }
    }

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sitelimit-rule-tests-{}-{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("rules.sqlite");
        initialize_database(&path).expect("initialize database");
        path
    }

    #[tokio::test]
    async fn in_memory_engine_rejects_installed_ids_without_partial_apply() {
        let engine = InMemoryRuleEngine::default();
        engine
            .update_dynamic_rules(&[], &[rule(1, 1, "^https://a\\.com", "x://blocked")])
            .await
            .expect("install first rule");

        let result = engine
            .update_dynamic_rules(
                &[],
                &[
                    rule(2, 1, "^https://b\\.com", "x://blocked"),
                    rule(1, 1, "^https://c\\.com", "x://blocked"),
                ],
            )
            .await;
        assert!(matches!(result, Err(InfraError::DuplicateRuleId(1))));

        let installed = engine.dynamic_rules().await.expect("list rules");
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].condition.regex_filter, "^https://a\\.com");
    }

    #[tokio::test]
    async fn invalid_regex_is_rejected() {
        let engine = InMemoryRuleEngine::default();
        let result = engine
            .update_dynamic_rules(&[], &[rule(1, 1, "([", "x://blocked")])
            .await;
        assert!(matches!(result, Err(InfraError::Regex(_))));
    }

    #[tokio::test]
    async fn sqlite_engine_replaces_rules_and_persists_them() {
        let path = temp_db_path("replace");
        let engine = SqliteRuleEngine::new(&path);
        engine
            .update_dynamic_rules(
                &[],
                &[
                    rule(1, 1, "^https://a\\.com", "x://blocked?domain=a.com"),
                    rule(2, 1, "^https://b\\.com", "x://blocked?domain=b.com"),
                ],
            )
            .await
            .expect("install rules");
        engine
            .update_dynamic_rules(&[1, 2, 3], &[rule(1, 1, "^https://c\\.com", "x://blocked?domain=c.com")])
            .await
            .expect("replace rules");

        let reopened = SqliteRuleEngine::new(&path);
        let installed = reopened.dynamic_rules().await.expect("list rules");
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].redirect_url(), "x://blocked?domain=c.com");
    }

    #[test]
    fn evaluation_prefers_priority_then_lowest_id() {
        let rules = vec![
            rule(3, 1, "^https://a\\.com", "x://three"),
            rule(2, 1, "^https://a\\.com", "x://two"),
            rule(9, 2, "^https://a\\.com/special", "x://nine"),
        ];
        assert_eq!(
            evaluate_redirect(&rules, "https://a.com/", ResourceType::MainFrame).expect("evaluate"),
            Some("x://two".to_string())
        );
        assert_eq!(
            evaluate_redirect(&rules, "https://a.com/special", ResourceType::MainFrame)
                .expect("evaluate"),
            Some("x://nine".to_string())
        );
        assert_eq!(
            evaluate_redirect(&rules, "https://b.com/", ResourceType::MainFrame).expect("evaluate"),
            None
        );
    }
}
