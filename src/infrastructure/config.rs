use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

const APP_JSON: &str = "app.json";
const DEFAULT_APP_NAME: &str = "SiteLimit";
const DEFAULT_EXTENSION_ROOT: &str = "tauri://localhost/";
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_RULE_CAPACITY: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    pub app_name: String,
    pub timezone: Option<Tz>,
    pub extension_root: Url,
    pub tick_interval: Duration,
    pub rule_capacity: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            timezone: None,
            extension_root: Url::parse(DEFAULT_EXTENSION_ROOT).expect("valid fixed url"),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            rule_capacity: DEFAULT_RULE_CAPACITY,
        }
    }
}

fn default_app_json() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "appName": DEFAULT_APP_NAME,
        "timezone": null,
        "extensionRoot": DEFAULT_EXTENSION_ROOT,
        "tickIntervalMs": DEFAULT_TICK_INTERVAL_MS,
        "ruleCapacity": DEFAULT_RULE_CAPACITY
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_json())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn optional_str<'a>(app: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    app.get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn load_limiter_config(config_dir: &Path) -> Result<LimiterConfig, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let mut config = LimiterConfig::default();

    if let Some(name) = optional_str(&app, "appName") {
        config.app_name = name.to_string();
    }

    if let Some(zone) = optional_str(&app, "timezone") {
        let parsed = zone
            .parse::<Tz>()
            .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{zone}': {error}")))?;
        config.timezone = Some(parsed);
    }

    if let Some(root) = optional_str(&app, "extensionRoot") {
        let mut parsed = Url::parse(root).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid extensionRoot '{root}': {error}"))
        })?;
        if parsed.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(format!(
                "extensionRoot '{root}' cannot be a base url"
            )));
        }
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }
        config.extension_root = parsed;
    }

    if let Some(value) = app.get("tickIntervalMs") {
        let millis = value
            .as_u64()
            .filter(|millis| *millis > 0)
            .ok_or_else(|| InfraError::InvalidConfig("tickIntervalMs must be > 0".to_string()))?;
        config.tick_interval = Duration::from_millis(millis);
    }

    if let Some(value) = app.get("ruleCapacity") {
        let capacity = value
            .as_u64()
            .and_then(|capacity| u32::try_from(capacity).ok())
            .filter(|capacity| *capacity > 0)
            .ok_or_else(|| InfraError::InvalidConfig("ruleCapacity must be > 0".to_string()))?;
        config.rule_capacity = capacity;
    }

    Ok(config)
}
