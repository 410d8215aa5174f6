use crate::application::service::{LimiterService, NowProvider};
use crate::application::tracking_store::TrackingStore;
use crate::domain::models::{BrowserTab, TabId};
use crate::infrastructure::config::LimiterConfig;
use crate::infrastructure::key_value_store::InMemoryKeyValueStore;
use crate::infrastructure::rule_engine::InMemoryRuleEngine;
use crate::infrastructure::tab_host::BridgeTabHost;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

pub type TestLimiter = LimiterService<InMemoryKeyValueStore, InMemoryRuleEngine, BridgeTabHost>;

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn starting_at(value: &str) -> Self {
        let start = DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc);
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance_seconds(&self, seconds: i64) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += Duration::seconds(seconds);
    }

    pub fn provider(&self) -> NowProvider {
        let now = Arc::clone(&self.now);
        Arc::new(move || *now.lock().expect("clock mutex poisoned"))
    }
}

pub struct Harness {
    pub service: Arc<TestLimiter>,
    pub store: Arc<InMemoryKeyValueStore>,
    pub tracking: TrackingStore<InMemoryKeyValueStore>,
    pub engine: Arc<InMemoryRuleEngine>,
    pub tabs: Arc<BridgeTabHost>,
    pub clock: FakeClock,
}

pub fn harness() -> Harness {
    harness_with_config(LimiterConfig {
        timezone: Some(chrono_tz::UTC),
        ..LimiterConfig::default()
    })
}

pub fn harness_with_config(config: LimiterConfig) -> Harness {
    let store = Arc::new(InMemoryKeyValueStore::default());
    let engine = Arc::new(InMemoryRuleEngine::default());
    let tabs = Arc::new(BridgeTabHost::default());
    let clock = FakeClock::starting_at("2026-02-16T09:00:00Z");
    let service = LimiterService::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        Arc::clone(&tabs),
        &config,
    )
    .with_now_provider(clock.provider());

    Harness {
        service: Arc::new(service),
        tracking: TrackingStore::new(Arc::clone(&store)),
        store,
        engine,
        tabs,
        clock,
    }
}

pub fn tab(id: TabId, url: &str, active: bool) -> BrowserTab {
    BrowserTab {
        id,
        url: Some(url.to_string()),
        active,
    }
}
