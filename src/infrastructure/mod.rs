pub mod config;
pub mod error;
pub mod key_value_store;
pub mod rule_engine;
pub mod storage;
pub mod tab_host;
