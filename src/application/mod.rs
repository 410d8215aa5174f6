pub mod bootstrap;
pub mod commands;
pub mod control;
pub mod monitor;
pub mod rule_sync;
pub mod service;
pub mod settings;
pub mod tracking_store;

#[cfg(test)]
mod test_support;
