mod application;
mod domain;
mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::commands::{
    clear_tab_focus_impl, handle_message_impl, initialize_impl, list_rules_impl,
    list_sites_impl, remove_time_limit_impl, report_tab_event_impl, resolve_navigation_impl,
    set_site_limit_impl,
    sync_tabs_impl, take_tab_navigations_impl, tick_now_impl, AppState,
};
use application::monitor::{run_monitor, watch_storage_changes, TickOutcome};
use application::settings::{SiteLimitOutcome, SiteOverview};
use domain::models::{BrowserTab, ControlMessage, ControlResponse, NativeRule, TabEvent};
use infrastructure::key_value_store::StorageChange;
use infrastructure::tab_host::TabNavigation;
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use tauri::{Emitter, Manager};
use tracing_subscriber::EnvFilter;

const STORAGE_CHANGED_EVENT: &str = "storage-changed";

#[derive(Debug, Serialize)]
struct BootstrapResponse {
    workspace_root: String,
    database_path: String,
}

#[tauri::command]
fn bootstrap(root: Option<String>) -> Result<BootstrapResponse, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    Ok(BootstrapResponse {
        workspace_root: result.workspace_root.display().to_string(),
        database_path: result.database_path.display().to_string(),
    })
}

#[tauri::command]
fn ping() -> &'static str {
    "pong"
}

#[tauri::command]
async fn handle_message(
    state: tauri::State<'_, AppState>,
    message: ControlMessage,
) -> Result<ControlResponse, String> {
    handle_message_impl(state.inner(), message)
        .await
        .map_err(|error| state.command_error("handle_message", &error))
}

#[tauri::command]
async fn set_site_limit(
    state: tauri::State<'_, AppState>,
    site: String,
    limit: String,
) -> Result<SiteLimitOutcome, String> {
    set_site_limit_impl(state.inner(), site, limit)
        .await
        .map_err(|error| state.command_error("set_site_limit", &error))
}

#[tauri::command]
async fn remove_time_limit(
    state: tauri::State<'_, AppState>,
    domain: String,
) -> Result<bool, String> {
    remove_time_limit_impl(state.inner(), domain)
        .await
        .map_err(|error| state.command_error("remove_time_limit", &error))
}

#[tauri::command]
fn list_sites(state: tauri::State<'_, AppState>) -> Result<SiteOverview, String> {
    list_sites_impl(state.inner()).map_err(|error| state.command_error("list_sites", &error))
}

#[tauri::command]
async fn list_rules(state: tauri::State<'_, AppState>) -> Result<Vec<NativeRule>, String> {
    list_rules_impl(state.inner())
        .await
        .map_err(|error| state.command_error("list_rules", &error))
}

#[tauri::command]
async fn resolve_navigation(
    state: tauri::State<'_, AppState>,
    url: String,
) -> Result<Option<String>, String> {
    resolve_navigation_impl(state.inner(), url)
        .await
        .map_err(|error| state.command_error("resolve_navigation", &error))
}

#[tauri::command]
fn sync_tabs(state: tauri::State<'_, AppState>, tabs: Vec<BrowserTab>) -> Result<usize, String> {
    sync_tabs_impl(state.inner(), tabs).map_err(|error| state.command_error("sync_tabs", &error))
}

#[tauri::command]
async fn report_tab_event(
    state: tauri::State<'_, AppState>,
    event: TabEvent,
) -> Result<(), String> {
    report_tab_event_impl(state.inner(), event)
        .await
        .map_err(|error| state.command_error("report_tab_event", &error))
}

#[tauri::command]
fn clear_tab_focus(state: tauri::State<'_, AppState>) -> Result<(), String> {
    clear_tab_focus_impl(state.inner())
        .map_err(|error| state.command_error("clear_tab_focus", &error))
}

#[tauri::command]
fn take_tab_navigations(state: tauri::State<'_, AppState>) -> Result<Vec<TabNavigation>, String> {
    take_tab_navigations_impl(state.inner())
        .map_err(|error| state.command_error("take_tab_navigations", &error))
}

#[tauri::command]
async fn tick_now(state: tauri::State<'_, AppState>) -> Result<TickOutcome, String> {
    tick_now_impl(state.inner())
        .await
        .map_err(|error| state.command_error("tick_now", &error))
}

fn init_logging() {
    let debug_enabled = env::var("SITELIMIT_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn run() {
    init_logging();
    let workspace_root = std::env::current_dir().expect("failed to resolve current directory");
    let app_state = AppState::new(workspace_root).expect("failed to initialize app state");

    tauri::Builder::default()
        .manage(app_state)
        .setup(|app| {
            let state = app.state::<AppState>();
            let tick_interval = state.config().tick_interval;
            let changes = state.subscribe_storage();
            let watched = state.limiter();

            let startup_handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                let state = startup_handle.state::<AppState>();
                if let Err(error) = initialize_impl(state.inner()).await {
                    state.command_error("initialize", &error);
                }
                run_monitor(state.limiter(), tick_interval).await;
            });

            let emit_handle = app.handle().clone();
            tauri::async_runtime::spawn(watch_storage_changes(
                watched,
                changes,
                move |change: &StorageChange| {
                    if let Err(error) = emit_handle.emit(STORAGE_CHANGED_EVENT, change) {
                        tracing::warn!(%error, "failed to emit storage change");
                    }
                },
            ));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            ping,
            bootstrap,
            handle_message,
            set_site_limit,
            remove_time_limit,
            list_sites,
            list_rules,
            resolve_navigation,
            sync_tabs,
            report_tab_event,
            clear_tab_focus,
            take_tab_navigations,
            tick_now
        ])
        .run(tauri::generate_context!())
        .expect("failed to run tauri app");
}
