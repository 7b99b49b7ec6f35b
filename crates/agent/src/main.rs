//! FedCloud monitor agent
//!
//! Rescans every configured site on an interval and reports findings
//! through logs, metrics and health endpoints. It never deletes VMs.

use anyhow::{bail, Context, Result};
use monitor_lib::{
    health::{components, HealthRegistry},
    observability::MonitorMetrics,
    AccessToken, Monitor, MonitorConfig, Site,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod cycle;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = AGENT_VERSION, "Starting fedmon-agent");

    let agent_config = config::AgentConfig::load()?;
    let monitor_config = MonitorConfig::load(agent_config.config.as_deref())?;
    let token = std::env::var("FEDMON_ACCESS_TOKEN")
        .context("FEDMON_ACCESS_TOKEN must hold an access token")?;

    let gateway = Arc::new(monitor_config.gateway());
    let site_names = gateway.sites_for_vo(&monitor_config.vo);
    if site_names.is_empty() {
        bail!("No configured site hosts VO {}", monitor_config.vo);
    }
    let token = AccessToken::new(token);
    let sites: Vec<Site> = site_names
        .iter()
        .map(|name| Site::new(name.clone(), monitor_config.vo.clone(), token.clone()))
        .collect();
    info!(
        vo = %monitor_config.vo,
        sites = sites.len(),
        interval_secs = agent_config.interval_secs,
        "Agent configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::GATEWAY).await;
    for name in &site_names {
        health_registry.register(&components::site(name)).await;
    }

    let mut monitor = Monitor::new(gateway, &monitor_config);
    let directory_enabled = match monitor_config.ldap_directory() {
        Some(directory) => {
            health_registry.register(components::DIRECTORY).await;
            monitor = monitor.with_directory(Arc::new(directory));
            true
        }
        None => false,
    };

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        MonitorMetrics::new(),
    ));

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(agent_config.api_port, app_state));

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut interval = tokio::time::interval(agent_config.interval());
    loop {
        tokio::select! {
            Ok(()) = shutdown_rx.changed() => break,
            _ = interval.tick() => {
                cycle::run_cycle(
                    &monitor,
                    &sites,
                    &health_registry,
                    directory_enabled,
                    shutdown_rx.clone(),
                )
                .await;
                if *shutdown_rx.borrow() {
                    break;
                }
                health_registry.set_ready(true).await;
            }
        }
    }

    api_handle.abort();
    if let Ok(Err(e)) = api_handle.await {
        warn!(error = %e, "API server stopped with an error");
    }

    Ok(())
}
