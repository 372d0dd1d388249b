use std::sync::Arc;

use clap::Parser;
use rlimit::{getrlimit, setrlimit, Resource};
use tracing_subscriber::EnvFilter;

use nanoproxy::config::{self, Opts};
use nanoproxy::errors::ProxyError;
use nanoproxy::listener;
use nanoproxy::netinfo;
use nanoproxy::pac_engine::PacEngine;
use nanoproxy::readiness::{NoopNotifier, ReadinessNotifier, SystemdNotifier};
use nanoproxy::resolver::ProxyResolver;
use nanoproxy::suffix::PslResolver;
use nanoproxy::tracker::ConnectionTracker;
use nanoproxy::wpad;

/// Raised toward this ceiling at startup, capped by the hard limit.
const DEFAULT_MAX_CONNECTIONS: u64 = 4096;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(opts.effective_log_filter()))
        .init();

    if let Err(e) = raise_file_descriptor_limit() {
        tracing::warn!(error = %e, "failed to raise RLIMIT_NOFILE, continuing with the current limit");
    }

    let configured_url = match &opts.config {
        Some(path) => config::read_wpad_url_from_config(path)?,
        None => None,
    };

    let pac_addr = act_zero::runtimes::tokio::spawn_actor(PacEngine::default());
    let resolver = Arc::new(ProxyResolver::new(pac_addr));
    if let Some(forced) = &opts.force_proxy {
        resolver.set_force_proxy(Some(forced.clone()));
    }

    let tracker = ConnectionTracker::spawn_with_sweeper();

    let readiness: Arc<dyn ReadinessNotifier> = if opts.systemd {
        Arc::new(SystemdNotifier)
    } else {
        Arc::new(NoopNotifier)
    };

    if opts.force_proxy.is_none() {
        let network_info = build_network_info_provider().await;
        start_wpad_controller(resolver.clone(), network_info, configured_url);
    }

    listener::run(&opts.bind, opts.port, resolver, tracker, readiness)
        .await
        .map_err(|e: ProxyError| -> Box<dyn std::error::Error> { Box::new(std::io::Error::other(e.to_string())) })
}

/// `--force-proxy` bypasses WPAD entirely but the PAC engine still
/// initializes.
fn start_wpad_controller(
    resolver: Arc<ProxyResolver>,
    network_info: Arc<dyn netinfo::NetworkInfoProvider>,
    configured_url: Option<String>,
) {
    let controller = Arc::new(wpad::WpadController::new(
        resolver,
        network_info.clone(),
        Arc::new(PslResolver),
        configured_url,
    ));

    {
        let controller = controller.clone();
        tokio::spawn(async move { controller.refresh().await });
    }

    {
        let controller = controller.clone();
        tokio::spawn(async move {
            network_info
                .on_state_changed(Box::new(move || {
                    let controller = controller.clone();
                    tokio::spawn(async move { controller.refresh().await });
                }))
                .await;
        });
    }

    #[cfg(unix)]
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            let Ok(mut hangup) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) else {
                tracing::warn!("failed to install SIGHUP handler, reload-by-signal unavailable");
                return;
            };
            loop {
                hangup.recv().await;
                controller.refresh().await;
            }
        });
    }
}

#[cfg(target_os = "linux")]
async fn build_network_info_provider() -> Arc<dyn netinfo::NetworkInfoProvider> {
    // A provider that fails to reach the bus falls back to the no-op
    // provider rather than blocking startup on D-Bus.
    match netinfo::NetworkManagerProvider::connect().await {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            tracing::warn!(error = %e, "failed to connect to the system bus, network info will be empty");
            Arc::new(netinfo::NoopNetworkInfoProvider)
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn build_network_info_provider() -> Arc<dyn netinfo::NetworkInfoProvider> {
    Arc::new(netinfo::NoopNetworkInfoProvider)
}

fn raise_file_descriptor_limit() -> Result<(), rlimit::Error> {
    let (_, hard_limit) = getrlimit(Resource::NOFILE)?;
    let target = DEFAULT_MAX_CONNECTIONS.min(hard_limit);
    setrlimit(Resource::NOFILE, target, hard_limit)
}
