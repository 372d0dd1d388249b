//! Binds every address the configured `--bind` value resolves to (IPv4
//! only) and runs an independent accept loop per bound socket, handing
//! each accepted connection to a fresh `ConnectionHandler` task.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::connection::ConnectionHandler;
use crate::errors::ProxyError;
use crate::readiness::ReadinessNotifier;
use crate::resolver::ProxyResolver;
use crate::tracker::ConnectionTracker;

pub async fn run(
    bind: &str,
    port: u16,
    resolver: Arc<ProxyResolver>,
    tracker: Arc<ConnectionTracker>,
    readiness: Arc<dyn ReadinessNotifier>,
) -> Result<(), ProxyError> {
    let addresses = resolve_bind_addresses(bind, port)?;

    let mut listeners = Vec::new();
    for addr in &addresses {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(address = %addr, "listening");
                listeners.push(listener);
            }
            Err(e) => warn!(address = %addr, error = %e, "failed to bind, skipping"),
        }
    }
    if listeners.is_empty() {
        return Err(ProxyError::Config(format!("failed to bind any address for {bind}:{port}")));
    }

    readiness.notify_ready();

    let mut tasks = Vec::new();
    for listener in listeners {
        let resolver = resolver.clone();
        let tracker = tracker.clone();
        tasks.push(tokio::spawn(accept_loop(listener, resolver, tracker)));
    }
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

async fn accept_loop(listener: TcpListener, resolver: Arc<ProxyResolver>, tracker: Arc<ConnectionTracker>) {
    loop {
        match listener.accept().await {
            Ok((socket, _peer)) => {
                let handler = ConnectionHandler::new(resolver.clone(), tracker.clone());
                tokio::spawn(async move {
                    handler.handle(socket).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// A literal IP binds directly; anything else resolves via IPv4 name
/// service and binds every address returned.
fn resolve_bind_addresses(bind: &str, port: u16) -> Result<Vec<SocketAddr>, ProxyError> {
    if let Ok(ip) = bind.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let addrs: Vec<SocketAddr> = (bind, port)
        .to_socket_addrs()
        .map_err(|e| ProxyError::Config(format!("failed to resolve bind address {bind}: {e}")))?
        .filter(|a| a.is_ipv4())
        .collect();
    if addrs.is_empty() {
        return Err(ProxyError::Config(format!("{bind} resolved to no IPv4 addresses")));
    }
    Ok(addrs)
}
