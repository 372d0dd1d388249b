#![cfg(test)]
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use nanoproxy::pac_engine::PacEngine;
use nanoproxy::readiness::NoopNotifier;
use nanoproxy::resolver::ProxyResolver;
use nanoproxy::tracker::ConnectionTracker;

/// Spins up a real `listener::run` task against a loopback port, wired the
/// same way `main.rs` wires it, so the e2e tests drive the whole stack
/// (request parsing, PAC evaluation, dialing) instead of a test double.
pub struct TestNanoproxyServer {
    addr: SocketAddr,
}

impl TestNanoproxyServer {
    pub async fn start(port: u16, pac_file_path: Option<&std::path::Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let pac_addr = act_zero::runtimes::tokio::spawn_actor(PacEngine::default());
        let resolver = Arc::new(ProxyResolver::new(pac_addr));
        let tracker = ConnectionTracker::spawn_with_sweeper();

        if let Some(pac_path) = pac_file_path {
            let script = std::fs::read_to_string(pac_path)?;
            resolver.set_script(script).await?;
        }

        tokio::spawn({
            let resolver = resolver.clone();
            let bind = "127.0.0.1".to_string();
            async move {
                let _ = nanoproxy::listener::run(&bind, port, resolver, tracker, Arc::new(NoopNotifier)).await;
            }
        });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        Ok(Self {
            addr: format!("127.0.0.1:{}", port).parse()?,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}
