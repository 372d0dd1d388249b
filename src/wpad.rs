//! Discovers and (re)installs the PAC script. Candidate URLs come from a
//! config file, DHCP option 252, or derived DNS search-domain candidates, in
//! that priority order. Refresh triggers — startup, network-state change,
//! SIGHUP — all feed into a single-flight loop so concurrent triggers
//! coalesce into at most one extra pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::model::CandidateUrl;
use crate::resolver::ProxyResolver;
use crate::suffix::PublicSuffixResolver;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WpadController {
    resolver: Arc<ProxyResolver>,
    network_info: Arc<dyn crate::netinfo::NetworkInfoProvider>,
    suffix: Arc<dyn PublicSuffixResolver>,
    configured_url: Option<String>,
    state: Mutex<SingleFlight>,
}

#[derive(Default)]
struct SingleFlight {
    in_flight: bool,
    pending: bool,
}

impl WpadController {
    pub fn new(
        resolver: Arc<ProxyResolver>,
        network_info: Arc<dyn crate::netinfo::NetworkInfoProvider>,
        suffix: Arc<dyn PublicSuffixResolver>,
        configured_url: Option<String>,
    ) -> Self {
        WpadController {
            resolver,
            network_info,
            suffix,
            configured_url,
            state: Mutex::new(SingleFlight::default()),
        }
    }

    /// Entry point for every trigger (startup, network-state-change,
    /// SIGHUP). Coalesces concurrent callers: a trigger arriving while a
    /// refresh is running just marks `pending` and returns immediately; the
    /// running refresh re-checks `pending` once it finishes and, if set,
    /// runs exactly one more pass before going idle.
    pub async fn refresh(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if state.in_flight {
                state.pending = true;
                return;
            }
            state.in_flight = true;
        }

        loop {
            self.run_once().await;

            let mut state = self.state.lock().await;
            if state.pending {
                state.pending = false;
                continue;
            }
            state.in_flight = false;
            break;
        }
    }

    async fn run_once(&self) {
        self.resolver.begin_update();

        let candidates = self.candidates().await;
        if candidates.is_empty() {
            warn!("no WPAD candidates available, remaining DIRECT");
            return;
        }

        for candidate in &candidates {
            match self.try_install(candidate).await {
                Ok(()) => {
                    info!(url = %candidate.0, "installed PAC script");
                    self.resolver.end_update();
                    return;
                }
                Err(e) => {
                    info!(url = %candidate.0, error = %e, "WPAD candidate failed, trying next");
                }
            }
        }
        warn!("all WPAD candidates failed, remaining DIRECT");
    }

    async fn try_install(&self, candidate: &CandidateUrl) -> Result<(), crate::errors::ProxyError> {
        let body = fetch_bypassing_proxy(&candidate.0).await?;
        self.resolver.set_script(body).await
    }

    async fn candidates(&self) -> Vec<CandidateUrl> {
        if let Some(url) = &self.configured_url {
            return vec![CandidateUrl(url.clone())];
        }

        let dhcp_urls = self.network_info.list_active_dhcp_pac_urls().await;
        if !dhcp_urls.is_empty() {
            return dhcp_urls.into_iter().map(CandidateUrl).collect();
        }

        let mut candidates = Vec::new();
        for domain in self.network_info.list_active_search_domains().await {
            candidates.extend(self.candidates_for_domain(&domain));
        }
        candidates
    }

    fn candidates_for_domain(&self, domain: &str) -> Vec<CandidateUrl> {
        let Some((subdomain_labels, registrable)) = self.suffix.split(domain) else {
            return Vec::new();
        };
        let mut candidates = Vec::new();
        for start in 0..=subdomain_labels.len() {
            let prefix = subdomain_labels[start..].join(".");
            let host = if prefix.is_empty() {
                registrable.clone()
            } else {
                format!("{prefix}.{registrable}")
            };
            candidates.push(CandidateUrl(format!("http://wpad.{host}/wpad.dat")));
        }
        candidates
    }
}

async fn fetch_bypassing_proxy(url: &str) -> Result<String, crate::errors::ProxyError> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| crate::errors::ProxyError::WpadFetch(e.to_string()))?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| crate::errors::ProxyError::WpadFetch(e.to_string()))?;
    if !response.status().is_success() {
        return Err(crate::errors::ProxyError::WpadFetch(format!(
            "unexpected status {}",
            response.status()
        )));
    }
    response
        .text()
        .await
        .map_err(|e| crate::errors::ProxyError::WpadFetch(e.to_string()))
}
