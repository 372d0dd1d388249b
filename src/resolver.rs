//! Thin facade combining override precedence with the PAC mailbox.
//! `WpadController` mutates `force_direct` while a reload is in
//! flight; `ConnectionHandler` only ever reads through `resolve`.

use std::sync::Arc;

use act_zero::{call, Addr};
use arc_swap::ArcSwapOption;
use tracing::warn;

use crate::errors::ProxyError;
use crate::model::DirectiveList;
use crate::pac_engine::PacEngine;

pub struct ProxyResolver {
    pac: Addr<PacEngine>,
    force_proxy: ArcSwapOption<String>,
    force_direct: ArcSwapOption<String>,
}

impl ProxyResolver {
    pub fn new(pac: Addr<PacEngine>) -> Self {
        ProxyResolver {
            pac,
            force_proxy: ArcSwapOption::from(None),
            force_direct: ArcSwapOption::from(None),
        }
    }

    /// `--force-proxy` is set once at startup and never cleared at runtime:
    /// WPAD is bypassed entirely, but the PAC engine still initializes in
    /// case the override is lifted later.
    pub fn set_force_proxy(&self, directive: Option<String>) {
        self.force_proxy.store(directive.map(Arc::new));
    }

    /// Held for the duration of a PAC refresh so in-flight requests never
    /// observe a half-updated script.
    pub fn begin_update(&self) {
        self.force_direct.store(Some(Arc::new("DIRECT".to_string())));
    }

    pub fn end_update(&self) {
        self.force_direct.store(None);
    }

    pub fn pac_engine(&self) -> Addr<PacEngine> {
        self.pac.clone()
    }

    /// `force_proxy` > `force_direct` > PAC evaluation.
    pub async fn resolve(&self, url: &str) -> DirectiveList {
        if let Some(forced) = self.force_proxy.load_full() {
            return DirectiveList::parse(&forced);
        }
        if let Some(forced) = self.force_direct.load_full() {
            return DirectiveList::parse(&forced);
        }
        match call!(self.pac.find_proxy(url.to_string())).await {
            Ok(Ok(result)) => DirectiveList::parse(&result),
            Ok(Err(e)) => {
                warn!(error = %e, url, "PAC evaluation failed, falling back to DIRECT");
                DirectiveList::direct()
            }
            Err(e) => {
                warn!(error = %e, url, "PAC actor call failed, falling back to DIRECT");
                DirectiveList::direct()
            }
        }
    }

    pub async fn set_script(&self, source: String) -> Result<(), ProxyError> {
        call!(self.pac.set_script(source))
            .await
            .map_err(|e| ProxyError::PacParse(e.to_string()))?
    }
}
