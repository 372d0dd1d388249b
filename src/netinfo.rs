//! Abstract source of "what does the network look like right now".
//! The Linux implementation talks to NetworkManager over the system D-Bus;
//! everywhere else (and whenever the bus misbehaves) degrades to empty
//! results plus a warning rather than a hard failure, per the teacher's own
//! habit of treating best-effort network introspection as advisory.

use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait NetworkInfoProvider: Send + Sync {
    async fn list_active_dhcp_pac_urls(&self) -> Vec<String>;
    async fn list_active_search_domains(&self) -> Vec<String>;

    /// Registers a callback invoked (with no payload — callers re-poll the
    /// two list methods) whenever the provider observes a state transition.
    /// Takes `&self` since implementations forward to an internal channel
    /// rather than mutating shared state directly.
    async fn on_state_changed(&self, callback: Box<dyn Fn() + Send + Sync>);
}

pub struct NoopNetworkInfoProvider;

#[async_trait]
impl NetworkInfoProvider for NoopNetworkInfoProvider {
    async fn list_active_dhcp_pac_urls(&self) -> Vec<String> {
        Vec::new()
    }

    async fn list_active_search_domains(&self) -> Vec<String> {
        Vec::new()
    }

    async fn on_state_changed(&self, _callback: Box<dyn Fn() + Send + Sync>) {}
}

#[cfg(target_os = "linux")]
pub use linux::NetworkManagerProvider;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use std::sync::{Arc, Mutex};

    use futures::StreamExt;
    use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue};
    use zbus::{Connection, Proxy};

    const NM_SERVICE: &str = "org.freedesktop.NetworkManager";
    const NM_PATH: &str = "/org/freedesktop/NetworkManager";
    const NM_IFACE: &str = "org.freedesktop.NetworkManager";
    const CONN_IFACE: &str = "org.freedesktop.NetworkManager.Connection.Active";
    const DHCP4_IFACE: &str = "org.freedesktop.NetworkManager.DHCP4Config";
    const IP4_IFACE: &str = "org.freedesktop.NetworkManager.IP4Config";
    /// NetworkManager's "no configuration available" sentinel object path.
    const NONE_PATH: &str = "/";

    type Callbacks = Arc<Mutex<Vec<Box<dyn Fn() + Send + Sync>>>>;

    pub struct NetworkManagerProvider {
        connection: Connection,
        callbacks: Callbacks,
    }

    impl NetworkManagerProvider {
        /// Opens the system bus connection and starts the background task
        /// that turns every `StateChanged` signal variant into a call to
        /// whatever callbacks are registered via `on_state_changed`.
        pub async fn connect() -> Result<Self, zbus::Error> {
            let connection = Connection::system().await?;
            let callbacks: Callbacks = Arc::new(Mutex::new(Vec::new()));
            spawn_state_change_forwarder(connection.clone(), callbacks.clone());
            Ok(NetworkManagerProvider { connection, callbacks })
        }

        async fn active_connections(&self) -> crate::errors::Result<Vec<OwnedObjectPath>> {
            let nm = Proxy::new(&self.connection, NM_SERVICE, NM_PATH, NM_IFACE)
                .await
                .map_err(|e| crate::errors::ProxyError::NetworkInfo(e.to_string()))?;
            let value: OwnedValue = nm
                .get_property("ActiveConnections")
                .await
                .map_err(|e| crate::errors::ProxyError::NetworkInfo(e.to_string()))?;
            value
                .try_into()
                .map_err(|e: zbus::zvariant::Error| crate::errors::ProxyError::NetworkInfo(e.to_string()))
        }

        async fn config_path(
            &self,
            active: &ObjectPath<'_>,
            property: &str,
        ) -> Option<OwnedObjectPath> {
            let conn = Proxy::new(&self.connection, NM_SERVICE, active.to_owned(), CONN_IFACE)
                .await
                .ok()?;
            let value: OwnedValue = conn.get_property(property).await.ok()?;
            let path: OwnedObjectPath = value.try_into().ok()?;
            if path.as_str() == NONE_PATH {
                None
            } else {
                Some(path)
            }
        }

        async fn dhcp4_wpad(&self, path: &OwnedObjectPath) -> Option<String> {
            let dhcp = Proxy::new(&self.connection, NM_SERVICE, path.clone(), DHCP4_IFACE)
                .await
                .ok()?;
            let options: OwnedValue = dhcp.get_property("Options").await.ok()?;
            let map: std::collections::HashMap<String, OwnedValue> = options.try_into().ok()?;
            let wpad: &OwnedValue = map.get("wpad")?;
            let s: String = wpad.try_clone().ok()?.try_into().ok()?;
            Some(s)
        }

        async fn ip4_domains(&self, path: &OwnedObjectPath) -> Vec<String> {
            let Ok(ip4) = Proxy::new(&self.connection, NM_SERVICE, path.clone(), IP4_IFACE).await else {
                return Vec::new();
            };
            let Ok(value) = ip4.get_property::<OwnedValue>("Domains").await else {
                return Vec::new();
            };
            value.try_into().unwrap_or_default()
        }
    }

    #[async_trait]
    impl NetworkInfoProvider for NetworkManagerProvider {
        async fn list_active_dhcp_pac_urls(&self) -> Vec<String> {
            let actives = match self.active_connections().await {
                Ok(actives) => actives,
                Err(e) => {
                    warn!(error = %e, "failed to enumerate NetworkManager active connections");
                    return Vec::new();
                }
            };
            let mut urls = Vec::new();
            for active in &actives {
                if let Some(dhcp4) = self.config_path(active.as_ref(), "Dhcp4Config").await {
                    if let Some(wpad) = self.dhcp4_wpad(&dhcp4).await {
                        urls.push(wpad);
                    }
                }
            }
            urls
        }

        async fn list_active_search_domains(&self) -> Vec<String> {
            let actives = match self.active_connections().await {
                Ok(actives) => actives,
                Err(e) => {
                    warn!(error = %e, "failed to enumerate NetworkManager active connections");
                    return Vec::new();
                }
            };
            let mut domains = Vec::new();
            for active in &actives {
                if let Some(ip4) = self.config_path(active.as_ref(), "Ip4Config").await {
                    domains.extend(self.ip4_domains(&ip4).await);
                }
            }
            domains
        }

        async fn on_state_changed(&self, callback: Box<dyn Fn() + Send + Sync>) {
            self.callbacks.lock().unwrap().push(callback);
        }
    }

    fn spawn_state_change_forwarder(connection: Connection, callbacks: Callbacks) {
        tokio::spawn(async move {
            let Ok(nm) = Proxy::new(&connection, NM_SERVICE, NM_PATH, NM_IFACE).await else {
                warn!("failed to subscribe to NetworkManager.StateChanged");
                return;
            };
            let Ok(mut signals) = nm.receive_signal("StateChanged").await else {
                warn!("failed to receive NetworkManager.StateChanged stream");
                return;
            };
            while signals.next().await.is_some() {
                for callback in callbacks.lock().unwrap().iter() {
                    callback();
                }
            }
        });
    }
}
