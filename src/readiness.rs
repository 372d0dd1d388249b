//! Service-manager readiness notification for `--systemd`. The sd_notify
//! wire format is a single `READY=1` datagram to the path in `$NOTIFY_SOCKET`
//! — small enough that hand-rolling it is simpler than pulling in a crate
//! just for one `UnixDatagram::send`.

use std::os::unix::net::UnixDatagram;

pub trait ReadinessNotifier: Send + Sync {
    fn notify_ready(&self);
}

pub struct NoopNotifier;

impl ReadinessNotifier for NoopNotifier {
    fn notify_ready(&self) {}
}

pub struct SystemdNotifier;

impl ReadinessNotifier for SystemdNotifier {
    fn notify_ready(&self) {
        let Ok(socket_path) = std::env::var("NOTIFY_SOCKET") else {
            tracing::warn!("--systemd given but NOTIFY_SOCKET is not set, skipping readiness notification");
            return;
        };
        let Ok(socket) = UnixDatagram::unbound() else {
            tracing::warn!("failed to open a unix datagram socket for sd_notify");
            return;
        };
        if let Err(e) = socket.send_to(b"READY=1", &socket_path) {
            tracing::warn!(error = %e, "failed to send sd_notify READY=1");
        }
    }
}
