//! Minimal sd_notify client: pings systemd's watchdog at the interval it
//! requests, without depending on a crate just for one datagram send.

use std::env;
use std::os::unix::net::UnixDatagram;
use std::time::Duration;

use tracing::{debug, warn};

/// If `NOTIFY_SOCKET` and `WATCHDOG_USEC` are set, spawn a background loop
/// that sends `WATCHDOG=1` at half the requested interval, per systemd's
/// watchdog protocol. Returns immediately (a no-op) if the environment
/// wasn't set up for watchdog supervision.
pub fn spawn_watchdog_if_configured() {
    let Ok(socket_path) = env::var("NOTIFY_SOCKET") else {
        debug!("no NOTIFY_SOCKET; systemd watchdog disabled");
        return;
    };
    let Ok(usec) = env::var("WATCHDOG_USEC").and_then(|v| {
        v.parse::<u64>().map_err(|_| env::VarError::NotPresent)
    }) else {
        debug!("NOTIFY_SOCKET set but no WATCHDOG_USEC; watchdog pings disabled");
        return;
    };

    let interval = Duration::from_micros(usec / 2);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = notify(&socket_path, "WATCHDOG=1") {
                warn!(error = %e, "failed to send systemd watchdog ping");
            }
        }
    });
}

/// Tell systemd the service finished starting up.
pub fn notify_ready() {
    if let Ok(socket_path) = env::var("NOTIFY_SOCKET") {
        let _ = notify(&socket_path, "READY=1");
    }
}

/// Tell systemd the service is stopping.
pub fn notify_stopping() {
    if let Ok(socket_path) = env::var("NOTIFY_SOCKET") {
        let _ = notify(&socket_path, "STOPPING=1");
    }
}

fn notify(socket_path: &str, message: &str) -> std::io::Result<()> {
    let path = if let Some(rest) = socket_path.strip_prefix('@') {
        // Abstract namespace sockets are prefixed with '@' by convention;
        // std's UnixDatagram doesn't support binding to one directly for
        // connect, but a leading NUL byte (the actual abstract-socket
        // marker) works for sendto.
        format!("\0{rest}")
    } else {
        socket_path.to_string()
    };
    let sock = UnixDatagram::unbound()?;
    sock.send_to(message.as_bytes(), path)?;
    Ok(())
}
