//! Shared application state and connection accounting.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use digestwatch_core::stream::StreamHub;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) hub: StreamHub,
    /// Open `/logs` connections.
    pub(crate) connections: Arc<AtomicUsize>,
}

impl AppState {
    pub(crate) fn new(hub: StreamHub) -> Self {
        Self {
            hub,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Counts one stream connection for as long as it lives.
pub(crate) struct ConnectionGuard {
    connections: Arc<AtomicUsize>,
    remote: Option<SocketAddr>,
}

impl ConnectionGuard {
    pub(crate) fn new(state: &AppState, remote: Option<SocketAddr>) -> Self {
        let active = state.connections.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            remote = ?remote,
            mode = %state.hub.mode(),
            active_connections = active,
            "stream client connected"
        );
        Self {
            connections: Arc::clone(&state.connections),
            remote,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.connections.fetch_sub(1, Ordering::Relaxed) - 1;
        info!(
            remote = ?self.remote,
            active_connections = active,
            "stream client disconnected"
        );
    }
}
