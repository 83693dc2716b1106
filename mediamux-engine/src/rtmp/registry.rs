//! Live-connection bookkeeping for the admin API's `rtmpconns` surface.
//!
//! Grounded in the teacher's `streamhub` subscriber/publisher listing (the
//! admin API needs the same "who's connected right now" view `synctv`'s
//! HTTP handlers build from it); kept as a small side table the session
//! updates rather than folding into [`mediamux_core::Path`], since a
//! connection's admin-facing identity (remote address, connected-since) is
//! an RTMP-driver concern, not a core one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A snapshot of one connected RTMP socket, for `GET /v3/rtmpconns/list`.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub remote_addr: SocketAddr,
    pub path: Option<String>,
    pub created_at: Instant,
}

struct Entry {
    info: ConnectionInfo,
    cancel: CancellationToken,
}

/// Tracks every currently-accepted RTMP connection for the admin API's
/// session-listing and kick-by-uuid endpoints.
#[derive(Default)]
pub struct ConnectionRegistry(DashMap<Uuid, Entry>);

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self(DashMap::new()))
    }

    pub(crate) fn insert(&self, remote_addr: SocketAddr, cancel: CancellationToken) -> Uuid {
        let id = Uuid::new_v4();
        self.0.insert(
            id,
            Entry {
                info: ConnectionInfo { id, remote_addr, path: None, created_at: Instant::now() },
                cancel,
            },
        );
        id
    }

    pub(crate) fn set_path(&self, id: Uuid, path: String) {
        if let Some(mut entry) = self.0.get_mut(&id) {
            entry.info.path = Some(path);
        }
    }

    pub(crate) fn remove(&self, id: Uuid) {
        self.0.remove(&id);
    }

    #[must_use]
    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.0.iter().map(|e| e.info.clone()).collect()
    }

    /// Cancels the connection's task, which tears down the socket and its
    /// session role on its next `select!` poll. Returns `false` if no
    /// connection with this id is currently tracked.
    #[must_use]
    pub fn kick(&self, id: Uuid) -> bool {
        match self.0.get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_connection_is_listed_and_removable() {
        let registry = ConnectionRegistry::new();
        let id = registry.insert("127.0.0.1:1234".parse().unwrap(), CancellationToken::new());
        assert_eq!(registry.list().len(), 1);

        registry.set_path(id, "cam1".to_string());
        assert_eq!(registry.list()[0].path.as_deref(), Some("cam1"));

        registry.remove(id);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn kick_cancels_the_tracked_token() {
        let registry = ConnectionRegistry::new();
        let cancel = CancellationToken::new();
        let id = registry.insert("127.0.0.1:1234".parse().unwrap(), cancel.clone());
        assert!(registry.kick(id));
        assert!(cancel.is_cancelled());
        assert!(!registry.kick(Uuid::new_v4()));
    }
}
