//! Keepalive reader (C8): a reader that attaches to a path's [`Stream`] and
//! consumes nothing, keeping an on-demand source's idle timer from firing
//! without actually forwarding media anywhere. Used by `runOnReady`-style
//! integrations that want a path held open without a real player attached.
//!
//! Admin-addressable via [`KeepaliveRegistry`]: `create(pathName, user, ip)`
//! returns an id the admin API can later `kick`.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::model::ReaderId;
use crate::stream::Stream;

pub type KeepaliveId = u64;

/// A zero-consumption attachment to a [`Stream`]. Counted in
/// `reader_count()` like any other reader (I5), so it participates in
/// reader-limit enforcement and keeps on-demand idle teardown from firing,
/// but its queue is simply never drained — full-queue eviction will detach
/// it if the stream outlives the keepalive's own lifetime, which is the
/// desired behavior rather than a leak.
pub struct Keepalive {
    stream: Arc<Stream>,
    reader_id: ReaderId,
}

impl Keepalive {
    #[must_use]
    pub fn create(stream: Arc<Stream>) -> Self {
        let (reader_id, _rx) = stream.add_reader(None);
        Self { stream, reader_id }
    }

    /// Terminates this keepalive, detaching it from the stream. Consumes
    /// `self` so a kicked keepalive cannot be kicked again or mistaken for
    /// still holding the path open — kicking ends the hold, it does not
    /// reset it.
    pub fn kick(self) {}
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        let _ = self.stream.remove_reader(self.reader_id);
    }
}

/// Metadata about one admin-created keepalive, as returned by
/// [`KeepaliveRegistry::list`].
#[derive(Debug, Clone)]
pub struct KeepaliveInfo {
    pub id: KeepaliveId,
    pub path_name: String,
    pub user: String,
    pub ip: IpAddr,
    pub created_at: Instant,
}

struct Entry {
    keepalive: Keepalive,
    path_name: String,
    user: String,
    ip: IpAddr,
    created_at: Instant,
}

/// Admin-addressable registry of live keepalives: `create(pathName, user,
/// ip) -> id`, `kick(id)`, `list()`. Owned by
/// [`crate::path_manager::PathManager`].
#[derive(Default)]
pub struct KeepaliveRegistry {
    next_id: AtomicU64,
    entries: DashMap<KeepaliveId, Entry>,
}

impl KeepaliveRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, path_name: String, user: String, ip: IpAddr, stream: Arc<Stream>) -> KeepaliveId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.insert(
            id,
            Entry { keepalive: Keepalive::create(stream), path_name, user, ip, created_at: Instant::now() },
        );
        id
    }

    /// Kicks the keepalive identified by `id`, if it still exists. Returns
    /// whether one was found.
    pub fn kick(&self, id: KeepaliveId) -> bool {
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                entry.keepalive.kick();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<KeepaliveInfo> {
        self.entries
            .iter()
            .map(|e| KeepaliveInfo {
                id: *e.key(),
                path_name: e.path_name.clone(),
                user: e.user.clone(),
                ip: e.ip,
                created_at: e.created_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Format, Media, MediaDescription, MediaKind};

    fn stream() -> Arc<Stream> {
        Arc::new(Stream::new(
            MediaDescription::new(vec![Media {
                kind: MediaKind::Audio,
                formats: vec![Format::Opus { payload_type: 111, clock_rate: 48_000, channel_count: 2 }],
            }]),
            None,
            true,
        ))
    }

    #[test]
    fn keepalive_counts_as_a_reader() {
        let stream = stream();
        let keepalive = Keepalive::create(stream.clone());
        assert_eq!(stream.reader_count(), 1);
        drop(keepalive);
        assert_eq!(stream.reader_count(), 0);
    }

    #[test]
    fn kick_terminates_rather_than_resets() {
        let stream = stream();
        let keepalive = Keepalive::create(stream.clone());
        keepalive.kick();
        assert_eq!(stream.reader_count(), 0);
    }

    #[test]
    fn registry_create_list_kick_round_trip() {
        let stream = stream();
        let registry = KeepaliveRegistry::new();
        let id = registry.create("cam1".to_string(), "alice".to_string(), "127.0.0.1".parse().unwrap(), stream.clone());

        assert_eq!(registry.list().len(), 1);
        assert_eq!(stream.reader_count(), 1);

        assert!(registry.kick(id));
        assert_eq!(stream.reader_count(), 0);
        assert!(registry.list().is_empty());
        assert!(!registry.kick(id));
    }
}
