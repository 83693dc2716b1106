//! Path manager (C5): resolves path names against the configured patterns
//! and owns the live [`Path`] table, including hot config-reload diffing.
//!
//! Grounded in the teacher's `streamhub` top-level registry
//! (`name -> producer` map) generalized to the three-tier resolution order
//! (exact, then regex declarations in file order, then `all_others`) the
//! data model requires, with capture groups exposed via [`PathCaptures`].
//!
//! `add_publisher`/`add_reader` (§4.5) are this module's single entry point
//! for drivers: authenticate, admit, and fire the matching `runOn*` hooks
//! and on-demand source lifecycle (§4.6, §4.7), so no driver has to
//! reimplement that sequencing itself.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::auth::authenticate;
use crate::config::{PathConfig, RelayConfig};
use crate::error::{ConfigError, PathError};
use crate::hooks::{self, HookEvent};
use crate::keepalive::{KeepaliveId, KeepaliveInfo, KeepaliveRegistry};
use crate::model::{AccessRequest, MediaDescription, MediaUnit, PathCaptures, PublisherId, ReaderId};
use crate::ondemand::controller::{OnDemandController, Source};
use crate::path::Path;
use crate::stream::Stream;

/// Whether newly-created paths should packetize RTP alongside decoded access
/// units: only needed when at least one RTP-consuming driver (RTSP/RTSPS,
/// WebRTC, SRT) is enabled, since RTMP/HLS/FLV readers never touch it.
fn compute_generate_rtp(config: &RelayConfig) -> bool {
    config.global.rtsp || config.global.webrtc || config.global.srt
}

struct CompiledPattern {
    name: String,
    regex: Option<Regex>,
    config: PathConfig,
}

/// What changed between two successive configuration reloads for one path
/// pattern, used to decide whether a live path needs to be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDiff {
    Unchanged,
    Added,
    Removed,
    Changed,
}

/// A running on-demand source plus its idle-teardown watchdog, keyed by
/// path name so a second reader arriving while one is already starting
/// reuses it instead of spawning a duplicate.
struct OnDemandHandle {
    cancellation: CancellationToken,
    #[allow(dead_code)]
    task: tokio::task::JoinHandle<()>,
}

/// Owns every currently-instantiated [`Path`] plus the ordered, compiled
/// list of configured patterns used to resolve new path names against.
pub struct PathManager {
    patterns: RwLock<Vec<CompiledPattern>>,
    all_others: RwLock<Option<PathConfig>>,
    paths: DashMap<String, Arc<Path>>,
    default_queue_size: RwLock<Option<usize>>,
    generate_rtp: RwLock<bool>,
    http: reqwest::Client,
    external_auth_url: RwLock<Option<String>>,
    on_demand: Arc<DashMap<String, OnDemandHandle>>,
    keepalives: KeepaliveRegistry,
}

/// The result of resolving a requested path name against the configured
/// patterns: which pattern matched, its effective config, and any regex
/// capture groups to substitute into `run_on_*`/source templates.
pub struct Resolution {
    pub config: PathConfig,
    pub captures: PathCaptures,
}

impl PathManager {
    pub fn new(config: &RelayConfig) -> Result<Self, ConfigError> {
        let (patterns, all_others) = compile_patterns(config)?;
        Ok(Self {
            patterns: RwLock::new(patterns),
            all_others: RwLock::new(all_others),
            paths: DashMap::new(),
            default_queue_size: RwLock::new(Some(config.global.write_queue_size)),
            generate_rtp: RwLock::new(compute_generate_rtp(config)),
            http: reqwest::Client::new(),
            external_auth_url: RwLock::new(config.global.external_authentication_url.clone()),
            on_demand: Arc::new(DashMap::new()),
            keepalives: KeepaliveRegistry::new(),
        })
    }

    /// Resolves `name` against configured patterns: an exact literal match
    /// wins outright, then regex patterns in declaration order, then
    /// `all`/`all_others` as a final catch-all.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Resolution> {
        let patterns = self.patterns.read();
        for pattern in patterns.iter() {
            if pattern.regex.is_none() && pattern.name == name {
                return Some(Resolution {
                    config: pattern.config.clone(),
                    captures: PathCaptures::default(),
                });
            }
        }
        for pattern in patterns.iter() {
            if let Some(regex) = &pattern.regex {
                if let Some(caps) = regex.captures(name) {
                    let groups = caps
                        .iter()
                        .skip(1)
                        .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                        .collect();
                    return Some(Resolution {
                        config: pattern.config.clone(),
                        captures: PathCaptures(groups),
                    });
                }
            }
        }
        self.all_others.read().clone().map(|config| Resolution {
            config,
            captures: PathCaptures::default(),
        })
    }

    /// Gets or lazily creates the live [`Path`] for `name`, provided it
    /// resolves against some configured pattern.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<Path>, PathError> {
        if let Some(path) = self.paths.get(name) {
            return Ok(path.clone());
        }
        let resolution = self.resolve(name).ok_or_else(|| PathError::UnknownPath(name.to_string()))?;
        let path = Arc::new(Path::new(
            name.to_string(),
            resolution.config.max_readers,
            *self.default_queue_size.read(),
            *self.generate_rtp.read(),
        ));
        self.paths.insert(name.to_string(), path.clone());
        Ok(path)
    }

    #[must_use]
    pub fn existing(&self, name: &str) -> Option<Arc<Path>> {
        self.paths.get(name).map(|p| p.clone())
    }

    pub async fn remove(&self, name: &str) {
        if let Some((_, path)) = self.paths.remove(name) {
            path.close().await;
        }
    }

    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        self.paths.iter().map(|e| e.key().clone()).collect()
    }

    /// Hot-swaps the configured pattern set and default queue size, tearing
    /// down any live [`Path`] whose pattern was removed or whose
    /// live-affecting fields changed (source, credentials, ACLs, overridable,
    /// max readers). A path whose pattern is unchanged keeps running with its
    /// already-admitted publisher/readers untouched. The path it replaces is
    /// re-created lazily, picking up the new config, on the next
    /// `get_or_create`.
    pub async fn apply_config(&self, new: &RelayConfig) -> Result<(), ConfigError> {
        let (new_patterns, new_all_others) = compile_patterns(new)?;

        let live_names: Vec<String> = self.paths.iter().map(|e| e.key().clone()).collect();
        let before: Vec<(String, Option<PathConfig>)> =
            live_names.iter().map(|n| (n.clone(), self.resolve(n).map(|r| r.config))).collect();

        *self.patterns.write() = new_patterns;
        *self.all_others.write() = new_all_others;
        *self.default_queue_size.write() = Some(new.global.write_queue_size);
        *self.generate_rtp.write() = compute_generate_rtp(new);
        *self.external_auth_url.write() = new.global.external_authentication_url.clone();

        for (name, old_config) in before {
            let new_config = self.resolve(&name).map(|r| r.config);
            let unchanged = match (&old_config, &new_config) {
                (Some(a), Some(b)) => configs_equivalent(a, b),
                _ => false,
            };
            if !unchanged {
                self.remove(&name).await;
            }
        }
        Ok(())
    }

    /// Diffs `old` against `self`'s freshly-built pattern set for pattern
    /// `name`, classifying whether a live instance needs to be recreated.
    #[must_use]
    pub fn diff_pattern(old: Option<&PathConfig>, new: Option<&PathConfig>) -> PathDiff {
        match (old, new) {
            (None, None) => PathDiff::Unchanged,
            (None, Some(_)) => PathDiff::Added,
            (Some(_), None) => PathDiff::Removed,
            (Some(a), Some(b)) => {
                if configs_equivalent(a, b) {
                    PathDiff::Unchanged
                } else {
                    PathDiff::Changed
                }
            }
        }
    }

    /// Authenticates and admits a publisher (§4.1, §4.4), firing
    /// `runOnConnect`/`runOnReady` as it does. This is the single entry
    /// point a wire driver calls on `ANNOUNCE`/`publish`/WHIP-offer.
    #[instrument(skip(self, description), fields(path = %req.path_name))]
    pub async fn add_publisher(
        &self,
        req: &AccessRequest,
        remote_addr: Option<SocketAddr>,
        description: MediaDescription,
    ) -> Result<(Arc<Path>, PublisherId, CancellationToken), PathError> {
        let resolution = self.resolve(&req.path_name).ok_or_else(|| PathError::UnknownPath(req.path_name.clone()))?;
        authenticate(req, &resolution.config, self.external_auth_url.read().as_deref(), &self.http).await?;

        let env = hook_env(req, &resolution.captures);
        fire_hook(resolution.config.run_on_connect.as_deref(), HookEvent::Connect, &env);

        let path = self.get_or_create(&req.path_name)?;
        let (publisher_id, eof) = path
            .admit_publisher(remote_addr, description, resolution.config.overridable, resolution.config.overridable)
            .await?;

        fire_hook(resolution.config.run_on_ready.as_deref(), HookEvent::Ready, &env);
        info!(path = %req.path_name, "publisher admitted");
        Ok((path, publisher_id, eof))
    }

    /// Ends a publisher's session (driver disconnect, kick, or override),
    /// firing `runOnNotReady`/`runOnDisconnect`.
    pub async fn remove_publisher(&self, req: &AccessRequest, publisher_id: PublisherId) {
        let Some(path) = self.existing(&req.path_name) else { return };
        path.remove_publisher(publisher_id).await;
        if let Some(resolution) = self.resolve(&req.path_name) {
            let env = hook_env(req, &resolution.captures);
            fire_hook(resolution.config.run_on_not_ready.as_deref(), HookEvent::NotReady, &env);
            fire_hook(resolution.config.run_on_disconnect.as_deref(), HookEvent::Disconnect, &env);
        }
    }

    /// Authenticates and admits a reader (§4.1, §4.4), starting an
    /// on-demand source first if the path isn't already `Ready` and one is
    /// configured, and redirecting to `fallback` if the wait for a
    /// publisher times out with one configured. Fires `runOnRead`.
    #[instrument(skip(self), fields(path = %req.path_name))]
    pub async fn add_reader(
        &self,
        req: &AccessRequest,
    ) -> Result<(Arc<Path>, Arc<Stream>, ReaderId, mpsc::Receiver<Arc<MediaUnit>>), PathError> {
        let resolution = self.resolve(&req.path_name).ok_or_else(|| PathError::UnknownPath(req.path_name.clone()))?;
        authenticate(req, &resolution.config, self.external_auth_url.read().as_deref(), &self.http).await?;

        let env = hook_env(req, &resolution.captures);
        fire_hook(resolution.config.run_on_connect.as_deref(), HookEvent::Connect, &env);

        let path = self.get_or_create(&req.path_name)?;
        if path.state().await != crate::path::PathState::Ready {
            self.ensure_on_demand(&req.path_name, &resolution.config, &resolution.captures);
        }

        let result = path.admit_reader(resolution.config.source_on_demand_start_timeout, req.protocol).await;
        let (stream, reader_id, rx) = match result {
            Ok(v) => v,
            Err(PathError::SourceStartTimeout) => {
                if let Some(fallback) = &resolution.config.fallback {
                    return Err(PathError::Fallback(resolution.captures.substitute(fallback)));
                }
                return Err(PathError::SourceStartTimeout);
            }
            Err(e) => return Err(e),
        };

        fire_hook(resolution.config.run_on_read.as_deref(), HookEvent::Read, &env);
        Ok((path, stream, reader_id, rx))
    }

    /// Detaches a reader, firing `runOnUnread`, and — if that was the last
    /// reader on an on-demand path — starts the idle-teardown countdown.
    pub async fn remove_reader(&self, req: &AccessRequest, reader_id: ReaderId) {
        let Some(path) = self.existing(&req.path_name) else { return };
        if let Some(stream) = path.stream().await {
            let _ = stream.remove_reader(reader_id);
        }
        if let Some(resolution) = self.resolve(&req.path_name) {
            let env = hook_env(req, &resolution.captures);
            fire_hook(resolution.config.run_on_unread.as_deref(), HookEvent::Unread, &env);
        }
    }

    /// Starts the on-demand source for `name` if one is configured and not
    /// already running, and arms the idle-teardown watchdog that stops it
    /// (and closes the path) after `source_on_demand_close_after` with no
    /// readers.
    fn ensure_on_demand(&self, name: &str, config: &PathConfig, captures: &PathCaptures) {
        if self.on_demand.contains_key(name) {
            return;
        }
        let Some(source) = &config.source else { return };
        if !config.source_on_demand {
            return;
        }
        let source = match Source::classify(source, config.run_on_demand.as_deref(), config.run_on_demand_restart) {
            Ok(source) => source,
            Err(e) => {
                warn!(path = %name, error = %e, "cannot start on-demand source");
                return;
            }
        };
        let Some(path) = self.existing(name).or_else(|| self.get_or_create(name).ok()) else { return };

        let mut env = HashMap::new();
        env.insert("MTX_PATH".to_string(), name.to_string());
        for (i, g) in captures.0.iter().enumerate() {
            env.insert(format!("G{}", i + 1), g.clone());
        }

        let cancellation = path.cancellation().child_token();
        let close_after = config.source_on_demand_close_after;
        let name_owned = name.to_string();
        let path_for_task = path.clone();
        let controller_cancel = cancellation.clone();
        let on_demand = self.on_demand.clone();
        let un_demand_env = env.clone();
        let run_on_un_demand = config.run_on_un_demand.clone();
        let task = tokio::spawn(async move {
            let controller = OnDemandController::new(name_owned.clone(), env);
            tokio::select! {
                result = controller.run(source, controller_cancel.clone()) => {
                    if let Err(e) = result {
                        warn!(path = %name_owned, error = %e, "on-demand source ended with an error");
                    }
                }
                () = idle_watchdog(&path_for_task, close_after, controller_cancel.clone()) => {
                    controller_cancel.cancel();
                }
            }
            fire_hook(run_on_un_demand.as_deref(), HookEvent::UnDemand, &un_demand_env);
            on_demand.remove(&name_owned);
        });

        self.on_demand.insert(name.to_string(), OnDemandHandle { cancellation, task });
    }

    /// Stops and forgets the on-demand supervisor for `name`, if any.
    pub fn stop_on_demand(&self, name: &str) {
        if let Some((_, handle)) = self.on_demand.remove(name) {
            handle.cancellation.cancel();
        }
    }

    /// Admin-requested keepalive: attaches a zero-consumption reader to
    /// `name`'s stream, holding an on-demand path open without a real
    /// player. Fails if the path has no stream yet (no publisher, nothing to
    /// keep alive).
    pub async fn create_keepalive(
        &self,
        name: &str,
        user: String,
        ip: std::net::IpAddr,
    ) -> Result<KeepaliveId, PathError> {
        let path = self.existing(name).ok_or_else(|| PathError::UnknownPath(name.to_string()))?;
        let stream = path.stream().await.ok_or(PathError::NoOnePublishing)?;
        Ok(self.keepalives.create(name.to_string(), user, ip, stream))
    }

    /// Kicks an admin-created keepalive by id. Returns whether one was found.
    pub fn kick_keepalive(&self, id: KeepaliveId) -> bool {
        self.keepalives.kick(id)
    }

    #[must_use]
    pub fn list_keepalives(&self) -> Vec<KeepaliveInfo> {
        self.keepalives.list()
    }
}

/// Waits until `path`'s stream has had zero readers for `close_after`,
/// resetting the countdown whenever a reader is attached.
async fn idle_watchdog(path: &Arc<Path>, close_after: Duration, cancellation: CancellationToken) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(1)) => {}
            () = cancellation.cancelled() => return,
        }
        let readers = match path.stream().await {
            Some(stream) => stream.reader_count(),
            None => 0,
        };
        if readers == 0 {
            tokio::select! {
                () = tokio::time::sleep(close_after) => {
                    let still_idle = path.stream().await.map(|s| s.reader_count()).unwrap_or(0) == 0;
                    if still_idle {
                        return;
                    }
                }
                () = cancellation.cancelled() => return,
            }
        }
    }
}

fn hook_env(req: &AccessRequest, captures: &PathCaptures) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("MTX_PATH".to_string(), req.path_name.clone());
    env.insert("MTX_QUERY".to_string(), req.query.clone());
    env.insert("MTX_PROTOCOL".to_string(), req.protocol.to_string());
    for (i, g) in captures.0.iter().enumerate() {
        env.insert(format!("G{}", i + 1), g.clone());
    }
    env
}

/// Fires a configured hook command, if any, as a detached fire-and-forget
/// task — callers on the admit path must not block on a `runOnConnect`
/// script that never returns.
fn fire_hook(command: Option<&str>, event: HookEvent, env: &HashMap<String, String>) {
    let Some(command) = command else { return };
    let command = command.to_string();
    let env = env.clone();
    tokio::spawn(async move {
        if let Err(e) = hooks::run_once(&command, event, &env).await {
            warn!(%command, error = %e, "hook failed");
        }
    });
}

/// Compiles the `paths` table of a [`RelayConfig`] into the pattern list and
/// `all_others` fallback [`PathManager::new`]/[`PathManager::apply_config`]
/// install atomically.
fn compile_patterns(config: &RelayConfig) -> Result<(Vec<CompiledPattern>, Option<PathConfig>), ConfigError> {
    let mut patterns = Vec::new();
    let mut all_others = None;
    for (name, path_config) in &config.paths {
        if name == "all" || name == "all_others" {
            all_others = Some(path_config.clone());
            continue;
        }
        let regex = PathConfig::compile_pattern(name)?;
        patterns.push(CompiledPattern {
            name: name.clone(),
            regex,
            config: path_config.clone(),
        });
    }
    Ok((patterns, all_others))
}

fn configs_equivalent(a: &PathConfig, b: &PathConfig) -> bool {
    a.source == b.source
        && a.source_on_demand == b.source_on_demand
        && a.publish_user == b.publish_user
        && a.publish_pass == b.publish_pass
        && a.publish_ips == b.publish_ips
        && a.read_user == b.read_user
        && a.read_pass == b.read_pass
        && a.read_ips == b.read_ips
        && a.fallback == b.fallback
        && a.max_readers == b.max_readers
        && a.overridable == b.overridable
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_paths(yaml: &str) -> RelayConfig {
        RelayConfig::parse(yaml).unwrap()
    }

    #[test]
    fn exact_match_wins_over_regex() {
        let cfg = config_with_paths(
            r#"
paths:
  "~^cam_(\d+)$":
    source: publisher
  cam_1:
    source: publisher
"#,
        );
        let manager = PathManager::new(&cfg).unwrap();
        let resolution = manager.resolve("cam_1").unwrap();
        assert!(resolution.captures.0.is_empty());
    }

    #[test]
    fn regex_captures_are_exposed_in_declaration_order() {
        let cfg = config_with_paths(
            r#"
paths:
  "~^cam_(\d+)_(\w+)$":
    source: publisher
"#,
        );
        let manager = PathManager::new(&cfg).unwrap();
        let resolution = manager.resolve("cam_42_front").unwrap();
        assert_eq!(resolution.captures.get(1), Some("42"));
        assert_eq!(resolution.captures.get(2), Some("front"));
    }

    #[test]
    fn all_others_is_a_last_resort() {
        let cfg = config_with_paths(
            r#"
paths:
  known:
    source: publisher
  all_others:
    sourceOnDemand: false
"#,
        );
        let manager = PathManager::new(&cfg).unwrap();
        assert!(manager.resolve("known").unwrap().config.source.is_some());
        assert!(!manager.resolve("anything_else").unwrap().config.source_on_demand);
    }

    #[test]
    fn unresolvable_path_returns_none() {
        let cfg = config_with_paths("paths:\n  known:\n    source: publisher\n");
        let manager = PathManager::new(&cfg).unwrap();
        assert!(manager.resolve("unknown").is_none());
    }

    #[test]
    fn diff_classifies_added_removed_changed_unchanged() {
        let a = PathConfig { source: Some("x".to_string()), ..PathConfig::default() };
        let b = PathConfig { source: Some("y".to_string()), ..PathConfig::default() };
        assert_eq!(PathManager::diff_pattern(None, Some(&a)), PathDiff::Added);
        assert_eq!(PathManager::diff_pattern(Some(&a), None), PathDiff::Removed);
        assert_eq!(PathManager::diff_pattern(Some(&a), Some(&b)), PathDiff::Changed);
        assert_eq!(PathManager::diff_pattern(Some(&a), Some(&a)), PathDiff::Unchanged);
    }

    #[tokio::test]
    async fn reload_keeps_a_live_path_whose_config_is_unchanged() {
        let cfg = config_with_paths("paths:\n  cam1:\n    maxReaders: 4\n");
        let manager = PathManager::new(&cfg).unwrap();
        let before = manager.get_or_create("cam1").unwrap();

        manager.apply_config(&cfg).await.unwrap();

        let after = manager.existing("cam1").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn reload_tears_down_a_path_whose_pattern_was_removed() {
        let cfg = config_with_paths("paths:\n  cam1:\n    maxReaders: 4\n");
        let manager = PathManager::new(&cfg).unwrap();
        manager.get_or_create("cam1").unwrap();

        let empty = RelayConfig::default();
        manager.apply_config(&empty).await.unwrap();

        assert!(manager.existing("cam1").is_none());
    }

    #[tokio::test]
    async fn reload_tears_down_a_path_whose_max_readers_changed() {
        let cfg = config_with_paths("paths:\n  cam1:\n    maxReaders: 4\n");
        let manager = PathManager::new(&cfg).unwrap();
        manager.get_or_create("cam1").unwrap();

        let changed = config_with_paths("paths:\n  cam1:\n    maxReaders: 8\n");
        manager.apply_config(&changed).await.unwrap();

        assert!(manager.existing("cam1").is_none());
        assert_eq!(manager.resolve("cam1").unwrap().config.max_readers, Some(8));
    }

    fn video_description() -> MediaDescription {
        MediaDescription::new(vec![crate::model::Media {
            kind: crate::model::MediaKind::Video,
            formats: vec![crate::model::Format::H264 {
                payload_type: 96,
                clock_rate: 90_000,
                packetization_mode: 1,
                sps: None,
                pps: None,
            }],
        }])
    }

    fn request(path_name: &str, action: crate::model::Action) -> AccessRequest {
        AccessRequest {
            path_name: path_name.to_string(),
            query: String::new(),
            user: String::new(),
            pass: String::new(),
            ip: "127.0.0.1".parse().unwrap(),
            protocol: crate::model::Protocol::Rtmp,
            action,
            id: None,
        }
    }

    #[tokio::test]
    async fn add_publisher_then_add_reader_reaches_ready() {
        let cfg = config_with_paths("paths:\n  cam1:\n    source: publisher\n");
        let manager = PathManager::new(&cfg).unwrap();

        let (path, publisher_id, _eof) = manager
            .add_publisher(&request("cam1", crate::model::Action::Publish), None, video_description())
            .await
            .unwrap();
        assert_eq!(path.name, "cam1");

        let (_path, _stream, _reader_id, _rx) =
            manager.add_reader(&request("cam1", crate::model::Action::Read)).await.unwrap();

        manager.remove_publisher(&request("cam1", crate::model::Action::Publish), publisher_id).await;
        assert_eq!(manager.existing("cam1").unwrap().state().await, crate::path::PathState::WaitingPublisher);
    }

    #[tokio::test]
    async fn add_publisher_rejects_unconfigured_path() {
        let cfg = RelayConfig::default();
        let manager = PathManager::new(&cfg).unwrap();
        let err = manager
            .add_publisher(&request("nope", crate::model::Action::Publish), None, video_description())
            .await
            .unwrap_err();
        assert!(matches!(err, PathError::UnknownPath(name) if name == "nope"));
    }

    #[tokio::test]
    async fn add_reader_redirects_to_fallback_on_timeout() {
        let cfg = config_with_paths(
            "paths:\n  cam1:\n    source: rtsp://upstream/cam1\n    sourceOnDemand: false\n    sourceOnDemandStartTimeout: 20ms\n    fallback: /static/offline.jpg\n",
        );
        let manager = PathManager::new(&cfg).unwrap();
        let err = manager.add_reader(&request("cam1", crate::model::Action::Read)).await.unwrap_err();
        assert!(matches!(err, PathError::Fallback(target) if target == "/static/offline.jpg"));
    }

    #[tokio::test]
    async fn add_reader_without_fallback_surfaces_timeout() {
        let cfg = config_with_paths(
            "paths:\n  cam1:\n    source: rtsp://upstream/cam1\n    sourceOnDemand: false\n    sourceOnDemandStartTimeout: 20ms\n",
        );
        let manager = PathManager::new(&cfg).unwrap();
        let err = manager.add_reader(&request("cam1", crate::model::Action::Read)).await.unwrap_err();
        assert!(matches!(err, PathError::SourceStartTimeout));
    }

    #[tokio::test]
    async fn remove_reader_on_unknown_path_is_a_no_op() {
        let cfg = RelayConfig::default();
        let manager = PathManager::new(&cfg).unwrap();
        manager.remove_reader(&request("nope", crate::model::Action::Read), 1).await;
    }

    #[tokio::test]
    async fn stop_on_demand_cancels_a_running_source_and_clears_the_entry() {
        let cfg = config_with_paths(
            "paths:\n  cam1:\n    source: rtsp://upstream/cam1\n    runOnDemand: sleep 100\n    sourceOnDemandStartTimeout: 20ms\n    sourceOnDemandCloseAfter: 1h\n",
        );
        let manager = PathManager::new(&cfg).unwrap();
        let resolution = manager.resolve("cam1").unwrap();
        manager.ensure_on_demand("cam1", &resolution.config, &resolution.captures);
        assert!(manager.on_demand.contains_key("cam1"));

        manager.stop_on_demand("cam1");
        assert!(!manager.on_demand.contains_key("cam1"));
    }

    #[tokio::test]
    async fn ensure_on_demand_skips_bare_pull_urls_without_run_on_demand() {
        let cfg = config_with_paths(
            "paths:\n  cam1:\n    source: rtsp://upstream/cam1\n    sourceOnDemandStartTimeout: 20ms\n",
        );
        let manager = PathManager::new(&cfg).unwrap();
        let resolution = manager.resolve("cam1").unwrap();
        manager.ensure_on_demand("cam1", &resolution.config, &resolution.captures);
        assert!(!manager.on_demand.contains_key("cam1"));
    }

    #[tokio::test]
    async fn create_keepalive_fails_without_a_live_stream() {
        let cfg = config_with_paths("paths:\n  cam1:\n    source: publisher\n");
        let manager = PathManager::new(&cfg).unwrap();
        let err = manager.create_keepalive("cam1", "alice".to_string(), "127.0.0.1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, PathError::UnknownPath(_)));
    }

    #[tokio::test]
    async fn create_keepalive_round_trips_once_a_publisher_is_live() {
        let cfg = config_with_paths("paths:\n  cam1:\n    source: publisher\n");
        let manager = PathManager::new(&cfg).unwrap();
        manager
            .add_publisher(&request("cam1", crate::model::Action::Publish), None, video_description())
            .await
            .unwrap();

        let id = manager.create_keepalive("cam1", "alice".to_string(), "127.0.0.1".parse().unwrap()).await.unwrap();
        assert_eq!(manager.list_keepalives().len(), 1);
        assert!(manager.kick_keepalive(id));
        assert!(!manager.kick_keepalive(id));
    }
}
