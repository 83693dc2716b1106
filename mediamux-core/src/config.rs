//! YAML configuration model and loader.
//!
//! Grounded in the teacher's `config` crate usage (layered file + env
//! loading) and `synctv`'s top-level `Config` struct; the path-pattern
//! resolution order requirement (declaration order wins on ties, see
//! [`crate::path_manager`]) is why [`RelayConfig::paths`] is an `IndexMap`
//! rather than a `HashMap`.

use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::Credential;

fn default_true() -> bool {
    true
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_write_queue_size() -> usize {
    512
}

fn default_on_demand_start_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_on_demand_close_after() -> Duration {
    Duration::from_secs(10)
}

/// Top-level configuration: `global` settings plus the ordered map of
/// per-path patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    #[serde(flatten)]
    pub global: GlobalConfig,
    pub paths: IndexMap<String, PathConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            paths: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalConfig {
    pub log_level: String,
    pub log_destinations: Vec<String>,
    pub log_file: Option<String>,

    pub api: bool,
    pub api_address: SocketAddr,

    pub rtsp: bool,
    pub rtsp_address: SocketAddr,
    pub rtsps_address: SocketAddr,
    pub rtsp_auth_methods: Vec<String>,

    pub rtmp: bool,
    pub rtmp_address: SocketAddr,
    pub rtmps_address: SocketAddr,

    pub hls: bool,
    pub hls_address: SocketAddr,

    pub webrtc: bool,
    pub webrtc_address: SocketAddr,

    pub srt: bool,
    pub srt_address: SocketAddr,

    pub external_authentication_url: Option<String>,

    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    pub write_queue_size: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_destinations: vec!["stdout".to_string()],
            log_file: None,
            api: false,
            api_address: "127.0.0.1:9997".parse().unwrap(),
            rtsp: true,
            rtsp_address: "0.0.0.0:8554".parse().unwrap(),
            rtsps_address: "0.0.0.0:8322".parse().unwrap(),
            rtsp_auth_methods: vec!["basic".to_string()],
            rtmp: true,
            rtmp_address: "0.0.0.0:1935".parse().unwrap(),
            rtmps_address: "0.0.0.0:1936".parse().unwrap(),
            hls: true,
            hls_address: "0.0.0.0:8888".parse().unwrap(),
            webrtc: false,
            webrtc_address: "0.0.0.0:8889".parse().unwrap(),
            srt: false,
            srt_address: "0.0.0.0:8890".parse().unwrap(),
            external_authentication_url: None,
            read_timeout: default_read_timeout(),
            write_queue_size: default_write_queue_size(),
        }
    }
}

/// Per-path settings; one entry per key in [`RelayConfig::paths`], the key
/// itself being the pattern (literal name, `~regex`, or `all`/`all_others`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PathConfig {
    pub source: Option<String>,
    pub source_fingerprint: Option<String>,
    #[serde(default = "default_true")]
    pub source_on_demand: bool,
    #[serde(with = "humantime_serde", default = "default_on_demand_start_timeout")]
    pub source_on_demand_start_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_on_demand_close_after")]
    pub source_on_demand_close_after: Duration,

    pub publish_user: Option<Credential>,
    pub publish_pass: Option<Credential>,
    pub publish_ips: Vec<String>,
    pub read_user: Option<Credential>,
    pub read_pass: Option<Credential>,
    pub read_ips: Vec<String>,

    pub fallback: Option<String>,
    pub max_readers: Option<usize>,
    pub overridable: bool,

    pub run_on_init: Option<String>,
    pub run_on_init_restart: bool,
    pub run_on_demand: Option<String>,
    pub run_on_demand_restart: bool,
    #[serde(with = "humantime_serde", default = "default_on_demand_close_after")]
    pub run_on_demand_close_after: Duration,
    pub run_on_connect: Option<String>,
    pub run_on_disconnect: Option<String>,
    pub run_on_ready: Option<String>,
    pub run_on_not_ready: Option<String>,
    pub run_on_read: Option<String>,
    pub run_on_unread: Option<String>,
    pub run_on_un_demand: Option<String>,

    pub record: bool,
    pub record_path: Option<String>,
    pub record_segment_duration: Option<Duration>,
    pub run_on_record_segment_create: Option<String>,
    pub run_on_record_segment_complete: Option<String>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            source: None,
            source_fingerprint: None,
            source_on_demand: true,
            source_on_demand_start_timeout: default_on_demand_start_timeout(),
            source_on_demand_close_after: default_on_demand_close_after(),
            publish_user: None,
            publish_pass: None,
            publish_ips: Vec::new(),
            read_user: None,
            read_pass: None,
            read_ips: Vec::new(),
            fallback: None,
            max_readers: None,
            overridable: true,
            run_on_init: None,
            run_on_init_restart: false,
            run_on_demand: None,
            run_on_demand_restart: false,
            run_on_demand_close_after: default_on_demand_close_after(),
            run_on_connect: None,
            run_on_disconnect: None,
            run_on_ready: None,
            run_on_not_ready: None,
            run_on_read: None,
            run_on_unread: None,
            run_on_un_demand: None,
            record: false,
            record_path: None,
            record_segment_duration: None,
            run_on_record_segment_create: None,
            run_on_record_segment_complete: None,
        }
    }
}

impl PathConfig {
    /// Whether this pattern is a regex (`~pattern`) rather than a literal
    /// path name or the `all`/`all_others` catch-alls.
    #[must_use]
    pub fn is_regex_pattern(name: &str) -> bool {
        name.starts_with('~')
    }

    pub fn compile_pattern(name: &str) -> Result<Option<Regex>, ConfigError> {
        if let Some(src) = name.strip_prefix('~') {
            Regex::new(src)
                .map(Some)
                .map_err(|e| ConfigError::InvalidPathPattern {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
        } else {
            Ok(None)
        }
    }
}

impl RelayConfig {
    /// Load from a YAML file, validating every path pattern compiles and
    /// every listen address is distinct.
    pub fn load(path: &FsPath) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for name in self.paths.keys() {
            PathConfig::compile_pattern(name)?;
        }
        Ok(())
    }

    /// `true` if `other` differs from `self` in a way that requires
    /// recreating listeners rather than a live path-table swap.
    #[must_use]
    pub fn requires_restart(&self, other: &RelayConfig) -> bool {
        self.global.api_address != other.global.api_address
            || self.global.rtsp_address != other.global.rtsp_address
            || self.global.rtsps_address != other.global.rtsps_address
            || self.global.rtmp_address != other.global.rtmp_address
            || self.global.rtmps_address != other.global.rtmps_address
            || self.global.hls_address != other.global.hls_address
            || self.global.webrtc_address != other.global.webrtc_address
            || self.global.srt_address != other.global.srt_address
            || self.global.rtsp != other.global.rtsp
            || self.global.rtmp != other.global.rtmp
            || self.global.hls != other.global.hls
            || self.global.webrtc != other.global.webrtc
            || self.global.srt != other.global.srt
            || self.global.api != other.global.api
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = RelayConfig::default();
        assert!(cfg.global.rtsp);
        assert!(cfg.paths.is_empty());
    }

    #[test]
    fn path_order_is_preserved() {
        let yaml = r#"
paths:
  b:
    source: publisher
  a:
    source: publisher
  "~^cam_(\d+)$":
    source: publisher
"#;
        let cfg = RelayConfig::parse(yaml).unwrap();
        let names: Vec<&str> = cfg.paths.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["b", "a", "~^cam_(\\d+)$"]);
    }

    #[test]
    fn invalid_regex_pattern_is_rejected() {
        let yaml = r#"
paths:
  "~(unclosed":
    source: publisher
"#;
        let err = RelayConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPathPattern { .. }));
    }

    #[test]
    fn sha256_credential_round_trips_through_yaml() {
        let yaml = r#"
paths:
  cam1:
    publishUser: "sha256:deadbeef"
"#;
        let cfg = RelayConfig::parse(yaml).unwrap();
        let user = cfg.paths["cam1"].publish_user.clone().unwrap();
        assert_eq!(user.0, "sha256:deadbeef");
    }
}
