//! Per-path HLS segmenter: drains a reader handle on the core [`Stream`],
//! remuxes access units into MPEG-TS, and maintains a sliding window of
//! segments plus the live playlist text.
//!
//! Grounded in the teacher's HLS storage backend split
//! (`storage::{FileStorage,MemoryStorage,OssStorage}`) — this module is the
//! piece that was missing from the retrieved sample: the segmenter that
//! actually produces the bytes those backends store, written in the same
//! `tokio::spawn` one-task-per-path shape as [`crate::rtmp::session::Session`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use mediamux_core::model::{Format, MediaKind, MediaUnit};
use mediamux_core::path_manager::PathManager;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::hls::ts::TsMuxer;
use crate::storage::HlsStorage;

/// Target duration of one segment before cutting on the next key frame.
/// Mirrors the teacher's `hlsSegmentDuration`-style default of a few seconds.
pub const DEFAULT_SEGMENT_DURATION: Duration = Duration::from_secs(6);
/// Number of segments kept in the live window (`EXT-X-MEDIA-SEQUENCE` slides
/// forward as older ones are evicted).
pub const DEFAULT_LIST_SIZE: usize = 6;

#[derive(Debug, Clone)]
struct SegmentMeta {
    sequence: u64,
    key: String,
    duration: Duration,
}

/// Live playlist state for one path: storage keys for the segment window
/// plus the cached `index.m3u8` text.
pub struct HlsMuxer {
    path_name: String,
    storage: Arc<dyn HlsStorage>,
    segments: RwLock<VecDeque<SegmentMeta>>,
    media_sequence: RwLock<u64>,
    cancellation: CancellationToken,
}

impl HlsMuxer {
    #[must_use]
    pub fn storage_key(path_name: &str, sequence: u64) -> String {
        format!("{path_name}-segment_{sequence}")
    }

    /// Renders the current `index.m3u8`. Empty windows (segmenter hasn't cut
    /// a first segment yet) return a playlist with no segments, matching the
    /// "`hlsAlwaysRemux`-style 404-until-ready" behavior of pull sources.
    #[must_use]
    pub fn playlist(&self) -> String {
        let segments = self.segments.read();
        let target = segments
            .iter()
            .map(|s| s.duration.as_secs_f64())
            .fold(0.0_f64, f64::max)
            .ceil()
            .max(1.0) as u64;
        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:3\n");
        out.push_str(&format!("#EXT-X-TARGETDURATION:{target}\n"));
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", *self.media_sequence.read()));
        for seg in segments.iter() {
            out.push_str(&format!("#EXTINF:{:.3},\n", seg.duration.as_secs_f64()));
            out.push_str(&format!("{}.ts\n", seg.sequence));
        }
        out
    }

    /// Looks up which storage key backs a requested `{sequence}.ts` segment,
    /// `None` if it has already slid out of the window.
    #[must_use]
    pub fn segment_key(&self, sequence: u64) -> Option<String> {
        self.segments.read().iter().find(|s| s.sequence == sequence).map(|s| s.key.clone())
    }

    pub fn stop(&self) {
        self.cancellation.cancel();
    }
}

/// Starts the segmenter task for `path_name`: admits an HLS reader through
/// `manager`, remuxes every [`MediaUnit`] it receives into MPEG-TS, and cuts
/// a new segment on every key frame once [`DEFAULT_SEGMENT_DURATION`] has
/// elapsed. Returns the shared [`HlsMuxer`] the HTTP layer serves from.
#[instrument(skip(manager, storage))]
pub async fn start(
    manager: Arc<PathManager>,
    path_name: String,
    storage: Arc<dyn HlsStorage>,
) -> Result<Arc<HlsMuxer>, mediamux_core::error::PathError> {
    let req = mediamux_core::model::AccessRequest {
        path_name: path_name.clone(),
        query: String::new(),
        user: String::new(),
        pass: String::new(),
        ip: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
        protocol: mediamux_core::model::Protocol::Hls,
        action: mediamux_core::model::Action::Read,
        id: None,
    };
    let (path, stream, reader_id, mut rx) = manager.add_reader(&req).await?;

    let video_index = stream.description().medias.iter().position(|m| m.kind == MediaKind::Video);
    let audio_index = stream.description().medias.iter().position(|m| m.kind == MediaKind::Audio);

    let muxer = Arc::new(HlsMuxer {
        path_name: path_name.clone(),
        storage: storage.clone(),
        segments: RwLock::new(VecDeque::new()),
        media_sequence: RwLock::new(0),
        cancellation: path.cancellation().child_token(),
    });

    let cancellation = muxer.cancellation.clone();
    let task_muxer = muxer.clone();
    let manager_for_cleanup = manager.clone();
    tokio::spawn(async move {
        let mut ts = TsMuxer::new(audio_index.is_some());
        let mut buf = BytesMut::new();
        let mut segment_start_pts: Option<Duration> = None;
        let mut sequence = 0u64;

        loop {
            tokio::select! {
                () = cancellation.cancelled() => break,
                unit = rx.recv() => {
                    let Some(unit) = unit else { break };
                    handle_unit(
                        &mut ts, &mut buf, &mut segment_start_pts, &mut sequence,
                        video_index, audio_index, &unit, &task_muxer,
                    ).await;
                }
            }
        }

        manager_for_cleanup.remove_reader(&req, reader_id).await;
        info!(path = %path_name, "hls segmenter stopped");
    });

    Ok(muxer)
}

#[allow(clippy::too_many_arguments)]
async fn handle_unit(
    ts: &mut TsMuxer,
    buf: &mut BytesMut,
    segment_start_pts: &mut Option<Duration>,
    sequence: &mut u64,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    unit: &Arc<MediaUnit>,
    muxer: &Arc<HlsMuxer>,
) {
    let pts_90k = duration_to_90k(unit.pts);
    let dts_90k = pts_90k;

    if Some(unit.media_index) == video_index {
        let is_key = unit.contains_key_frame();
        if is_key {
            let elapsed = segment_start_pts.map(|start| unit.pts.saturating_sub(start));
            if elapsed.is_some_and(|e| e >= DEFAULT_SEGMENT_DURATION) || segment_start_pts.is_none() {
                if segment_start_pts.is_some() && !buf.is_empty() {
                    cut_segment(buf, sequence, elapsed.unwrap_or_default(), muxer).await;
                }
                *segment_start_pts = Some(unit.pts);
            }
        }
        let mut annex_b = BytesMut::new();
        for au in &unit.access_units {
            annex_b.extend_from_slice(&[0, 0, 0, 1]);
            annex_b.extend_from_slice(&au.data);
        }
        if !annex_b.is_empty() {
            ts.write_video_unit(buf, pts_90k, dts_90k, is_key, &annex_b, is_key);
        }
    } else if Some(unit.media_index) == audio_index {
        for au in &unit.access_units {
            ts.write_audio_unit(buf, pts_90k, &au.data);
        }
    } else {
        debug!(media_index = unit.media_index, "hls segmenter received unit for untracked track");
    }
}

async fn cut_segment(buf: &mut BytesMut, sequence: &mut u64, duration: Duration, muxer: &Arc<HlsMuxer>) {
    let seq = *sequence;
    *sequence += 1;
    let key = HlsMuxer::storage_key(&muxer.path_name, seq);
    let data = buf.split().freeze();
    if let Err(e) = muxer.storage.write(&key, data).await {
        warn!(path = %muxer.path_name, error = %e, "failed to write hls segment");
        return;
    }

    let mut segments = muxer.segments.write();
    segments.push_back(SegmentMeta { sequence: seq, key: key.clone(), duration });
    while segments.len() > DEFAULT_LIST_SIZE {
        if let Some(evicted) = segments.pop_front() {
            *muxer.media_sequence.write() += 1;
            let storage = muxer.storage.clone();
            tokio::spawn(async move {
                let _ = storage.delete(&evicted.key).await;
            });
        }
    }
}

fn duration_to_90k(d: Duration) -> u64 {
    (d.as_nanos() * 90_000 / 1_000_000_000) as u64
}

/// Maps an [`Format`] clock rate to the ADTS `samplingFrequencyIndex`;
/// unknown rates fall back to 44.1kHz (`index 4`), matching common encoder
/// defaults, since `ts::wrap_adts` needs something to write.
#[must_use]
pub fn sampling_frequency_index(format: &Format) -> u8 {
    let rate = match format {
        Format::Mpeg4AudioGeneric { clock_rate, .. } | Format::Mpeg4AudioLatm { clock_rate, .. } => *clock_rate,
        _ => 44_100,
    };
    match rate {
        96_000 => 0,
        88_200 => 1,
        64_000 => 2,
        48_000 => 3,
        44_100 => 4,
        32_000 => 5,
        24_000 => 6,
        22_050 => 7,
        16_000 => 8,
        12_000 => 9,
        11_025 => 10,
        8_000 => 11,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_is_empty_before_first_segment() {
        let muxer = HlsMuxer {
            path_name: "cam1".into(),
            storage: Arc::new(crate::storage::MemoryStorage::new()),
            segments: RwLock::new(VecDeque::new()),
            media_sequence: RwLock::new(0),
            cancellation: CancellationToken::new(),
        };
        let playlist = muxer.playlist();
        assert!(playlist.contains("#EXTM3U"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:0"));
    }

    #[test]
    fn duration_conversion_round_trips_seconds() {
        assert_eq!(duration_to_90k(Duration::from_secs(1)), 90_000);
    }

    #[test]
    fn sampling_frequency_index_maps_known_rates() {
        let format = Format::Mpeg4AudioGeneric { payload_type: 97, clock_rate: 48_000, channel_count: 2, config: None };
        assert_eq!(sampling_frequency_index(&format), 3);
    }

    #[tokio::test]
    async fn segment_key_and_playlist_reflect_cut_segments() {
        let muxer = Arc::new(HlsMuxer {
            path_name: "cam1".into(),
            storage: Arc::new(crate::storage::MemoryStorage::new()),
            segments: RwLock::new(VecDeque::new()),
            media_sequence: RwLock::new(0),
            cancellation: CancellationToken::new(),
        });
        let mut buf = BytesMut::from(&b"tspayload"[..]);
        let mut sequence = 0u64;
        cut_segment(&mut buf, &mut sequence, Duration::from_secs(6), &muxer).await;
        assert_eq!(sequence, 1);
        assert!(muxer.segment_key(0).is_some());
        assert!(muxer.playlist().contains("0.ts"));
    }
}
