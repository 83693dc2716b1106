//! Stream fan-out engine (C2): one [`Stream`] per Ready path, holding the
//! immutable [`MediaDescription`] and a bounded, per-reader mpsc queue.
//!
//! Grounded in the teacher's `streamhub` pub/sub plumbing
//! (`StreamHubEventSender`/per-subscriber channels), replacing its open
//! `StreamHubEvent` enum and per-role trait objects with one closed
//! `MediaUnit` sum type and a single attach/detach surface (§9 design
//! note). The producer (path loop) never blocks on a reader: a full queue
//! evicts that reader instead of back-pressuring the publisher, per I2.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::format::FormatProcessor;
use crate::model::{MediaDescription, MediaUnit, Protocol, ReaderId};

/// Bounded per-reader queue depth. Matches `writeQueueSize` in the global
/// config by default but is set per-stream from that value.
const DEFAULT_QUEUE_SIZE: usize = 512;

struct ReaderSlot {
    sender: mpsc::Sender<Arc<MediaUnit>>,
    /// Video readers must not receive mid-GOP frames; gated until the first
    /// key frame is seen after attach.
    waiting_for_key_frame: bool,
    /// `None` for a synthetic reader (keepalive) that consumes nothing and
    /// must not count toward [`Stream::has_non_rtsp_readers`].
    protocol: Option<Protocol>,
}

/// The fan-out point for one Ready path: holds the negotiated
/// [`MediaDescription`], a [`FormatProcessor`] per track, and every
/// currently attached reader's queue.
pub struct Stream {
    description: MediaDescription,
    processors: Mutex<Vec<FormatProcessor>>,
    readers: Mutex<HashMap<ReaderId, ReaderSlot>>,
    next_reader_id: AtomicU64,
    queue_size: usize,
    closed: std::sync::atomic::AtomicBool,
}

impl Stream {
    /// `generate_rtp` is fixed for the lifetime of the stream: true when the
    /// path was admitted with at least one RTP-consuming protocol enabled
    /// globally, per the C2/C3 construction-time contract.
    #[must_use]
    pub fn new(description: MediaDescription, queue_size: Option<usize>, generate_rtp: bool) -> Self {
        let processors = description
            .medias
            .iter()
            .flat_map(|m| m.formats.iter().cloned())
            .map(|format| FormatProcessor::new(format, generate_rtp))
            .collect();
        Self {
            description,
            processors: Mutex::new(processors),
            readers: Mutex::new(HashMap::new()),
            next_reader_id: AtomicU64::new(1),
            queue_size: queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn description(&self) -> &MediaDescription {
        &self.description
    }

    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.readers.lock().len()
    }

    /// Attaches a new reader, returning its id and the receiving half of its
    /// queue. Video tracks are gated so the reader's first delivered unit
    /// contains a key frame, per the "freshly-attached reader" edge case.
    /// `protocol` is `None` for a synthetic (keepalive) reader; pass the
    /// driver's protocol for every real reader so
    /// [`Stream::has_non_rtsp_readers`] can gate depacketization correctly.
    pub fn add_reader(&self, protocol: Option<Protocol>) -> (ReaderId, mpsc::Receiver<Arc<MediaUnit>>) {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let id = self.next_reader_id.fetch_add(1, Ordering::Relaxed);
        self.readers.lock().insert(
            id,
            ReaderSlot {
                sender: tx,
                waiting_for_key_frame: true,
                protocol,
            },
        );
        (id, rx)
    }

    pub fn remove_reader(&self, id: ReaderId) -> Result<(), StreamError> {
        self.readers
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(StreamError::UnknownReader(id))
    }

    /// True when some currently-attached reader needs access units derived
    /// from RTP — i.e. any reader whose protocol is neither RTSP nor RTSPS
    /// (those readers already get RTP natively and never need depacketized
    /// output). Keepalive readers (`protocol: None`) never count.
    #[must_use]
    fn has_non_rtsp_readers(&self) -> bool {
        self.readers
            .lock()
            .values()
            .any(|slot| matches!(slot.protocol, Some(p) if !matches!(p, Protocol::Rtsp | Protocol::Rtsps)))
    }

    /// Runs `unit` through the owning track's [`FormatProcessor`] and fans
    /// the result out to every attached reader. A reader whose queue is
    /// full is evicted rather than allowed to stall the producer.
    pub fn write_unit(&self, unit: MediaUnit) -> Result<(), StreamError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed);
        }

        let media_index = unit.media_index;
        let requires_key_frame_gating = self
            .description
            .medias
            .get(media_index)
            .and_then(|m| m.formats.first())
            .map(|f| f.requires_key_frame_gating())
            .unwrap_or(false);

        let has_non_rtsp_readers = self.has_non_rtsp_readers();
        let processed = {
            let mut processors = self.processors.lock();
            let processor = processors
                .get_mut(media_index)
                .ok_or_else(|| StreamError::Format(crate::error::FormatError::UnsupportedCodec(
                    format!("no format processor for media index {media_index}"),
                )))?;
            processor.process(unit, has_non_rtsp_readers)?
        };
        let unit = Arc::new(processed);
        let is_key_frame = unit.contains_key_frame();

        let mut evicted = Vec::new();
        let mut readers = self.readers.lock();
        for (&id, slot) in readers.iter_mut() {
            if requires_key_frame_gating && slot.waiting_for_key_frame {
                if !is_key_frame {
                    continue;
                }
                slot.waiting_for_key_frame = false;
            }
            if slot.sender.try_send(unit.clone()).is_err() {
                evicted.push(id);
            }
        }
        for id in evicted {
            readers.remove(&id);
        }
        Ok(())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.readers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Format, Media, MediaKind, Protocol};
    use bytes::Bytes;
    use std::time::Duration;

    fn video_description() -> MediaDescription {
        MediaDescription::new(vec![Media {
            kind: MediaKind::Video,
            formats: vec![Format::H264 {
                payload_type: 96,
                clock_rate: 90_000,
                packetization_mode: 1,
                sps: None,
                pps: None,
            }],
        }])
    }

    fn unit(is_key_frame: bool) -> MediaUnit {
        MediaUnit {
            media_index: 0,
            pts: Duration::ZERO,
            ntp: None,
            rtp_packets: Vec::new(),
            access_units: vec![crate::model::AccessUnit {
                data: Bytes::from_static(&[0x65, 1, 2, 3]),
                is_key_frame,
            }],
        }
    }

    #[test]
    fn reader_does_not_receive_units_until_key_frame() {
        let stream = Stream::new(video_description(), None, true);
        let (_id, mut rx) = stream.add_reader(Some(Protocol::Rtmp));

        stream.write_unit(unit(false)).unwrap();
        assert!(rx.try_recv().is_err());

        stream.write_unit(unit(true)).unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn slow_reader_is_evicted_without_blocking_producer() {
        let stream = Stream::new(video_description(), Some(1), true);
        let (id, _rx) = stream.add_reader(Some(Protocol::Rtmp));

        stream.write_unit(unit(true)).unwrap();
        // Queue (capacity 1) is now full with an unread unit; this second
        // write must evict rather than block.
        stream.write_unit(unit(true)).unwrap();

        assert_eq!(stream.reader_count(), 0);
        assert!(stream.remove_reader(id).is_err());
    }

    #[test]
    fn write_after_close_fails() {
        let stream = Stream::new(video_description(), None, true);
        stream.close();
        assert!(matches!(stream.write_unit(unit(true)), Err(StreamError::Closed)));
    }

    /// Scenario S1: a publisher sends SPS/PPS once, then an IDR built from
    /// just the slice NAL; the reader must see `[sps, pps, slice]` with the
    /// tracked parameter sets re-injected ahead of the IDR.
    #[test]
    fn idr_is_preceded_by_tracked_sps_and_pps() {
        let stream = Stream::new(video_description(), None, true);
        let (_id, mut rx) = stream.add_reader(Some(Protocol::Rtmp));

        let params = MediaUnit {
            media_index: 0,
            pts: Duration::ZERO,
            ntp: None,
            rtp_packets: Vec::new(),
            access_units: vec![
                crate::model::AccessUnit { data: Bytes::from_static(&[7, 1, 2, 3]), is_key_frame: false },
                crate::model::AccessUnit { data: Bytes::from_static(&[8]), is_key_frame: false },
            ],
        };
        stream.write_unit(params).unwrap();
        // Not a key frame yet: the freshly-attached reader sees nothing.
        assert!(rx.try_recv().is_err());

        let idr = MediaUnit {
            media_index: 0,
            pts: Duration::from_millis(40),
            ntp: None,
            rtp_packets: Vec::new(),
            access_units: vec![crate::model::AccessUnit {
                data: Bytes::from_static(&[0x05, 0x02, 0x03, 0x04]),
                is_key_frame: true,
            }],
        };
        stream.write_unit(idr).unwrap();

        let delivered = rx.try_recv().unwrap();
        let nals: Vec<&[u8]> = delivered.access_units.iter().map(|au| &au.data[..]).collect();
        assert_eq!(nals, vec![&[7, 1, 2, 3][..], &[8][..], &[0x05, 0x02, 0x03, 0x04][..]]);
    }

    #[test]
    fn keepalive_reader_does_not_count_as_non_rtsp() {
        let stream = Stream::new(video_description(), None, true);
        assert!(!stream.has_non_rtsp_readers());

        let (_keepalive_id, _rx) = stream.add_reader(None);
        assert!(!stream.has_non_rtsp_readers());

        let (_rtsp_id, _rx2) = stream.add_reader(Some(Protocol::Rtsp));
        assert!(!stream.has_non_rtsp_readers());

        let (_rtmp_id, _rx3) = stream.add_reader(Some(Protocol::Rtmp));
        assert!(stream.has_non_rtsp_readers());
    }
}
