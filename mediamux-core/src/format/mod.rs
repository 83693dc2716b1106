//! Format processor (C3): per-codec parameter-set tracking, RTP
//! packetization/depacketization, and timestamp rebasing.
//!
//! Grounded in the teacher's `mpeg4_avc`/`mpeg4_aac` processors (parameter
//! set extraction ahead of payload access) generalized into the closed
//! [`crate::model::Format`] sum type instead of per-codec dynamic dispatch
//! (§9 design note). One [`FormatProcessor`] is owned per [`Media`] track by
//! the [`crate::stream::Stream`] that carries it.

mod av1;
mod h264;
mod h265;
mod rtp;

use bytes::Bytes;
use std::time::Duration;

use crate::error::FormatError;
use crate::model::{AccessUnit, Format, MediaUnit, RtpPacket};

pub use rtp::MAX_RTP_PAYLOAD_SIZE;

/// Tracks codec-specific state (parameter sets) and rebases timestamps for
/// one track across its lifetime, converting between RTP packets and access
/// units in whichever direction a [`crate::model::MediaUnit`] is missing.
pub struct FormatProcessor {
    format: Format,
    first_pts: Option<Duration>,
    sequence_number: u16,
    clock_rate: u32,
    generate_rtp: bool,
}

impl FormatProcessor {
    /// `generate_rtp` is a construction-time decision — true when the path
    /// has at least one reader kind that consumes RTP (RTSP excluded, since
    /// RTSP readers already get access units depacketized on demand). It
    /// does not change once a publisher's stream is built; new readers
    /// joining later ride whichever side was already being produced.
    #[must_use]
    pub fn new(format: Format, generate_rtp: bool) -> Self {
        let clock_rate = clock_rate_of(&format);
        Self {
            format,
            first_pts: None,
            sequence_number: 0,
            clock_rate,
            generate_rtp,
        }
    }

    #[must_use]
    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Rebase `pts` so the first unit ever processed for this track reports
    /// zero, per the PTS/DTS rebasing rule.
    fn rebase(&mut self, pts: Duration) -> Duration {
        let first = *self.first_pts.get_or_insert(pts);
        pts.saturating_sub(first)
    }

    /// Normalizes an incoming unit: rebases its timestamp, fills in
    /// whichever side (RTP packets or access units) is empty, and tracks
    /// and strips/re-injects each codec's parameter sets per the RTP remux
    /// rules (§4.2, scenario S1, property P8).
    ///
    /// `has_non_rtsp_readers` gates depacketization: access units are only
    /// derived from RTP when some currently-attached reader actually wants
    /// them (an RTSP-only path never needs them). Packetization is gated
    /// separately by `generate_rtp`, fixed at construction time.
    pub fn process(&mut self, mut unit: MediaUnit, has_non_rtsp_readers: bool) -> Result<MediaUnit, FormatError> {
        unit.pts = self.rebase(unit.pts);

        if has_non_rtsp_readers && unit.access_units.is_empty() && !unit.rtp_packets.is_empty() {
            unit.access_units = self.depacketize(&unit.rtp_packets)?;
        }

        match &self.format {
            Format::H264 { .. } => {
                h264::track_parameter_sets(&mut self.format, &unit.access_units);
                let access_units = std::mem::take(&mut unit.access_units);
                unit.access_units = h264::reinject_parameter_sets(&self.format, access_units);
            }
            Format::H265 { .. } => {
                h265::track_parameter_sets(&mut self.format, &unit.access_units);
                let access_units = std::mem::take(&mut unit.access_units);
                unit.access_units = h265::reinject_parameter_sets(&self.format, access_units);
            }
            Format::Av1 { .. } => {
                av1::track_parameter_sets(&mut self.format, &unit.access_units);
                let access_units = std::mem::take(&mut unit.access_units);
                unit.access_units = av1::reinject_parameter_sets(&self.format, access_units);
            }
            _ => {}
        }

        if self.generate_rtp && unit.rtp_packets.is_empty() && !unit.access_units.is_empty() {
            unit.rtp_packets = self.packetize(&unit.access_units, unit.timestamp_ticks())?;
        }

        Ok(unit)
    }

    /// Converts access units into RTP packets, fragmenting with FU-A when a
    /// NAL unit exceeds [`MAX_RTP_PAYLOAD_SIZE`].
    pub fn packetize(
        &mut self,
        access_units: &[AccessUnit],
        rtp_timestamp: u32,
    ) -> Result<Vec<RtpPacket>, FormatError> {
        let mut packets = Vec::new();
        for (i, au) in access_units.iter().enumerate() {
            let is_last_au = i == access_units.len() - 1;
            let fragments = match &self.format {
                Format::H264 { .. } | Format::H265 { .. } => rtp::fragment_fu_a(&au.data)?,
                _ => rtp::fragment_generic(&au.data)?,
            };
            let last_index = fragments.len() - 1;
            for (j, payload) in fragments.into_iter().enumerate() {
                let marker = is_last_au && j == last_index;
                packets.push(RtpPacket {
                    marker,
                    sequence_number: self.next_sequence_number(),
                    timestamp: rtp_timestamp,
                    payload,
                });
            }
        }
        Ok(packets)
    }

    /// Reassembles FU-A fragmented NAL units (or passes single-packet
    /// payloads through) into access units, flagging key frames via
    /// [`Format::requires_key_frame_gating`] semantics.
    pub fn depacketize(&mut self, packets: &[RtpPacket]) -> Result<Vec<AccessUnit>, FormatError> {
        match &self.format {
            Format::H264 { .. } | Format::H265 { .. } => rtp::reassemble_fu_a(packets),
            _ => rtp::reassemble_generic(packets),
        }
    }

    fn next_sequence_number(&mut self) -> u16 {
        let seq = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        seq
    }
}

trait TimestampTicks {
    fn timestamp_ticks(&self) -> u32;
}

impl TimestampTicks for MediaUnit {
    fn timestamp_ticks(&self) -> u32 {
        (self.pts.as_secs_f64() * 90_000.0) as u32
    }
}

fn clock_rate_of(format: &Format) -> u32 {
    match format {
        Format::H264 { clock_rate, .. }
        | Format::H265 { clock_rate, .. }
        | Format::Av1 { clock_rate, .. }
        | Format::Vp8 { clock_rate, .. }
        | Format::Vp9 { clock_rate, .. }
        | Format::Mpeg4AudioGeneric { clock_rate, .. }
        | Format::Mpeg4AudioLatm { clock_rate, .. }
        | Format::Mpeg1Or2Audio { clock_rate, .. }
        | Format::Opus { clock_rate, .. }
        | Format::GenericRtp { clock_rate, .. } => *clock_rate,
    }
}

/// Annexed NAL unit scanner used both by [`h264`] parameter-set tracking and
/// by drivers that receive Annex-B bytestreams (`00 00 00 01` / `00 00 01`
/// start codes) instead of length-prefixed NAL units.
#[must_use]
pub fn split_annex_b(data: &Bytes) -> Vec<Bytes> {
    // (offset of the start code itself, offset right after it)
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if i + 4 <= data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 0 && data[i + 3] == 1 {
            starts.push((i, i + 4));
            i += 4;
        } else if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }
    let mut nalus = Vec::with_capacity(starts.len());
    for w in 0..starts.len() {
        let (_, content_start) = starts[w];
        let end = starts.get(w + 1).map_or(data.len(), |&(next_code_start, _)| next_code_start);
        if end > content_start {
            nalus.push(data.slice(content_start..end));
        }
    }
    nalus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RtpPacket;

    fn h264_format() -> Format {
        Format::H264 {
            payload_type: 96,
            clock_rate: 90_000,
            packetization_mode: 1,
            sps: None,
            pps: None,
        }
    }

    #[test]
    fn rebases_first_pts_to_zero() {
        let mut proc = FormatProcessor::new(h264_format(), true);
        let first = proc.rebase(Duration::from_secs(10));
        let second = proc.rebase(Duration::from_millis(10_040));
        assert_eq!(first, Duration::ZERO);
        assert_eq!(second, Duration::from_millis(40));
    }

    #[test]
    fn small_access_unit_round_trips_through_rtp() {
        let mut proc = FormatProcessor::new(h264_format(), true);
        let au = AccessUnit {
            data: Bytes::from_static(&[0x67, 1, 2, 3]),
            is_key_frame: true,
        };
        let packets = proc.packetize(&[au.clone()], 1000).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(packets[0].marker);

        let back = proc.depacketize(&packets).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(&back[0].data[..], &au.data[..]);
    }

    #[test]
    fn oversized_access_unit_fragments_with_fu_a() {
        let mut proc = FormatProcessor::new(h264_format(), true);
        let big = Bytes::from(vec![0x65u8; MAX_RTP_PAYLOAD_SIZE * 2 + 10]);
        let au = AccessUnit { data: big.clone(), is_key_frame: true };
        let packets = proc.packetize(&[au], 1000).unwrap();
        assert!(packets.len() > 1);
        assert!(packets.last().unwrap().marker);

        let back = proc.depacketize(&packets).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].data.len(), big.len());
    }

    #[test]
    fn splits_annex_b_start_codes() {
        let data = Bytes::from_static(&[0, 0, 0, 1, 0x67, 0xaa, 0, 0, 1, 0x68, 0xbb, 0xcc]);
        let nalus = split_annex_b(&data);
        assert_eq!(nalus.len(), 2);
        assert_eq!(&nalus[0][..], &[0x67, 0xaa]);
        assert_eq!(&nalus[1][..], &[0x68, 0xbb, 0xcc]);
    }

    #[test]
    fn rtp_packets_without_access_units_get_depacketized_on_process() {
        let mut proc = FormatProcessor::new(h264_format(), true);
        let packet = RtpPacket {
            marker: true,
            sequence_number: 1,
            timestamp: 0,
            payload: Bytes::from_static(&[0x65, 1, 2, 3]),
        };
        let unit = MediaUnit {
            media_index: 0,
            pts: Duration::ZERO,
            ntp: None,
            rtp_packets: vec![packet],
            access_units: Vec::new(),
        };
        let processed = proc.process(unit, true).unwrap();
        assert_eq!(processed.access_units.len(), 1);
    }

    #[test]
    fn depacketize_is_skipped_without_a_non_rtsp_reader() {
        let mut proc = FormatProcessor::new(h264_format(), true);
        let packet = RtpPacket {
            marker: true,
            sequence_number: 1,
            timestamp: 0,
            payload: Bytes::from_static(&[0x65, 1, 2, 3]),
        };
        let unit = MediaUnit {
            media_index: 0,
            pts: Duration::ZERO,
            ntp: None,
            rtp_packets: vec![packet],
            access_units: Vec::new(),
        };
        let processed = proc.process(unit, false).unwrap();
        assert!(processed.access_units.is_empty());
    }

    #[test]
    fn packetize_is_skipped_when_generate_rtp_is_false() {
        let mut proc = FormatProcessor::new(h264_format(), false);
        let au = AccessUnit { data: Bytes::from_static(&[0x67, 1, 2, 3]), is_key_frame: true };
        let unit = MediaUnit {
            media_index: 0,
            pts: Duration::ZERO,
            ntp: None,
            rtp_packets: Vec::new(),
            access_units: vec![au],
        };
        let processed = proc.process(unit, true).unwrap();
        assert!(processed.rtp_packets.is_empty());
    }
}
