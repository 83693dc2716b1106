//! MPEG-TS packetization for HLS segments (ISO 13818-1).
//!
//! Grounded in the teacher's `bytesio::writer::BytesWriter` for big-endian
//! field encoding; the PAT/PMT/PES layout is a from-scratch minimal encoder
//! since the retrieved sample had no TS muxer of its own — single video (PID
//! `0x101`, H264) plus single audio (PID `0x102`, AAC) program, matching the
//! one-video/one-audio-track ceiling the core's [`crate::rtmp`] driver
//! already assumes.

use bytes::{Bytes, BytesMut};

use crate::bytesio::writer::BytesWriter;

pub const TS_PACKET_SIZE: usize = 188;
const PAT_PID: u16 = 0x0000;
const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x0101;
pub const AUDIO_PID: u16 = 0x0102;
const PROGRAM_NUMBER: u16 = 1;
const STREAM_TYPE_H264: u8 = 0x1b;
const STREAM_TYPE_AAC_ADTS: u8 = 0x0f;

/// Rolling continuity counters and PCR base, one per elementary PID plus the
/// PSI tables. A fresh one is created per segment boundary by the segmenter
/// (continuity is only required to be monotonic within a segment's PIDs, not
/// across the whole stream, for the player compatibility this targets).
#[derive(Default)]
pub struct TsMuxer {
    pat_cc: u8,
    pmt_cc: u8,
    video_cc: u8,
    audio_cc: u8,
    has_audio: bool,
}

impl TsMuxer {
    #[must_use]
    pub fn new(has_audio: bool) -> Self {
        Self { has_audio, ..Self::default() }
    }

    /// Writes PAT + PMT, then one video access unit as PES, advancing the
    /// PCR/continuity counters in place. Called once per access unit by the
    /// segmenter; PAT/PMT are repeated before every keyframe so a mid-segment
    /// joiner (or a player retrying a stalled GET) can resync.
    pub fn write_video_unit(&mut self, out: &mut BytesMut, pts_90k: u64, dts_90k: u64, is_key_frame: bool, annex_b: &[u8], with_psi: bool) {
        if with_psi {
            self.write_pat(out);
            self.write_pmt(out);
        }
        let pcr = if is_key_frame { Some(pts_90k) } else { None };
        self.write_pes(out, VIDEO_PID, 0xe0, Some(pts_90k), Some(dts_90k), pcr, annex_b);
    }

    pub fn write_audio_unit(&mut self, out: &mut BytesMut, pts_90k: u64, adts_frame: &[u8]) {
        self.write_pes(out, AUDIO_PID, 0xc0, Some(pts_90k), None, None, adts_frame);
    }

    fn write_pat(&mut self, out: &mut BytesMut) {
        let mut section = BytesWriter::new();
        let _ = section.write_u16_be(PROGRAM_NUMBER);
        let _ = section.write_u16_be(0xe000 | PMT_PID);
        let mut psi = psi_section(0x00, PROGRAM_NUMBER, &section.extract_current_bytes());
        let cc = self.pat_cc;
        self.pat_cc = self.pat_cc.wrapping_add(1) & 0x0f;
        write_psi_packet(out, PAT_PID, cc, &mut psi);
    }

    fn write_pmt(&mut self, out: &mut BytesMut) {
        let mut section = BytesWriter::new();
        let _ = section.write_u16_be(0xe000 | VIDEO_PID); // PCR_PID = video
        let _ = section.write_u16_be(0xf000); // program_info_length = 0
        let _ = section.write_u8(STREAM_TYPE_H264);
        let _ = section.write_u16_be(0xe000 | VIDEO_PID);
        let _ = section.write_u16_be(0xf000);
        if self.has_audio {
            let _ = section.write_u8(STREAM_TYPE_AAC_ADTS);
            let _ = section.write_u16_be(0xe000 | AUDIO_PID);
            let _ = section.write_u16_be(0xf000);
        }
        let mut psi = psi_section(0x02, PROGRAM_NUMBER, &section.extract_current_bytes());
        let cc = self.pmt_cc;
        self.pmt_cc = self.pmt_cc.wrapping_add(1) & 0x0f;
        write_psi_packet(out, PMT_PID, cc, &mut psi);
    }

    #[allow(clippy::too_many_arguments)]
    fn write_pes(
        &mut self,
        out: &mut BytesMut,
        pid: u16,
        stream_id: u8,
        pts_90k: Option<u64>,
        dts_90k: Option<u64>,
        pcr_90k: Option<u64>,
        payload: &[u8],
    ) {
        let mut pes = BytesWriter::new();
        let _ = pes.write_u24_be(0x000001);
        let _ = pes.write_u8(stream_id);
        let has_dts = dts_90k.is_some() && dts_90k != pts_90k;
        let flags_byte = if has_dts { 0xc0 } else { 0x80 };
        let header_len = if has_dts { 10 } else { 5 };
        let pes_len = payload.len() + header_len + 3;
        let _ = pes.write_u16_be(if pes_len > 0xffff { 0 } else { pes_len as u16 });
        let _ = pes.write_u8(0x80);
        let _ = pes.write_u8(flags_byte);
        let _ = pes.write_u8(header_len as u8);
        if let Some(pts) = pts_90k {
            write_pts_dts(&mut pes, if has_dts { 0x3 } else { 0x2 }, pts);
        }
        if has_dts {
            if let Some(dts) = dts_90k {
                write_pts_dts(&mut pes, 0x1, dts);
            }
        }
        let _ = pes.write(payload);
        let body = pes.extract_current_bytes();

        let cc = if pid == VIDEO_PID { &mut self.video_cc } else { &mut self.audio_cc };
        write_ts_packets(out, pid, cc, true, pcr_90k, &body);
    }
}

fn write_pts_dts(w: &mut BytesWriter, marker: u8, ts: u64) {
    let ts = ts & 0x1_ffff_ffff;
    let b0 = (marker << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 1;
    let b1b2 = (((ts >> 15) & 0x7fff) << 1) | 1;
    let b3b4 = ((ts & 0x7fff) << 1) | 1;
    let _ = w.write_u8(b0);
    let _ = w.write_u16_be(b1b2 as u16);
    let _ = w.write_u16_be(b3b4 as u16);
}

fn psi_section(table_id: u8, program_number: u16, body: &Bytes) -> BytesMut {
    let mut w = BytesWriter::new();
    let _ = w.write_u8(table_id);
    let section_length = body.len() as u16 + 5 + 4; // + fixed fields + crc
    let _ = w.write_u16_be(0xb000 | section_length);
    let _ = w.write_u16_be(program_number);
    let _ = w.write_u8(0xc1); // version 0, current_next_indicator = 1
    let _ = w.write_u8(0x00); // section_number
    let _ = w.write_u8(0x00); // last_section_number
    let _ = w.write(body);
    let mut section = w.extract_current_bytes();
    let crc = crc32_mpeg2(&section);
    let mut full = BytesMut::from(&section[..]);
    full.extend_from_slice(&crc.to_be_bytes());
    section = full;
    BytesMut::from(&section[..])
}

fn write_psi_packet(out: &mut BytesMut, pid: u16, mut cc: u8, section: &mut BytesMut) {
    let mut payload = BytesMut::with_capacity(section.len() + 1);
    payload.extend_from_slice(&[0x00]); // pointer_field
    payload.extend_from_slice(section);
    write_ts_packets(out, pid, &mut cc, true, None, &payload);
}

/// Splits `payload` across as many 188-byte TS packets as needed, laying
/// down the 4-byte header (+ adaptation field on the first packet carrying a
/// PCR, and as stuffing on the final packet to pad to the boundary).
fn write_ts_packets(out: &mut BytesMut, pid: u16, cc: &mut u8, payload_unit_start: bool, pcr_90k: Option<u64>, payload: &[u8]) {
    let mut offset = 0usize;
    let mut first = true;
    while offset < payload.len() || first {
        let mut packet = [0u8; TS_PACKET_SIZE];
        packet[0] = 0x47;
        let pusi_bit = if first && payload_unit_start { 0x40 } else { 0x00 };
        packet[1] = pusi_bit | ((pid >> 8) as u8 & 0x1f);
        packet[2] = (pid & 0xff) as u8;

        let remaining = payload.len() - offset;
        let pcr_here = if first { pcr_90k } else { None };
        let want_adaptation = pcr_here.is_some() || remaining < TS_PACKET_SIZE - 4;

        let mut header_len = 4;
        if want_adaptation {
            let adaptation_len = if pcr_here.is_some() { 7 } else { 0 };
            let space_for_payload = TS_PACKET_SIZE - 4 - 1 - adaptation_len;
            let take = remaining.min(space_for_payload);
            let stuffing = space_for_payload - take;
            let af_len = 1 + adaptation_len + stuffing;

            packet[3] = 0x10 | 0x20 | (*cc & 0x0f);
            packet[4] = af_len as u8;
            let mut flags = 0u8;
            if pcr_here.is_some() {
                flags |= 0x10;
            }
            packet[5] = flags;
            let mut p = 6;
            if let Some(pcr) = pcr_here {
                let base = pcr & 0x1_ffff_ffff;
                let ext: u16 = 0;
                packet[p] = (base >> 25) as u8;
                packet[p + 1] = (base >> 17) as u8;
                packet[p + 2] = (base >> 9) as u8;
                packet[p + 3] = (base >> 1) as u8;
                packet[p + 4] = (((base & 1) as u8) << 7) | 0x7e | ((ext >> 8) as u8 & 1);
                packet[p + 5] = (ext & 0xff) as u8;
                p += 6;
            }
            for b in packet.iter_mut().skip(p).take(stuffing) {
                *b = 0xff;
            }
            header_len = 4 + af_len;
            packet[header_len..header_len + take].copy_from_slice(&payload[offset..offset + take]);
            offset += take;
        } else {
            packet[3] = 0x10 | (*cc & 0x0f);
            let take = remaining.min(TS_PACKET_SIZE - 4);
            packet[4..4 + take].copy_from_slice(&payload[offset..offset + take]);
            offset += take;
        }
        *cc = cc.wrapping_add(1) & 0x0f;
        out.extend_from_slice(&packet);
        first = false;
    }
}

/// CRC-32/MPEG-2 (poly `0x04C11DB7`, no reflection, init `0xFFFFFFFF`) as
/// required for PSI section trailers.
fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xffff_ffff;
    for &byte in data {
        crc ^= u32::from(byte) << 24;
        for _ in 0..8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04c1_1db7;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Wraps a raw ADTS-less AAC frame in its ADTS header so players that parse
/// TS audio as ADTS (rather than LATM) can decode it.
#[must_use]
pub fn wrap_adts(aac_frame: &[u8], sample_rate_index: u8, channel_config: u8) -> Bytes {
    let frame_len = aac_frame.len() + 7;
    let mut header = [0u8; 7];
    header[0] = 0xff;
    header[1] = 0xf1; // MPEG-4, no CRC
    header[2] = (0b01 << 6) | ((sample_rate_index & 0x0f) << 2) | ((channel_config >> 2) & 0x01);
    header[3] = ((channel_config & 0x03) << 6) | ((frame_len >> 11) as u8 & 0x03);
    header[4] = ((frame_len >> 3) & 0xff) as u8;
    header[5] = (((frame_len & 0x07) as u8) << 5) | 0x1f;
    header[6] = 0xfc;
    let mut out = BytesMut::with_capacity(frame_len);
    out.extend_from_slice(&header);
    out.extend_from_slice(aac_frame);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_unit_with_psi_starts_with_pat_sync_byte() {
        let mut muxer = TsMuxer::new(false);
        let mut out = BytesMut::new();
        muxer.write_video_unit(&mut out, 90_000, 90_000, true, &[0, 0, 0, 1, 0x65, 1, 2, 3], true);
        assert_eq!(out[0], 0x47);
        assert_eq!(out.len() % TS_PACKET_SIZE, 0);
    }

    #[test]
    fn pat_pmt_packets_have_expected_pids() {
        let mut muxer = TsMuxer::new(true);
        let mut out = BytesMut::new();
        muxer.write_video_unit(&mut out, 0, 0, true, &[1, 2, 3], true);
        let pat_pid = (u16::from(out[1] & 0x1f) << 8) | u16::from(out[2]);
        assert_eq!(pat_pid, PAT_PID);
        let pmt_pid = (u16::from(out[188 + 1] & 0x1f) << 8) | u16::from(out[188 + 2]);
        assert_eq!(pmt_pid, PMT_PID);
    }

    #[test]
    fn crc32_matches_known_vector() {
        assert_eq!(crc32_mpeg2(b""), 0xffff_ffff);
    }

    #[test]
    fn wrap_adts_sets_sync_word() {
        let wrapped = wrap_adts(&[0xaa, 0xbb], 4, 2);
        assert_eq!(wrapped[0], 0xff);
        assert_eq!(wrapped[1] & 0xf0, 0xf0);
        assert_eq!(wrapped.len(), 9);
    }
}
