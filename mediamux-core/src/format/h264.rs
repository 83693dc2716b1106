//! H264 parameter-set tracking and re-injection: watches access units as
//! they pass through the processor, records the most recent SPS/PPS, strips
//! SPS/PPS/AUD NAL units out of the outbound stream, and re-injects the
//! currently tracked SPS/PPS immediately before every IDR (§4.2's RTP remux
//! rules, exercised by scenario S1 and property P8).

use crate::model::{AccessUnit, Format};

const NAL_TYPE_SLICE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_AUD: u8 = 9;

fn nal_type(au: &AccessUnit) -> Option<u8> {
    au.data.first().map(|b| b & 0x1f)
}

/// Updates the tracked SPS/PPS in `format` from any parameter-set NALs
/// present in `access_units`. A new SPS/PPS on the wire atomically replaces
/// the tracked copy so the next `process` reflects it.
pub fn track_parameter_sets(format: &mut Format, access_units: &[AccessUnit]) {
    let Format::H264 { sps, pps, .. } = format else {
        return;
    };
    for au in access_units {
        match nal_type(au) {
            Some(NAL_TYPE_SPS) => *sps = Some(au.data.clone()),
            Some(NAL_TYPE_PPS) => *pps = Some(au.data.clone()),
            _ => {}
        }
    }
}

/// Strips SPS/PPS/AUD NAL units from `access_units` and re-injects the
/// currently tracked SPS/PPS (if any) immediately before every IDR slice,
/// per the RTP remux rules in §4.2. Must run after [`track_parameter_sets`]
/// so a freshly-seen SPS/PPS is available for injection in the same unit.
#[must_use]
pub fn reinject_parameter_sets(format: &Format, access_units: Vec<AccessUnit>) -> Vec<AccessUnit> {
    let Format::H264 { sps, pps, .. } = format else {
        return access_units;
    };
    let mut out = Vec::with_capacity(access_units.len() + 2);
    for au in access_units {
        match nal_type(&au) {
            Some(NAL_TYPE_SPS | NAL_TYPE_PPS | NAL_TYPE_AUD) => continue,
            Some(NAL_TYPE_SLICE_IDR) => {
                if let Some(sps) = sps {
                    out.push(AccessUnit { data: sps.clone(), is_key_frame: false });
                }
                if let Some(pps) = pps {
                    out.push(AccessUnit { data: pps.clone(), is_key_frame: false });
                }
                out.push(au);
            }
            _ => out.push(au),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn format_with(sps: Option<&[u8]>, pps: Option<&[u8]>) -> Format {
        Format::H264 {
            payload_type: 96,
            clock_rate: 90_000,
            packetization_mode: 1,
            sps: sps.map(Bytes::copy_from_slice),
            pps: pps.map(Bytes::copy_from_slice),
        }
    }

    #[test]
    fn tracks_most_recent_sps_and_pps() {
        let mut format = format_with(None, None);
        let sps_nal = AccessUnit { data: Bytes::from_static(&[0x67, 1, 2]), is_key_frame: false };
        let pps_nal = AccessUnit { data: Bytes::from_static(&[0x68, 3, 4]), is_key_frame: false };
        track_parameter_sets(&mut format, &[sps_nal, pps_nal]);

        if let Format::H264 { sps, pps, .. } = &format {
            assert_eq!(sps.as_deref(), Some(&[0x67, 1, 2][..]));
            assert_eq!(pps.as_deref(), Some(&[0x68, 3, 4][..]));
        } else {
            panic!("expected H264 format");
        }
    }

    #[test]
    fn strips_sps_pps_aud_and_reinjects_before_idr() {
        let format = format_with(Some(&[0x67, 1, 2, 3]), Some(&[0x68, 8]));
        let aud = AccessUnit { data: Bytes::from_static(&[0x09, 0xf0]), is_key_frame: false };
        let wire_sps = AccessUnit { data: Bytes::from_static(&[0x67, 9, 9]), is_key_frame: false };
        let wire_pps = AccessUnit { data: Bytes::from_static(&[0x68, 9]), is_key_frame: false };
        let idr = AccessUnit { data: Bytes::from_static(&[0x65, 2, 3, 4]), is_key_frame: true };

        let out = reinject_parameter_sets(&format, vec![aud, wire_sps, wire_pps, idr.clone()]);

        assert_eq!(out.len(), 3);
        assert_eq!(&out[0].data[..], &[0x67, 1, 2, 3]);
        assert_eq!(&out[1].data[..], &[0x68, 8]);
        assert_eq!(&out[2].data[..], &idr.data[..]);
    }

    #[test]
    fn non_idr_slice_passes_through_unmodified() {
        let format = format_with(Some(&[0x67]), Some(&[0x68]));
        let p_slice = AccessUnit { data: Bytes::from_static(&[0x61, 1, 2]), is_key_frame: false };
        let out = reinject_parameter_sets(&format, vec![p_slice.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &p_slice.data[..]);
    }

    #[test]
    fn idr_without_tracked_parameter_sets_passes_through_alone() {
        let format = format_with(None, None);
        let idr = AccessUnit { data: Bytes::from_static(&[0x65, 1]), is_key_frame: true };
        let out = reinject_parameter_sets(&format, vec![idr.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &idr.data[..]);
    }
}
