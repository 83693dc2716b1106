//! H265 parameter-set tracking and re-injection: mirrors [`super::h264`] for
//! HEVC's wider parameter-set family (VPS/SPS/PPS) and two IDR NAL types.

use crate::model::{AccessUnit, Format};

const NAL_TYPE_IDR_W_RADL: u8 = 19;
const NAL_TYPE_IDR_N_LP: u8 = 20;
const NAL_TYPE_VPS: u8 = 32;
const NAL_TYPE_SPS: u8 = 33;
const NAL_TYPE_PPS: u8 = 34;
const NAL_TYPE_AUD: u8 = 35;

fn nal_type(au: &AccessUnit) -> Option<u8> {
    au.data.first().map(|b| (b >> 1) & 0x3f)
}

fn is_idr(nal_type: u8) -> bool {
    matches!(nal_type, NAL_TYPE_IDR_W_RADL | NAL_TYPE_IDR_N_LP)
}

/// Updates the tracked VPS/SPS/PPS in `format` from any parameter-set NALs
/// present in `access_units`, same replace-on-sight rule as H264.
pub fn track_parameter_sets(format: &mut Format, access_units: &[AccessUnit]) {
    let Format::H265 { vps, sps, pps, .. } = format else {
        return;
    };
    for au in access_units {
        match nal_type(au) {
            Some(NAL_TYPE_VPS) => *vps = Some(au.data.clone()),
            Some(NAL_TYPE_SPS) => *sps = Some(au.data.clone()),
            Some(NAL_TYPE_PPS) => *pps = Some(au.data.clone()),
            _ => {}
        }
    }
}

/// Strips VPS/SPS/PPS/AUD NAL units and re-injects the currently tracked
/// VPS/SPS/PPS immediately before every IDR slice (types 19 and 20).
#[must_use]
pub fn reinject_parameter_sets(format: &Format, access_units: Vec<AccessUnit>) -> Vec<AccessUnit> {
    let Format::H265 { vps, sps, pps, .. } = format else {
        return access_units;
    };
    let mut out = Vec::with_capacity(access_units.len() + 3);
    for au in access_units {
        match nal_type(&au) {
            Some(NAL_TYPE_VPS | NAL_TYPE_SPS | NAL_TYPE_PPS | NAL_TYPE_AUD) => continue,
            Some(t) if is_idr(t) => {
                if let Some(vps) = vps {
                    out.push(AccessUnit { data: vps.clone(), is_key_frame: false });
                }
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

    fn format_with(vps: Option<&[u8]>, sps: Option<&[u8]>, pps: Option<&[u8]>) -> Format {
        Format::H265 {
            payload_type: 98,
            clock_rate: 90_000,
            vps: vps.map(Bytes::copy_from_slice),
            sps: sps.map(Bytes::copy_from_slice),
            pps: pps.map(Bytes::copy_from_slice),
        }
    }

    fn nal(first_byte: u8, rest: &[u8]) -> AccessUnit {
        let mut data = vec![first_byte, 0x01];
        data.extend_from_slice(rest);
        AccessUnit { data: Bytes::from(data), is_key_frame: false }
    }

    #[test]
    fn tracks_most_recent_vps_sps_pps() {
        let mut format = format_with(None, None, None);
        let vps_nal = nal(32 << 1, &[1, 2]);
        let sps_nal = nal(33 << 1, &[3, 4]);
        let pps_nal = nal(34 << 1, &[5, 6]);
        track_parameter_sets(&mut format, &[vps_nal.clone(), sps_nal.clone(), pps_nal.clone()]);

        if let Format::H265 { vps, sps, pps, .. } = &format {
            assert_eq!(vps.as_deref(), Some(&vps_nal.data[..]));
            assert_eq!(sps.as_deref(), Some(&sps_nal.data[..]));
            assert_eq!(pps.as_deref(), Some(&pps_nal.data[..]));
        } else {
            panic!("expected H265 format");
        }
    }

    #[test]
    fn strips_parameter_sets_aud_and_reinjects_before_both_idr_types() {
        let format = format_with(Some(&[1]), Some(&[2]), Some(&[3]));
        let aud = nal(35 << 1, &[0xf0]);
        let idr_w_radl = AccessUnit { data: Bytes::from_static(&[19 << 1, 0x01, 2, 3]), is_key_frame: true };
        let idr_n_lp = AccessUnit { data: Bytes::from_static(&[20 << 1, 0x01, 4, 5]), is_key_frame: true };

        let out = reinject_parameter_sets(&format, vec![aud, idr_w_radl.clone(), idr_n_lp.clone()]);

        assert_eq!(out.len(), 8);
        assert_eq!(&out[0].data[..], &[1]);
        assert_eq!(&out[1].data[..], &[2]);
        assert_eq!(&out[2].data[..], &[3]);
        assert_eq!(&out[3].data[..], &idr_w_radl.data[..]);
        assert_eq!(&out[7].data[..], &idr_n_lp.data[..]);
    }

    #[test]
    fn non_idr_slice_passes_through_unmodified() {
        let format = format_with(Some(&[1]), Some(&[2]), Some(&[3]));
        let trail = AccessUnit { data: Bytes::from_static(&[1 << 1, 0x01, 9]), is_key_frame: false };
        let out = reinject_parameter_sets(&format, vec![trail.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &trail.data[..]);
    }
}
