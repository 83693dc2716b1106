//! AV1 sequence-header tracking and re-injection: the OBU analogue of
//! [`super::h264`]'s SPS/PPS handling. AV1 carries a single self-describing
//! OBU (`OBU_SEQUENCE_HEADER`) instead of H264's SPS/PPS pair; it is tracked
//! and re-injected ahead of every key frame the same way.

use crate::model::{AccessUnit, Format};

const OBU_SEQUENCE_HEADER: u8 = 1;

fn obu_type(au: &AccessUnit) -> Option<u8> {
    au.data.first().map(|b| (b >> 3) & 0x0f)
}

/// Updates the tracked sequence header in `format` from any
/// `OBU_SEQUENCE_HEADER` present in `access_units`.
pub fn track_parameter_sets(format: &mut Format, access_units: &[AccessUnit]) {
    let Format::Av1 { sequence_header, .. } = format else {
        return;
    };
    for au in access_units {
        if obu_type(au) == Some(OBU_SEQUENCE_HEADER) {
            *sequence_header = Some(au.data.clone());
        }
    }
}

/// Strips sequence-header OBUs from `access_units` and re-injects the
/// currently tracked one immediately before every key frame.
#[must_use]
pub fn reinject_parameter_sets(format: &Format, access_units: Vec<AccessUnit>) -> Vec<AccessUnit> {
    let Format::Av1 { sequence_header, .. } = format else {
        return access_units;
    };
    let mut out = Vec::with_capacity(access_units.len() + 1);
    for au in access_units {
        if obu_type(&au) == Some(OBU_SEQUENCE_HEADER) {
            continue;
        }
        if au.is_key_frame {
            if let Some(seq) = sequence_header {
                out.push(AccessUnit { data: seq.clone(), is_key_frame: false });
            }
        }
        out.push(au);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn format_with(sequence_header: Option<&[u8]>) -> Format {
        Format::Av1 {
            payload_type: 100,
            clock_rate: 90_000,
            sequence_header: sequence_header.map(Bytes::copy_from_slice),
        }
    }

    fn obu(obu_type: u8, rest: &[u8]) -> AccessUnit {
        let mut data = vec![obu_type << 3];
        data.extend_from_slice(rest);
        AccessUnit { data: Bytes::from(data), is_key_frame: false }
    }

    #[test]
    fn tracks_most_recent_sequence_header() {
        let mut format = format_with(None);
        let seq = obu(OBU_SEQUENCE_HEADER, &[1, 2, 3]);
        track_parameter_sets(&mut format, &[seq.clone()]);

        if let Format::Av1 { sequence_header, .. } = &format {
            assert_eq!(sequence_header.as_deref(), Some(&seq.data[..]));
        } else {
            panic!("expected Av1 format");
        }
    }

    #[test]
    fn strips_sequence_header_and_reinjects_before_key_frame() {
        let format = format_with(Some(&[9, 9, 9]));
        let seq = obu(OBU_SEQUENCE_HEADER, &[1, 2]);
        let key_frame = AccessUnit { data: Bytes::from_static(&[6 << 3, 1, 2]), is_key_frame: true };

        let out = reinject_parameter_sets(&format, vec![seq, key_frame.clone()]);

        assert_eq!(out.len(), 2);
        assert_eq!(&out[0].data[..], &[9, 9, 9]);
        assert_eq!(&out[1].data[..], &key_frame.data[..]);
    }

    #[test]
    fn non_key_frame_passes_through_unmodified() {
        let format = format_with(Some(&[9]));
        let inter = AccessUnit { data: Bytes::from_static(&[6 << 3, 1, 2]), is_key_frame: false };
        let out = reinject_parameter_sets(&format, vec![inter.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &inter.data[..]);
    }
}
