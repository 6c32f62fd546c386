//! RTP depacketization: reassembles camera RTP payloads back into complete,
//! Annex-B-delimited NAL units the TS muxer can write as access units. This
//! is the one place the HLS path actually looks inside the media payload
//! the WebRTC path forwards blind.
use bytes::{Bytes, BytesMut};
use camrelay_core::{RtpPacket, VideoCodec};
use rtp::codecs::h264::H264Packet;
use rtp::packetizer::Depacketizer;

const ANNEX_B_START_CODE: [u8; 4] = [0, 0, 0, 1];

/// One reassembled access unit, ready to hand to the TS muxer.
pub struct NalUnit {
    pub rtp_timestamp: u32,
    pub is_keyframe: bool,
    pub data: Bytes,
}

fn with_start_code(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + ANNEX_B_START_CODE.len());
    buf.extend_from_slice(&ANNEX_B_START_CODE);
    buf.extend_from_slice(payload);
    buf.freeze()
}

fn h264_is_keyframe(nal_payload: &[u8]) -> bool {
    nal_payload
        .first()
        .map(|b| b & 0x1F == 5) // IDR
        .unwrap_or(false)
}

/// HEVC NAL unit types 16..=23 are the IRAP (keyframe-equivalent) range.
fn h265_is_keyframe(nal_payload: &[u8]) -> bool {
    nal_payload
        .first()
        .map(|b| {
            let nal_type = (b >> 1) & 0x3F;
            (16..=23).contains(&nal_type)
        })
        .unwrap_or(false)
}

/// Latest observed copy of each parameter-set NAL, so a keyframe access unit
/// can be preceded by them even when the camera only sends them once, well
/// before the segment boundary that a player joining mid-stream will land
/// on. Retained for the whole life of an HLS session.
#[derive(Default, Clone)]
struct ParameterSets {
    vps: Option<Bytes>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl ParameterSets {
    fn is_empty(&self) -> bool {
        self.vps.is_none() && self.sps.is_none() && self.pps.is_none()
    }

    /// Concatenated, Annex-B-delimited VPS/SPS/PPS, in the order a decoder
    /// expects to see them ahead of a keyframe.
    fn prefix(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        for set in [&self.vps, &self.sps, &self.pps] {
            if let Some(bytes) = set {
                buf.extend_from_slice(bytes);
            }
        }
        buf
    }

    fn observe_h264(&mut self, nal_with_start_code: &Bytes) {
        let Some(nal_type) = nal_with_start_code
            .get(ANNEX_B_START_CODE.len())
            .map(|b| b & 0x1F)
        else {
            return;
        };
        match nal_type {
            7 => self.sps = Some(nal_with_start_code.clone()),
            8 => self.pps = Some(nal_with_start_code.clone()),
            _ => {}
        }
    }

    fn observe_h265(&mut self, nal_with_start_code: &Bytes) {
        let Some(first) = nal_with_start_code.get(ANNEX_B_START_CODE.len()) else {
            return;
        };
        match (first >> 1) & 0x3F {
            32 => self.vps = Some(nal_with_start_code.clone()),
            33 => self.sps = Some(nal_with_start_code.clone()),
            34 => self.pps = Some(nal_with_start_code.clone()),
            _ => {}
        }
    }
}

enum DepacketizerInner {
    H264(H264Packet),
    H265(H265Depacketizer),
}

/// Per-subscription depacketizer state. One instance lives for the whole
/// life of an HLS session, since FU-A/FU fragments must reassemble across
/// consecutive RTP packets from the same source, and so the retained
/// parameter sets survive across every access unit the session writes.
pub struct Depacketizers {
    inner: DepacketizerInner,
    codec: VideoCodec,
    parameter_sets: ParameterSets,
}

impl Depacketizers {
    #[must_use]
    pub fn for_codec(codec: VideoCodec) -> Self {
        let inner = match codec {
            VideoCodec::H264 => DepacketizerInner::H264(H264Packet::default()),
            VideoCodec::H265 => DepacketizerInner::H265(H265Depacketizer::default()),
        };
        Self {
            inner,
            codec,
            parameter_sets: ParameterSets::default(),
        }
    }

    /// Feeds one RTP packet, returning zero or more completed NAL units. A
    /// single call will usually return zero (mid-fragment) or one (a NAL
    /// completed by this packet) units. Every keyframe unit is preceded by
    /// the latest retained SPS/PPS (and VPS for H.265), so a TS segment that
    /// opens on this unit carries everything a player needs to decode it
    /// without having seen an earlier segment.
    pub fn push(&mut self, packet: &RtpPacket) -> Vec<NalUnit> {
        let mut units = match &mut self.inner {
            DepacketizerInner::H264(inner) => match inner.depacketize(&packet.payload) {
                Ok(payload) if !payload.is_empty() => {
                    let has_prefix = payload.starts_with(&ANNEX_B_START_CODE);
                    let nal_bytes = if has_prefix {
                        &payload[ANNEX_B_START_CODE.len()..]
                    } else {
                        &payload[..]
                    };
                    let is_keyframe = h264_is_keyframe(nal_bytes);
                    vec![NalUnit {
                        rtp_timestamp: packet.timestamp,
                        is_keyframe,
                        data: with_start_code_if_missing(payload),
                    }]
                }
                _ => Vec::new(),
            },
            DepacketizerInner::H265(inner) => inner.push(packet),
        };

        for unit in &units {
            match self.codec {
                VideoCodec::H264 => self.parameter_sets.observe_h264(&unit.data),
                VideoCodec::H265 => self.parameter_sets.observe_h265(&unit.data),
            }
        }

        if !self.parameter_sets.is_empty() {
            for unit in &mut units {
                if unit.is_keyframe {
                    let mut buf = self.parameter_sets.prefix();
                    buf.extend_from_slice(&unit.data);
                    unit.data = buf.freeze();
                }
            }
        }

        units
    }
}

/// `H264Packet::depacketize` already prefixes its output with an Annex-B
/// start code (it's built for exactly this muxing use case); our own
/// [`H265Depacketizer`] does not, so this normalizes both to the same shape.
fn with_start_code_if_missing(payload: Bytes) -> Bytes {
    if payload.starts_with(&ANNEX_B_START_CODE) {
        payload
    } else {
        with_start_code(&payload)
    }
}

/// Hand-rolled HEVC FU reassembly. The `rtp` crate's codec helpers don't
/// cover H.265 at the version this workspace pins, so fragmentation unit
/// handling (RFC 7798 §4.4.3) is implemented directly against the two-byte
/// HEVC NAL header and one-byte FU header.
#[derive(Default)]
pub struct H265Depacketizer {
    fragment: BytesMut,
    fragment_type: u8,
    in_progress: bool,
}

impl H265Depacketizer {
    fn push(&mut self, packet: &RtpPacket) -> Vec<NalUnit> {
        let payload = &packet.payload;
        if payload.len() < 2 {
            return Vec::new();
        }
        let nal_type = (payload[0] >> 1) & 0x3F;

        const FU_NAL_TYPE: u8 = 49;

        if nal_type != FU_NAL_TYPE {
            // Single NAL unit packet: forward as-is.
            let data = with_start_code(payload);
            return vec![NalUnit {
                rtp_timestamp: packet.timestamp,
                is_keyframe: h265_is_keyframe(payload),
                data,
            }];
        }

        if payload.len() < 3 {
            return Vec::new();
        }
        let fu_header = payload[2];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let real_type = fu_header & 0x3F;

        if start {
            self.fragment.clear();
            self.fragment_type = real_type;
            self.in_progress = true;
            // Reconstruct the original two-byte NAL header with the real type.
            let byte0 = (payload[0] & 0x81) | (real_type << 1);
            self.fragment.extend_from_slice(&[byte0, payload[1]]);
            self.fragment.extend_from_slice(&payload[3..]);
            Vec::new()
        } else if self.in_progress {
            self.fragment.extend_from_slice(&payload[3..]);
            if end {
                self.in_progress = false;
                let assembled = self.fragment.split().freeze();
                let is_keyframe = h265_is_keyframe(&assembled);
                vec![NalUnit {
                    rtp_timestamp: packet.timestamp,
                    is_keyframe,
                    data: with_start_code(&assembled),
                }]
            } else {
                Vec::new()
            }
        } else {
            // End fragment without a preceding start: drop, we lost the head.
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp(seq: u16, ts: u32, payload: Vec<u8>) -> RtpPacket {
        RtpPacket::new(seq, ts, 96, false, 1, Bytes::from(payload))
    }

    #[test]
    fn h264_idr_is_detected_as_keyframe() {
        // nal_unit_type 5 (IDR) in the low 5 bits, forbidden_zero_bit/nal_ref_idc in the high 3.
        assert!(h264_is_keyframe(&[0x65, 0x00]));
        // nal_unit_type 1 (non-IDR slice) is not a keyframe.
        assert!(!h264_is_keyframe(&[0x41, 0x00]));
    }

    #[test]
    fn h265_irap_range_is_detected_as_keyframe() {
        for nal_type in 16..=23u8 {
            let byte0 = nal_type << 1;
            assert!(h265_is_keyframe(&[byte0, 0x00]), "nal_type {nal_type} should be IRAP");
        }
        // VPS (32) and a regular trailing slice (1) are not keyframes.
        assert!(!h265_is_keyframe(&[32 << 1, 0x00]));
        assert!(!h265_is_keyframe(&[1 << 1, 0x00]));
    }

    #[test]
    fn h265_single_nal_packet_forwards_with_start_code() {
        let mut depay = H265Depacketizer::default();
        // nal_type 1 (TRAIL_R), not a fragmentation unit (type 49).
        let payload = vec![1u8 << 1, 0x01, 0xAA, 0xBB];
        let units = depay.push(&rtp(1, 1000, payload));
        assert_eq!(units.len(), 1);
        assert!(units[0].data.starts_with(&ANNEX_B_START_CODE));
        assert!(!units[0].is_keyframe);
    }

    #[test]
    fn h265_fu_reassembles_across_start_middle_end() {
        let mut depay = H265Depacketizer::default();
        const FU_NAL_TYPE: u8 = 49;
        let real_type: u8 = 19; // IDR_W_RADL, in the IRAP range.

        // Start fragment: FU header has the start bit set and carries the real type.
        let start_payload = vec![FU_NAL_TYPE << 1, 0x01, 0x80 | real_type, 0xDE, 0xAD];
        assert!(depay.push(&rtp(1, 5000, start_payload)).is_empty());

        // Middle fragment: neither start nor end bit set.
        let mid_payload = vec![FU_NAL_TYPE << 1, 0x01, real_type, 0xBE, 0xEF];
        assert!(depay.push(&rtp(2, 5000, mid_payload)).is_empty());

        // End fragment: end bit set, completes the access unit.
        let end_payload = vec![FU_NAL_TYPE << 1, 0x01, 0x40 | real_type, 0xCA, 0xFE];
        let units = depay.push(&rtp(3, 5000, end_payload));
        assert_eq!(units.len(), 1);
        let nal = &units[0];
        assert!(nal.is_keyframe);
        assert!(nal.data.starts_with(&ANNEX_B_START_CODE));
        // Reassembled body: reconstructed header + all three fragments' tails.
        let body = &nal.data[ANNEX_B_START_CODE.len()..];
        assert_eq!(body, &[real_type << 1, 0x01, 0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE][..]);
    }

    #[test]
    fn h265_end_fragment_without_start_is_dropped() {
        let mut depay = H265Depacketizer::default();
        const FU_NAL_TYPE: u8 = 49;
        let end_payload = vec![FU_NAL_TYPE << 1, 0x01, 0x40 | 19, 0xFF];
        assert!(depay.push(&rtp(1, 1000, end_payload)).is_empty());
    }

    #[test]
    fn parameter_sets_prefix_orders_vps_sps_pps_regardless_of_arrival_order() {
        let mut sets = ParameterSets::default();
        assert!(sets.is_empty());
        sets.observe_h265(&with_start_code(&[34 << 1, 0x01, 0xCC])); // PPS first
        sets.observe_h265(&with_start_code(&[32 << 1, 0x01, 0xAA])); // then VPS
        sets.observe_h265(&with_start_code(&[33 << 1, 0x01, 0xBB])); // then SPS
        assert!(!sets.is_empty());

        let mut expected = Vec::new();
        expected.extend_from_slice(&with_start_code(&[32 << 1, 0x01, 0xAA]));
        expected.extend_from_slice(&with_start_code(&[33 << 1, 0x01, 0xBB]));
        expected.extend_from_slice(&with_start_code(&[34 << 1, 0x01, 0xCC]));
        assert_eq!(&sets.prefix()[..], &expected[..]);
    }

    #[test]
    fn h265_parameter_sets_are_retained_and_prepended_to_next_keyframe() {
        let mut depay = Depacketizers::for_codec(VideoCodec::H265);

        let vps = vec![32u8 << 1, 0x01, 0xAA];
        let sps = vec![33u8 << 1, 0x01, 0xBB];
        let pps = vec![34u8 << 1, 0x01, 0xCC];
        assert_eq!(depay.push(&rtp(1, 1000, vps.clone())).len(), 1);
        assert_eq!(depay.push(&rtp(2, 1000, sps.clone())).len(), 1);
        assert_eq!(depay.push(&rtp(3, 1000, pps.clone())).len(), 1);

        let idr = vec![19u8 << 1, 0x01, 0xDD]; // IDR_W_RADL, IRAP range
        let units = depay.push(&rtp(4, 2000, idr.clone()));
        assert_eq!(units.len(), 1);
        assert!(units[0].is_keyframe);

        let mut expected_prefix = Vec::new();
        expected_prefix.extend_from_slice(&with_start_code(&vps));
        expected_prefix.extend_from_slice(&with_start_code(&sps));
        expected_prefix.extend_from_slice(&with_start_code(&pps));
        assert!(units[0].data.starts_with(&expected_prefix));
        assert!(units[0].data.ends_with(&with_start_code(&idr)[..]));
    }

    #[test]
    fn h265_non_keyframe_unit_is_not_prefixed_with_parameter_sets() {
        let mut depay = Depacketizers::for_codec(VideoCodec::H265);
        depay.push(&rtp(1, 1000, vec![33u8 << 1, 0x01, 0xBB])); // SPS cached

        let trailing = vec![1u8 << 1, 0x01, 0xEE]; // TRAIL_R, not IRAP
        let units = depay.push(&rtp(2, 2000, trailing.clone()));
        assert_eq!(units.len(), 1);
        assert!(!units[0].is_keyframe);
        assert_eq!(units[0].data, with_start_code(&trailing));
    }
}
