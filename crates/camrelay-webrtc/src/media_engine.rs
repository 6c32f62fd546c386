use camrelay_core::VideoCodec;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::{APIBuilder, API};
use webrtc::interceptor::registry::Registry;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::RTCPFeedback;

use crate::error::WebRtcError;
use webrtc::api::media_engine::MediaEngine;

// These are the same RTP payload type numbers and fmtp lines any WHIP/SFU
// relay offers for passthrough H.264/H.265 (dynamic range 96-127); nothing
// here is negotiated with the upstream camera, since we only ever forward
// whatever encoding the ingest side already detected.
const H264_PAYLOAD_TYPE: u8 = 102;
const H264_FMTP_LINE: &str =
    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";
const H265_PAYLOAD_TYPE: u8 = 106;
const H265_FMTP_LINE: &str = "level-id=93;profile-id=1;tier-flag=0;tx-mode=SRST";

// Receiver-side feedback the far end needs to ask for a keyframe or retransmit
// a lost packet; we never encode anything ourselves, but we still forward
// a viewer's PLI/FIR/NACK upstream-worthy intent through the declared
// capability so the webrtc-rs interceptor chain knows to generate it.
fn rtcp_feedback() -> Vec<RTCPFeedback> {
    vec![
        RTCPFeedback {
            typ: "goog-remb".to_owned(),
            parameter: String::new(),
        },
        RTCPFeedback {
            typ: "ccm".to_owned(),
            parameter: "fir".to_owned(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: String::new(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: "pli".to_owned(),
        },
    ]
}

fn codec_params(codec: VideoCodec, payload_type: u8, fmtp_line: &str) -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: codec.mime_type().to_string(),
            clock_rate: 90_000,
            channels: 0,
            sdp_fmtp_line: fmtp_line.to_string(),
            rtcp_feedback: rtcp_feedback(),
        },
        payload_type,
        ..Default::default()
    }
}

/// Builds the process-wide WebRTC API object: both forwardable codecs
/// registered up front (a peer forwards whichever the source negotiated,
/// H.264 or H.265, never both at once) plus the default interceptor chain
/// for RTCP/NACK handling.
pub fn build_api() -> Result<API, WebRtcError> {
    let mut media_engine = MediaEngine::default();

    media_engine.register_codec(
        codec_params(VideoCodec::H264, H264_PAYLOAD_TYPE, H264_FMTP_LINE),
        RTPCodecType::Video,
    )?;
    media_engine.register_codec(
        codec_params(VideoCodec::H265, H265_PAYLOAD_TYPE, H265_FMTP_LINE),
        RTPCodecType::Video,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}
