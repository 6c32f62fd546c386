//! Parses the video codecs an SDP offer advertises, so negotiation can
//! enforce codec selection before a single
//! `RTCPeerConnection` is built: H.265 > H.264 priority among what the
//! browser offered, and the chosen egress codec must equal the stream's
//! ingest codec or negotiation fails — this relay never transcodes.
use std::io::Cursor;

use camrelay_core::VideoCodec;
use sdp::description::session::SessionDescription;

use crate::error::WebRtcError;

/// Returns the forwardable video codecs named by `rtpmap` attributes in the
/// offer's video m-section, in first-seen order.
pub fn offered_video_codecs(offer_sdp: &str) -> Result<Vec<VideoCodec>, WebRtcError> {
    let mut reader = Cursor::new(offer_sdp.as_bytes());
    let description = SessionDescription::unmarshal(&mut reader)
        .map_err(|err| WebRtcError::Negotiation(format!("invalid offer sdp: {err}")))?;

    let mut codecs = Vec::new();
    for media in &description.media_descriptions {
        if media.media_name.media != "video" {
            continue;
        }
        for attr in &media.attributes {
            if attr.key != "rtpmap" {
                continue;
            }
            let Some(value) = &attr.value else { continue };
            // rtpmap value shape: "<payload type> <encoding name>/<clock rate>"
            let Some(encoding) = value.split_whitespace().nth(1) else {
                continue;
            };
            let name = encoding.split('/').next().unwrap_or(encoding);
            if let Some(codec) = VideoCodec::from_encoding_name(name) {
                if !codecs.contains(&codec) {
                    codecs.push(codec);
                }
            }
        }
    }
    Ok(codecs)
}

/// Picks the egress codec. Fails with `CodecMismatch` both when
/// the offer names neither supported codec and when its best-priority codec
/// disagrees with `ingest_codec` — forwarding is always untranscoded.
pub fn select_egress_codec(
    offered: &[VideoCodec],
    ingest_codec: VideoCodec,
) -> Result<VideoCodec, WebRtcError> {
    let best = if offered.contains(&VideoCodec::H265) {
        Some(VideoCodec::H265)
    } else if offered.contains(&VideoCodec::H264) {
        Some(VideoCodec::H264)
    } else {
        None
    };

    match best {
        Some(codec) if codec == ingest_codec => Ok(codec),
        _ => Err(WebRtcError::CodecMismatch {
            offered: offered.to_vec(),
            ingest: ingest_codec,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER_H264_ONLY: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102\r\n\
c=IN IP4 0.0.0.0\r\n\
a=rtpmap:102 H264/90000\r\n";

    const OFFER_BOTH: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102 106\r\n\
c=IN IP4 0.0.0.0\r\n\
a=rtpmap:102 H264/90000\r\n\
a=rtpmap:106 H265/90000\r\n";

    #[test]
    fn parses_single_video_codec() {
        let codecs = offered_video_codecs(OFFER_H264_ONLY).unwrap();
        assert_eq!(codecs, vec![VideoCodec::H264]);
    }

    #[test]
    fn h265_takes_priority_when_both_offered() {
        let codecs = offered_video_codecs(OFFER_BOTH).unwrap();
        let chosen = select_egress_codec(&codecs, VideoCodec::H265).unwrap();
        assert_eq!(chosen, VideoCodec::H265);
    }

    #[test]
    fn mismatch_when_offer_lacks_ingest_codec() {
        let codecs = offered_video_codecs(OFFER_H264_ONLY).unwrap();
        let err = select_egress_codec(&codecs, VideoCodec::H265).unwrap_err();
        assert!(matches!(err, WebRtcError::CodecMismatch { .. }));
    }

    #[test]
    fn mismatch_when_offer_has_neither_supported_codec() {
        let err = select_egress_codec(&[], VideoCodec::H264).unwrap_err();
        assert!(matches!(err, WebRtcError::CodecMismatch { .. }));
    }
}
