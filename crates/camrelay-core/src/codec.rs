use serde::{Deserialize, Serialize};

/// Video codec tag carried by a [`crate::Stream`]. Set once upon first-media
/// discovery during RTSP DESCRIBE and never changed for the stream's
/// lifetime, once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::H264 => "H264",
            Self::H265 => "H265",
        }
    }

    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::H264 => "video/H264",
            Self::H265 => "video/H265",
        }
    }

    /// Parses an RTSP/SDP `rtpmap` encoding name, or a WebRTC mime subtype,
    /// into a supported codec. Returns `None` for anything this relay
    /// cannot forward untranscoded (`NoSupportedCodec`).
    #[must_use]
    pub fn from_encoding_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "H264" => Some(Self::H264),
            "H265" | "HEVC" => Some(Self::H265),
            _ => None,
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitive_encoding_names() {
        assert_eq!(VideoCodec::from_encoding_name("h264"), Some(VideoCodec::H264));
        assert_eq!(VideoCodec::from_encoding_name("H264"), Some(VideoCodec::H264));
        assert_eq!(VideoCodec::from_encoding_name("h265"), Some(VideoCodec::H265));
        assert_eq!(VideoCodec::from_encoding_name("HEVC"), Some(VideoCodec::H265));
    }

    #[test]
    fn rejects_unsupported_codecs() {
        assert_eq!(VideoCodec::from_encoding_name("VP8"), None);
        assert_eq!(VideoCodec::from_encoding_name("AV1"), None);
        assert_eq!(VideoCodec::from_encoding_name(""), None);
    }

    #[test]
    fn serde_round_trips_lowercase() {
        let json = serde_json::to_string(&VideoCodec::H264).unwrap();
        assert_eq!(json, "\"h264\"");
        let back: VideoCodec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, VideoCodec::H264);
    }
}
