use serde::{Deserialize, Serialize};

/// One browser→server message on the signaling connection. The envelope
/// is `{"type": "...", "payload": {...}}`; `serde`'s
/// internally-tagged representation matches that shape directly.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Triggers ensure-live + peer creation; answered with `answer` or
    /// `error`.
    Offer {
        sdp: String,
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    /// Remote ICE candidate. Optional: this relay completes gathering
    /// before answering, so trickle in the reverse direction is
    /// accepted but never required — candidates may simply be logged.
    Candidate { candidate: String },
}

/// One server→browser message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ServerMessage {
    Answer(String),
    /// Terminal for the offer that produced it; carries the failing
    /// error's stable machine-readable `code()` (e.g. `"CodecMismatch"`),
    /// or a decode diagnostic for a malformed inbound envelope.
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_envelope_deserializes() {
        let json = r#"{"type":"offer","payload":{"sdp":"v=0...","streamId":"camA"}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Offer { sdp, stream_id } => {
                assert_eq!(sdp, "v=0...");
                assert_eq!(stream_id, "camA");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn candidate_envelope_deserializes() {
        let json = r#"{"type":"candidate","payload":{"candidate":"candidate:1 1 UDP ..."}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Candidate { .. }));
    }

    #[test]
    fn answer_envelope_serializes() {
        let msg = ServerMessage::Answer("v=0...".to_string());
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"answer","payload":"v=0..."}"#);
    }

    #[test]
    fn error_envelope_serializes() {
        let msg = ServerMessage::Error("CodecMismatch".to_string());
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"error","payload":"CodecMismatch"}"#);
    }
}
