use bytes::Bytes;

/// Opaque, immutable unit of compressed media. Cloning an
/// `RtpPacket` only bumps the `Bytes` refcount on the payload, so fan-out to
/// many subscriber ports is zero-copy.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub marker: bool,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RtpPacket {
    #[must_use]
    pub fn new(
        sequence_number: u16,
        timestamp: u32,
        payload_type: u8,
        marker: bool,
        ssrc: u32,
        payload: Bytes,
    ) -> Self {
        Self {
            sequence_number,
            timestamp,
            payload_type,
            marker,
            ssrc,
            payload,
        }
    }

    /// Signed wrap-aware distance `self - other`, correct across the
    /// 65535 → 0 sequence number wrap.
    #[must_use]
    pub fn wrapping_distance(&self, other_seq: u16) -> i32 {
        (self.sequence_number.wrapping_sub(other_seq) as i16) as i32
    }
}

/// Returns `true` if `next` is the immediate successor of `prev`, treating
/// 16-bit sequence numbers as wrapping.
#[must_use]
pub fn is_next_in_sequence(prev: u16, next: u16) -> bool {
    next.wrapping_sub(prev) == 1
}

/// Signed gap between two sequence numbers accounting for 16-bit wraparound;
/// zero means consecutive, positive means packets were lost.
#[must_use]
pub fn sequence_gap(prev: u16, next: u16) -> i32 {
    (next.wrapping_sub(prev) as i16) as i32 - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_wraps_transparently() {
        assert!(is_next_in_sequence(65535, 0));
        assert_eq!(sequence_gap(65535, 0), 0);
        assert_eq!(sequence_gap(65534, 0), 1);
    }

    #[test]
    fn wrapping_distance_handles_wrap() {
        let pkt = RtpPacket::new(0, 0, 96, false, 1, Bytes::new());
        assert_eq!(pkt.wrapping_distance(65535), 1);
    }
}
