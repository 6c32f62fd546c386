use std::collections::VecDeque;

/// One completed, on-disk TS segment.
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    pub sequence: u64,
    pub filename: String,
    pub duration_secs: f64,
    /// Set when this segment's media timeline is not contiguous with the
    /// one before it (forced restart after `CodecDrift`, or a detected
    /// backward timestamp jump) — emits `#EXT-X-DISCONTINUITY` ahead of it.
    pub discontinuity: bool,
}

/// Rolling-window `m3u8` builder for one stream's live HLS playlist: a
/// sliding window of the last N segments.
pub struct Playlist {
    window: usize,
    segments: VecDeque<SegmentEntry>,
    media_sequence: u64,
    next_sequence: u64,
}

impl Playlist {
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            segments: VecDeque::new(),
            media_sequence: 0,
            next_sequence: 0,
        }
    }

    /// Registers a freshly written segment, evicting the oldest once the
    /// window is full. Returns the evicted filename, if any, so the caller
    /// can delete the backing file.
    pub fn push(&mut self, filename: String, duration_secs: f64, discontinuity: bool) -> Option<String> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.segments.push_back(SegmentEntry {
            sequence,
            filename,
            duration_secs,
            discontinuity,
        });

        if self.segments.len() > self.window {
            let evicted = self.segments.pop_front();
            self.media_sequence += 1;
            evicted.map(|e| e.filename)
        } else {
            None
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        let target_duration = self
            .segments
            .iter()
            .map(|s| s.duration_secs.ceil() as u64)
            .max()
            .unwrap_or(1)
            .max(1);

        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:6\n");
        out.push_str(&format!("#EXT-X-TARGETDURATION:{target_duration}\n"));
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", self.media_sequence));

        for segment in &self.segments {
            if segment.discontinuity {
                out.push_str("#EXT-X-DISCONTINUITY\n");
            }
            out.push_str(&format!("#EXTINF:{:.3},\n", segment.duration_secs));
            out.push_str(&segment.filename);
            out.push('\n');
        }

        out
    }

    /// `#EXT-X-ENDLIST` terminated rendering, used once on final teardown so
    /// clients still watching know the stream is done.
    #[must_use]
    pub fn render_final(&self) -> String {
        let mut out = self.render();
        out.push_str("#EXT-X-ENDLIST\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_evicts_oldest() {
        let mut playlist = Playlist::new(2);
        assert_eq!(playlist.push("0.ts".into(), 1.0, false), None);
        assert_eq!(playlist.push("1.ts".into(), 1.0, false), None);
        assert_eq!(playlist.push("2.ts".into(), 1.0, false), Some("0.ts".into()));
        let rendered = playlist.render();
        assert!(rendered.contains("1.ts"));
        assert!(rendered.contains("2.ts"));
        assert!(!rendered.contains("0.ts"));
        assert!(rendered.contains("#EXT-X-MEDIA-SEQUENCE:1"));
    }

    #[test]
    fn discontinuity_tag_emitted() {
        let mut playlist = Playlist::new(5);
        playlist.push("0.ts".into(), 1.0, false);
        playlist.push("1.ts".into(), 1.0, true);
        let rendered = playlist.render();
        let disc_pos = rendered.find("#EXT-X-DISCONTINUITY").unwrap();
        let seg_pos = rendered.find("1.ts").unwrap();
        assert!(disc_pos < seg_pos);
    }
}
