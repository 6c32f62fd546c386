use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camrelay_core::config::HlsConfig;
use camrelay_core::{BoundedPacketSink, RtpPacket, StreamId, SubscriberPort, VideoCodec};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::depay::Depacketizers;
use crate::playlist::Playlist;
use crate::ts::TransportStream;

const PACKET_QUEUE_CAPACITY: usize = 1024;
const RTP_CLOCK_RATE: u32 = 90_000;
const PLAYLIST_FILE: &str = "playlist.m3u8";

fn rtp_delta_ms(first: u32, current: u32) -> u64 {
    let signed = (current.wrapping_sub(first) as i32) as i64;
    ((signed.max(0) as u64) * 1000) / RTP_CLOCK_RATE as u64
}

#[cfg(unix)]
fn ensure_dir_mode(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn ensure_dir_mode(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// One stream's live HLS session: depacketizes its RTP feed into NAL units,
/// segments them on keyframe boundaries, and keeps an on-disk rolling
/// window of TS segments plus the playlist that indexes them.
///
/// Implements [`SubscriberPort`] directly; the actual muxing runs on a
/// background task fed by a [`BoundedPacketSink`] so a slow disk never
/// blocks the publisher.
pub struct HlsMuxer {
    stream_id: StreamId,
    dir: PathBuf,
    sink: BoundedPacketSink,
    playlist: Arc<RwLock<String>>,
    ready: Arc<AtomicBool>,
    ready_notify: Arc<Notify>,
    closed: AtomicBool,
}

impl HlsMuxer {
    /// Spawns the session; `dir` is `<output_dir>/<stream_id>/` and is
    /// created here, mode 0755, if missing.
    pub async fn start(
        stream_id: StreamId,
        codec: VideoCodec,
        config: &HlsConfig,
    ) -> std::io::Result<Arc<Self>> {
        let dir = config.output_dir.join(stream_id.as_str());
        tokio::fs::create_dir_all(&dir).await?;
        ensure_dir_mode(&dir)?;

        let (sink, rx) = BoundedPacketSink::new(PACKET_QUEUE_CAPACITY);
        let playlist = Arc::new(RwLock::new(String::new()));
        let ready = Arc::new(AtomicBool::new(false));
        let ready_notify = Arc::new(Notify::new());

        let muxer = Arc::new(Self {
            stream_id: stream_id.clone(),
            dir: dir.clone(),
            sink,
            playlist: playlist.clone(),
            ready: ready.clone(),
            ready_notify: ready_notify.clone(),
            closed: AtomicBool::new(false),
        });

        let segment_duration_ms = config.segment_duration().as_millis() as u64;
        let segment_count = config.segment_count;
        tokio::spawn(run(
            stream_id,
            codec,
            dir,
            segment_duration_ms,
            segment_count,
            rx,
            playlist,
            ready,
            ready_notify,
        ));

        Ok(muxer)
    }

    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn playlist_text(&self) -> String {
        self.playlist.read().clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Waits for the first segment to land, up to `timeout`. Returns `true`
    /// once ready, `false` on timeout. A session that's already produced a
    /// segment (or that flushes one while this call is in flight) returns
    /// immediately; the check-notified-check sequence avoids losing a
    /// wakeup that races with the initial readiness check.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        if self.is_ready() {
            return true;
        }
        let notified = self.ready_notify.notified();
        tokio::pin!(notified);
        if self.is_ready() {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }

    pub fn segment_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl SubscriberPort for HlsMuxer {
    fn deliver(&self, packet: Arc<RtpPacket>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.sink.push(packet);
    }

    fn name(&self) -> String {
        format!("hls-muxer/{}", self.stream_id)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    stream_id: StreamId,
    codec: VideoCodec,
    dir: PathBuf,
    segment_duration_ms: u64,
    segment_count: usize,
    mut rx: tokio::sync::mpsc::Receiver<Arc<RtpPacket>>,
    playlist_text: Arc<RwLock<String>>,
    ready: Arc<AtomicBool>,
    ready_notify: Arc<Notify>,
) {
    let mut depacketizer = Depacketizers::for_codec(codec);
    let mut playlist = Playlist::new(segment_count);
    let mut current = TransportStream::new(codec);
    let mut segment_start_ts: Option<u32> = None;
    let mut last_unit_ts: Option<u32> = None;
    let mut wrote_any = false;
    let mut next_sequence: u64 = 0;
    let mut pending_discontinuity = false;

    // A backward jump larger than this, between two consecutive access
    // units, means the media timeline reset (e.g. the ingest side
    // reconnected) rather than ordinary 32-bit RTP timestamp wraparound.
    const DISCONTINUITY_THRESHOLD_TICKS: i32 = -(RTP_CLOCK_RATE as i32);

    while let Some(packet) = rx.recv().await {
        for unit in depacketizer.push(&packet) {
            if let Some(prev) = last_unit_ts {
                let step = (unit.rtp_timestamp.wrapping_sub(prev)) as i32;
                if step < DISCONTINUITY_THRESHOLD_TICKS {
                    pending_discontinuity = true;
                }
            }
            last_unit_ts = Some(unit.rtp_timestamp);

            let start_ts = *segment_start_ts.get_or_insert(unit.rtp_timestamp);
            let elapsed_ms = rtp_delta_ms(start_ts, unit.rtp_timestamp);

            if unit.is_keyframe && wrote_any && (elapsed_ms >= segment_duration_ms || pending_discontinuity) {
                flush_segment(
                    &stream_id,
                    &dir,
                    &mut current,
                    &mut playlist,
                    &mut next_sequence,
                    elapsed_ms,
                    pending_discontinuity,
                    &playlist_text,
                )
                .await;
                if !ready.swap(true, Ordering::AcqRel) {
                    ready_notify.notify_waiters();
                }
                pending_discontinuity = false;
                current = TransportStream::new(codec);
                segment_start_ts = Some(unit.rtp_timestamp);
                wrote_any = false;
            }

            let segment_elapsed_ms = rtp_delta_ms(segment_start_ts.unwrap_or(start_ts), unit.rtp_timestamp);
            if let Err(err) =
                current.push_video(segment_elapsed_ms, 0, unit.is_keyframe, &unit.data)
            {
                warn!(stream = %stream_id, error = %err, "hls mux write failed, dropping access unit");
                continue;
            }
            wrote_any = true;
        }
    }

    if wrote_any {
        let final_duration = match (segment_start_ts, last_unit_ts) {
            (Some(start), Some(last)) => rtp_delta_ms(start, last).max(1),
            _ => 1,
        };
        flush_segment(
            &stream_id,
            &dir,
            &mut current,
            &mut playlist,
            &mut next_sequence,
            final_duration,
            pending_discontinuity,
            &playlist_text,
        )
        .await;
        if !ready.swap(true, Ordering::AcqRel) {
            ready_notify.notify_waiters();
        }
    }

    *playlist_text.write() = playlist.render_final();
    debug!(stream = %stream_id, "hls session ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtp_delta_ms_converts_ticks_at_90khz() {
        assert_eq!(rtp_delta_ms(0, 0), 0);
        assert_eq!(rtp_delta_ms(0, RTP_CLOCK_RATE), 1000);
        assert_eq!(rtp_delta_ms(0, RTP_CLOCK_RATE / 2), 500);
    }

    #[test]
    fn rtp_delta_ms_clamps_backward_steps_to_zero() {
        // A small backward step (jitter, reordering) must not underflow or
        // go negative; it floors at zero rather than panicking.
        assert_eq!(rtp_delta_ms(1000, 900), 0);
    }

    #[test]
    fn rtp_delta_ms_handles_32_bit_wraparound() {
        // `current` wrapped past u32::MAX back to a small value; the
        // wrapping_sub makes this look like a small forward step, not a
        // multi-year backward jump.
        let first = u32::MAX - 1000;
        let current = 1000u32;
        let delta = rtp_delta_ms(first, current);
        assert!(delta > 0, "wraparound should read as forward progress, not a gap");
    }
}

#[allow(clippy::too_many_arguments)]
async fn flush_segment(
    stream_id: &StreamId,
    dir: &Path,
    current: &mut TransportStream,
    playlist: &mut Playlist,
    next_sequence: &mut u64,
    duration_ms: u64,
    discontinuity: bool,
    playlist_text: &Arc<RwLock<String>>,
) {
    let sequence = *next_sequence;
    *next_sequence += 1;
    let filename = format!("{sequence:08}.ts");
    let path = dir.join(&filename);

    let bytes = match current.write_to(std::io::Cursor::new(Vec::<u8>::new())) {
        Ok(cursor) => cursor.into_inner(),
        Err(err) => {
            warn!(stream = %stream_id, error = %err, "failed to serialize ts segment");
            return;
        }
    };

    if let Err(err) = tokio::fs::write(&path, &bytes).await {
        warn!(stream = %stream_id, path = %path.display(), error = %err, "failed to write ts segment to disk");
        return;
    }

    let duration_secs = (duration_ms.max(1) as f64) / 1000.0;
    if let Some(evicted) = playlist.push(filename, duration_secs, discontinuity) {
        let evicted_path = dir.join(&evicted);
        tokio::spawn(async move {
            let _ = tokio::fs::remove_file(&evicted_path).await;
        });
    }

    *playlist_text.write() = playlist.render();
}
