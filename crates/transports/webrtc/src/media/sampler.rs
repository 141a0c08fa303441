//! Periodic frame sampling for relayed video tracks
//!
//! Sampling is best-effort: failures are logged and the next tick proceeds
//! normally. When no publisher could be reached at startup every tick is a
//! no-op for the lifetime of the process.

use super::InboundStreamInfo;
use crate::config::DEFAULT_FRAME_TOPIC;
use crate::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Pub/sub bus the sampler publishes to
#[async_trait]
pub trait FramePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;
}

/// Optional hook that turns recently relayed packets into an encoded image
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    /// `packets` holds the track's most recent RTP packets, oldest first
    async fn decode(&self, stream: &InboundStreamInfo, packets: &[Bytes]) -> Result<Bytes>;
}

/// Bounded window of the most recent packets relayed on one track
pub struct PacketTap {
    capacity: usize,
    packets: Mutex<VecDeque<Bytes>>,
}

impl PacketTap {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            packets: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record a copy of `packet`, evicting the oldest one when full
    pub fn push(&self, packet: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let mut packets = self.packets.lock();
        if packets.len() == self.capacity {
            packets.pop_front();
        }
        packets.push_back(Bytes::copy_from_slice(packet));
    }

    pub fn snapshot(&self) -> Vec<Bytes> {
        self.packets.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Record published for every sampling tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampledFrame {
    /// Capture time in seconds since the Unix epoch
    pub timestamp: i64,

    /// Base64 encoded image; empty without a decoder
    #[serde(rename = "frameData")]
    pub frame_data: String,
}

impl SampledFrame {
    pub fn new(timestamp: i64, payload: &[u8]) -> Self {
        Self {
            timestamp,
            frame_data: BASE64.encode(payload),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Shared sampling settings, one instance per process
pub struct FrameSampler {
    publisher: Option<Arc<dyn FramePublisher>>,
    decoder: Option<Arc<dyn FrameDecoder>>,
    topic: String,
    interval: Duration,
}

impl FrameSampler {
    /// `publisher` is `None` when the bus was unreachable at startup
    pub fn new(
        publisher: Option<Arc<dyn FramePublisher>>,
        topic: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            publisher,
            decoder: None,
            topic: topic.into(),
            interval,
        }
    }

    /// Sampler whose ticks never publish
    ///
    /// ```
    /// use iris_webrtc::{FrameSampler, InboundStreamInfo, MediaKind, PacketTap};
    ///
    /// # tokio_test::block_on(async {
    /// let sampler = FrameSampler::disabled();
    /// let info = InboundStreamInfo {
    ///     track_id: "video-1".to_string(),
    ///     stream_id: "camera".to_string(),
    ///     kind: MediaKind::Video,
    ///     codec: Default::default(),
    /// };
    ///
    /// // No bus, nothing to publish to
    /// assert!(!sampler.is_enabled());
    /// sampler.sample(&info, &PacketTap::new(16), 1).await;
    /// # });
    /// ```
    pub fn disabled() -> Self {
        Self::new(None, DEFAULT_FRAME_TOPIC, Duration::from_secs(5))
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn FrameDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.publisher.is_some()
    }

    /// Whether relayed packets need to be tapped for this sampler
    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    /// Tick until `stop` flips to `true` or its sender is dropped, returning
    /// the number of ticks observed
    ///
    /// The first tick fires one full interval after the call.
    pub async fn run(
        &self,
        stream: &InboundStreamInfo,
        tap: &PacketTap,
        mut stop: watch::Receiver<bool>,
    ) -> u64 {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if self.is_enabled() {
            info!(track_id = %stream.track_id, "Frame extraction started");
        } else {
            debug!(track_id = %stream.track_id, "Frame extraction disabled, bus unavailable");
        }

        let mut frame_count = 0u64;
        if *stop.borrow() {
            return frame_count;
        }

        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    frame_count += 1;
                    self.sample(stream, tap, frame_count).await;
                }
            }
        }

        debug!(track_id = %stream.track_id, ticks = frame_count, "Frame extraction stopped");
        frame_count
    }

    /// One sampling tick; never fails
    pub async fn sample(&self, stream: &InboundStreamInfo, tap: &PacketTap, frame_count: u64) {
        let Some(publisher) = &self.publisher else {
            return;
        };

        let payload = match &self.decoder {
            Some(decoder) => match decoder.decode(stream, &tap.snapshot()).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to decode frame #{}: {}", frame_count, e);
                    Bytes::new()
                }
            },
            None => Bytes::new(),
        };

        let frame = SampledFrame::new(unix_timestamp(), &payload);
        let data = match frame.to_bytes() {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to marshal frame: {}", e);
                return;
            }
        };

        match publisher.publish(&self.topic, data).await {
            Ok(()) => info!("Frame #{} published to {}", frame_count, self.topic),
            Err(e) => warn!("Failed to publish frame: {}", e),
        }
    }
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{CodecCapability, MediaKind};
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, Bytes)>>,
        failures: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl FramePublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
            if self.fail {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(Error::Publish("connection refused".to_string()));
            }
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    /// Emits the last packet it was given as the image
    struct LastPacketDecoder;

    #[async_trait]
    impl FrameDecoder for LastPacketDecoder {
        async fn decode(&self, _stream: &InboundStreamInfo, packets: &[Bytes]) -> Result<Bytes> {
            packets
                .last()
                .cloned()
                .ok_or_else(|| Error::Decode("no packets yet".to_string()))
        }
    }

    fn video_info() -> InboundStreamInfo {
        InboundStreamInfo {
            track_id: "video-1".to_string(),
            stream_id: "camera".to_string(),
            kind: MediaKind::Video,
            codec: CodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_sampled_frame_wire_format() {
        let frame = SampledFrame::new(1_700_000_000, b"");
        let json: serde_json::Value = serde_json::from_slice(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"timestamp": 1_700_000_000i64, "frameData": ""}));

        let frame = SampledFrame::new(1, b"\xff\xd8jpeg");
        let decoded = BASE64.decode(&frame.frame_data).unwrap();
        assert_eq!(decoded, b"\xff\xd8jpeg");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_publish_on_interval() {
        let publisher = Arc::new(RecordingPublisher::default());
        let sampler = Arc::new(FrameSampler::new(
            Some(Arc::clone(&publisher) as Arc<dyn FramePublisher>),
            "video-frames",
            Duration::from_secs(5),
        ));
        let (tx, rx) = watch::channel(false);

        let task = {
            let sampler = Arc::clone(&sampler);
            tokio::spawn(async move { sampler.run(&video_info(), &PacketTap::new(0), rx).await })
        };

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(publisher.published.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(11)).await;
        tx.send(true).unwrap();
        let ticks = task.await.unwrap();

        assert_eq!(ticks, 3);
        let published = publisher.published.lock();
        assert_eq!(published.len(), 3);
        assert!(published.iter().all(|(topic, _)| topic == "video-frames"));

        let frame: SampledFrame = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(frame.frame_data, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failures_do_not_stop_ticking() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let sampler = FrameSampler::new(
            Some(Arc::clone(&publisher) as Arc<dyn FramePublisher>),
            "video-frames",
            Duration::from_secs(5),
        );
        let (tx, rx) = watch::channel(false);

        let tap = PacketTap::new(0);
        let info = video_info();
        let run = sampler.run(&info, &tap, rx);
        let stop = async {
            tokio::time::sleep(Duration::from_secs(21)).await;
            tx.send(true).unwrap();
        };
        let (ticks, ()) = tokio::join!(run, stop);

        assert_eq!(ticks, 4);
        assert_eq!(publisher.failures.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_sampler_never_publishes() {
        let sampler = FrameSampler::disabled();
        assert!(!sampler.is_enabled());
        let (tx, rx) = watch::channel(false);

        let tap = PacketTap::new(0);
        let info = video_info();
        let run = sampler.run(&info, &tap, rx);
        let stop = async {
            tokio::time::sleep(Duration::from_secs(27)).await;
            tx.send(true).unwrap();
        };
        let (ticks, ()) = tokio::join!(run, stop);

        // Ticks still happen, they just do nothing
        assert_eq!(ticks, 5);
    }

    #[test]
    fn test_tap_keeps_most_recent_packets() {
        let tap = PacketTap::new(3);
        for i in 0u8..5 {
            tap.push(&[i, i]);
        }
        assert_eq!(tap.len(), 3);
        assert_eq!(
            tap.snapshot(),
            vec![Bytes::from_static(&[2, 2]), Bytes::from_static(&[3, 3]), Bytes::from_static(&[4, 4])]
        );

        let disabled = PacketTap::new(0);
        disabled.push(b"ignored");
        assert!(disabled.is_empty());
    }

    #[tokio::test]
    async fn test_decoder_output_is_published() {
        let publisher = Arc::new(RecordingPublisher::default());
        let sampler = FrameSampler::new(
            Some(Arc::clone(&publisher) as Arc<dyn FramePublisher>),
            "frames",
            Duration::from_secs(5),
        )
        .with_decoder(Arc::new(LastPacketDecoder));
        assert!(sampler.has_decoder());

        let tap = PacketTap::new(8);
        tap.push(b"older");
        tap.push(b"image");
        sampler.sample(&video_info(), &tap, 1).await;

        let published = publisher.published.lock();
        let frame: SampledFrame = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(BASE64.decode(frame.frame_data).unwrap(), b"image");
        assert!(frame.timestamp > 0);
    }

    #[tokio::test]
    async fn test_decode_failure_publishes_empty_frame() {
        let publisher = Arc::new(RecordingPublisher::default());
        let sampler = FrameSampler::new(
            Some(Arc::clone(&publisher) as Arc<dyn FramePublisher>),
            "frames",
            Duration::from_secs(5),
        )
        .with_decoder(Arc::new(LastPacketDecoder));

        sampler.sample(&video_info(), &PacketTap::new(8), 1).await;

        let published = publisher.published.lock();
        let frame: SampledFrame = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(frame.frame_data, "");
    }
}
