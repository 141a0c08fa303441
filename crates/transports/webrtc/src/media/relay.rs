//! Loopback media relay
//!
//! For every inbound track the relay creates a matching outbound track and
//! copies packets across unmodified until either side fails or the session
//! shuts down. There is no backpressure between the two sides: a slow write
//! stalls the read loop and the engine buffers or drops upstream.

use super::sampler::{FrameSampler, PacketTap};
use super::{InboundStream, MediaKind, PacketSink, PacketSource};
use crate::peer::NegotiationEngine;
use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Packets kept per video track for the frame decoder
const FRAME_TAP_PACKETS: usize = 512;

/// Counters for one finished forwarding loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub packets: u64,
    pub bytes: u64,
}

/// Starts relay bindings for accepted inbound tracks
pub struct MediaRelay {
    buffer_size: usize,
    sampler: Arc<FrameSampler>,
}

impl MediaRelay {
    pub fn new(buffer_size: usize, sampler: Arc<FrameSampler>) -> Self {
        Self {
            buffer_size,
            sampler,
        }
    }

    /// Bind `inbound` to a new outbound track and spawn its tasks
    ///
    /// Returns the forwarding task and, for video, the sampler task. The
    /// forwarding task stops when `shutdown` flips to `true`, its sender is
    /// dropped, or either side of the binding fails. The sampler stops with
    /// the forwarding task.
    pub async fn start(
        &self,
        inbound: InboundStream,
        engine: &dyn NegotiationEngine,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let sink = engine.create_outbound_stream(&inbound.info).await?;
        let info = inbound.info;

        info!(
            track_id = %info.track_id,
            stream_id = %info.stream_id,
            kind = %info.kind,
            codec = %info.codec.mime_type,
            "Relaying inbound track"
        );

        let mut tasks = Vec::with_capacity(2);

        // Flipped (or dropped) when forwarding ends for any reason
        let (ended_tx, ended_rx) = watch::channel(false);
        let tap = Arc::new(PacketTap::new(FRAME_TAP_PACKETS));
        let tee = info.kind == MediaKind::Video && self.sampler.has_decoder();

        if info.kind == MediaKind::Video {
            let sampler = Arc::clone(&self.sampler);
            let sampler_info = info.clone();
            let tap = Arc::clone(&tap);
            tasks.push(tokio::spawn(async move {
                sampler.run(&sampler_info, &tap, ended_rx).await;
            }));
        }

        let source = inbound.source;
        let buffer_size = self.buffer_size;
        tasks.push(tokio::spawn(async move {
            let tap = tee.then_some(tap.as_ref());
            let stats = forward(source.as_ref(), sink.as_ref(), buffer_size, tap, shutdown).await;
            let _ = ended_tx.send(true);
            info!(
                track_id = %info.track_id,
                packets = stats.packets,
                bytes = stats.bytes,
                "Relay for track ended"
            );
        }));

        Ok(tasks)
    }
}

/// Copy packets from `source` to `sink` until either fails or shutdown
///
/// Every forwarded packet is also recorded in `tap`, if given.
pub async fn forward(
    source: &dyn PacketSource,
    sink: &dyn PacketSink,
    buffer_size: usize,
    tap: Option<&PacketTap>,
    mut shutdown: watch::Receiver<bool>,
) -> RelayStats {
    let mut stats = RelayStats::default();
    let mut buf = vec![0u8; buffer_size];

    if *shutdown.borrow() {
        return stats;
    }

    loop {
        let len = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("Relay stopping on session shutdown");
                break;
            }
            read = source.read_packet(&mut buf) => match read {
                Ok(len) => len,
                Err(e) => {
                    debug!("Relay read ended: {}", e);
                    break;
                }
            },
        };

        if let Err(e) = sink.write_packet(&buf[..len]).await {
            debug!("Relay write ended: {}", e);
            break;
        }

        if let Some(tap) = tap {
            tap.push(&buf[..len]);
        }

        stats.packets += 1;
        stats.bytes += len as u64;
    }

    stats
}
