//! Media relay and frame sampling
//!
//! The relay loops every inbound track back to the client; the sampler
//! periodically publishes a frame record for relayed video tracks.

pub mod publisher;
pub mod relay;
pub mod sampler;

pub use publisher::RedisPublisher;
pub use relay::{MediaRelay, RelayStats};
pub use sampler::{FrameDecoder, FramePublisher, FrameSampler, PacketTap, SampledFrame};

use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Codec capability advertised for a track
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodecCapability {
    /// e.g. `video/VP8`, `audio/opus`
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

/// Description of an accepted inbound track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundStreamInfo {
    /// Track identifier
    pub track_id: String,

    /// Stream-group identifier; the outbound track reuses it so the client
    /// pairs both directions
    pub stream_id: String,

    pub kind: MediaKind,

    pub codec: CodecCapability,
}

/// Readable side of a relay binding
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// Read one packet into `buf`, returning its length
    async fn read_packet(&self, buf: &mut [u8]) -> Result<usize>;
}

/// Writable side of a relay binding
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Write one packet unmodified
    async fn write_packet(&self, packet: &[u8]) -> Result<usize>;
}

/// An inbound track handed over by the negotiation engine
#[derive(Clone)]
pub struct InboundStream {
    pub info: InboundStreamInfo,
    pub source: Arc<dyn PacketSource>,
}

impl fmt::Debug for InboundStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundStream")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
