//! webrtc-rs backed negotiation engine

use super::engine::{ConnectivityState, EngineEvent, EngineFactory, NegotiationEngine};
use crate::config::RelayConfig;
use crate::media::{
    CodecCapability, InboundStream, InboundStreamInfo, MediaKind, PacketSink, PacketSource,
};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

/// Builds one [`WebRtcEngine`] per accepted connection
pub struct WebRtcEngineFactory {
    config: Arc<RelayConfig>,
}

impl WebRtcEngineFactory {
    pub fn new(config: Arc<RelayConfig>) -> Self {
        Self { config }
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(self.config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect()
    }
}

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    #[instrument(skip_all)]
    async fn create_session(
        &self,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Arc<dyn NegotiationEngine>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtc(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtc(format!("Failed to create peer connection: {}", e))
        })?);

        wire_events(&peer_connection, events);

        debug!("Peer connection created");

        Ok(Arc::new(WebRtcEngine { peer_connection }))
    }
}

/// Route peer connection callbacks into the session's event queue
fn wire_events(peer_connection: &RTCPeerConnection, events: mpsc::Sender<EngineEvent>) {
    let tx = events.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            let candidate = match candidate {
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => Some(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(e) => {
                        warn!("Failed to convert ICE candidate to JSON: {}", e);
                        return;
                    }
                },
                None => None,
            };
            let _ = tx.send(EngineEvent::LocalCandidate(candidate)).await;
        })
    }));

    let tx = events.clone();
    peer_connection.on_ice_connection_state_change(Box::new(
        move |state: RTCIceConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                let state = match state {
                    RTCIceConnectionState::New => ConnectivityState::New,
                    RTCIceConnectionState::Checking => ConnectivityState::Checking,
                    RTCIceConnectionState::Connected => ConnectivityState::Connected,
                    RTCIceConnectionState::Completed => ConnectivityState::Completed,
                    RTCIceConnectionState::Disconnected => ConnectivityState::Disconnected,
                    RTCIceConnectionState::Failed => ConnectivityState::Failed,
                    RTCIceConnectionState::Closed => ConnectivityState::Closed,
                    _ => return,
                };
                let _ = tx.send(EngineEvent::ConnectivityStateChanged(state)).await;
            })
        },
    ));

    let tx = events;
    peer_connection.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let tx = tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    RTPCodecType::Video => MediaKind::Video,
                    other => {
                        warn!("Ignoring track {} with unsupported kind {}", track.id(), other);
                        return;
                    }
                };

                let capability = track.codec().capability;
                let info = InboundStreamInfo {
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                    codec: CodecCapability {
                        mime_type: capability.mime_type,
                        clock_rate: capability.clock_rate,
                        channels: capability.channels,
                        sdp_fmtp_line: capability.sdp_fmtp_line,
                    },
                };

                info!(
                    "Track received: {} (type: {}, codec: {})",
                    info.track_id, info.kind, info.codec.mime_type
                );

                let stream = InboundStream {
                    info,
                    source: Arc::new(RemoteTrackSource(track)),
                };
                let _ = tx.send(EngineEvent::InboundStream(stream)).await;
            })
        },
    ));
}

/// Negotiation engine wrapping one `RTCPeerConnection`
pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcEngine {
    fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
            SdpType::Rollback => {
                return Err(Error::Sdp("Rollback descriptions are not supported".to_string()))
            }
        };
        parsed.map_err(|e| Error::Sdp(format!("Failed to parse session description: {}", e)))
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = Self::to_rtc(desc)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = Self::to_rtc(desc)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidate(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn create_outbound_stream(
        &self,
        inbound: &InboundStreamInfo,
    ) -> Result<Arc<dyn PacketSink>> {
        let capability = RTCRtpCodecCapability {
            mime_type: inbound.codec.mime_type.clone(),
            clock_rate: inbound.codec.clock_rate,
            channels: inbound.codec.channels,
            sdp_fmtp_line: inbound.codec.sdp_fmtp_line.clone(),
            rtcp_feedback: vec![],
        };

        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            inbound.track_id.clone(),
            inbound.stream_id.clone(),
        ));

        let sender = self
            .peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to add track: {}", e)))?;

        // Interceptors only run while someone drains RTCP from the sender
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        Ok(Arc::new(LocalTrackSink(track)))
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to close peer connection: {}", e)))
    }
}

/// Inbound RTP track as a packet source
struct RemoteTrackSource(Arc<TrackRemote>);

#[async_trait]
impl PacketSource for RemoteTrackSource {
    async fn read_packet(&self, buf: &mut [u8]) -> Result<usize> {
        let (packet, _) = self
            .0
            .read_rtp()
            .await
            .map_err(|e| Error::Relay(format!("RTP read failed: {}", e)))?;
        packet
            .marshal_to(buf)
            .map_err(|e| Error::Relay(format!("RTP marshal failed: {}", e)))
    }
}

/// Outbound RTP track as a packet sink
struct LocalTrackSink(Arc<TrackLocalStaticRTP>);

#[async_trait]
impl PacketSink for LocalTrackSink {
    async fn write_packet(&self, packet: &[u8]) -> Result<usize> {
        self.0
            .write(packet)
            .await
            .map_err(|e| Error::Relay(format!("RTP write failed: {}", e)))
    }
}
