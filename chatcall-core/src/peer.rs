//! Negotiation boundary
//!
//! [`NegotiationPeer`] wraps one webrtc-rs `RTCPeerConnection`. A fresh peer
//! is built for every call attempt and closed when the call ends; it is never
//! reused.
//!
//! Local ICE candidates are only logged. There is no signaling transport in
//! this crate, so nothing forwards them to the far end.

use crate::config::CallConfig;
use crate::media::{Adoption, LocalMediaStream, RemoteMediaStream, RemoteStreamSlot};
use crate::types::{CallId, SdpKind, SessionDescription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Negotiation errors
#[derive(Error, Debug)]
pub enum NegotiationError {
    /// Peer connection could not be built or a track could not be attached
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Description is empty, of the wrong kind, or not parseable SDP
    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    /// Creating or committing a description failed
    #[error("Description error: {0}")]
    Description(String),

    /// Peer connection already closed
    #[error("Peer connection closed")]
    Closed,
}

/// Called with the stream id when the first remote stream arrives
pub type RemoteStreamNotifier = Box<dyn Fn(String) + Send + Sync>;

fn build_api() -> Result<API, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| NegotiationError::PeerConnection(format!("Failed to register codecs: {}", e)))?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine).map_err(|e| {
        NegotiationError::PeerConnection(format!("Failed to register interceptors: {}", e))
    })?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// webrtc-rs configuration for a call config
pub fn rtc_configuration(config: &CallConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers()
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn from_rtc(desc: RTCSessionDescription) -> Option<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Some(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Some(SessionDescription::answer(desc.sdp)),
        _ => None,
    }
}

fn to_rtc(
    desc: &SessionDescription,
    expected: SdpKind,
) -> Result<RTCSessionDescription, NegotiationError> {
    if desc.kind != expected {
        return Err(NegotiationError::InvalidDescription(format!(
            "expected {:?}, got {:?}",
            expected, desc.kind
        )));
    }
    if desc.sdp.trim().is_empty() {
        return Err(NegotiationError::InvalidDescription(
            "SDP cannot be empty".to_string(),
        ));
    }
    let parsed = match expected {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    parsed.map_err(|e| NegotiationError::InvalidDescription(e.to_string()))
}

/// Peer connection for a single call attempt
pub struct NegotiationPeer {
    call_id: CallId,
    pc: Arc<RTCPeerConnection>,
    remote_slot: Arc<Mutex<Option<RemoteStreamSlot>>>,
    candidates: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl std::fmt::Debug for NegotiationPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationPeer")
            .field("call_id", &self.call_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl NegotiationPeer {
    /// Build a peer connection from the fixed configuration and register its handlers
    ///
    /// Returns the peer and the read side of its remote stream slot.
    ///
    /// # Errors
    ///
    /// Returns error if the webrtc-rs API or peer connection cannot be built
    #[tracing::instrument(skip(config, on_remote_stream), fields(call_id = %call_id))]
    pub async fn connect(
        call_id: CallId,
        config: &CallConfig,
        on_remote_stream: RemoteStreamNotifier,
    ) -> Result<(Self, watch::Receiver<Option<RemoteMediaStream>>), NegotiationError> {
        let api = build_api()?;
        let pc = Arc::new(
            api.new_peer_connection(rtc_configuration(config))
                .await
                .map_err(|e| {
                    tracing::error!("Failed to create peer connection: {}", e);
                    NegotiationError::PeerConnection(format!(
                        "Failed to create peer connection: {}",
                        e
                    ))
                })?,
        );
        tracing::debug!(ice_servers = config.ice_servers().len(), "Created peer connection");

        let (slot, remote_rx) = RemoteStreamSlot::new();
        let remote_slot = Arc::new(Mutex::new(Some(slot)));
        let candidates = Arc::new(AtomicUsize::new(0));

        let track_slot = Arc::clone(&remote_slot);
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let stream_id = track.stream_id();
                let adoption = track_slot
                    .lock()
                    .as_ref()
                    .map(|slot| slot.publish(stream_id.clone(), Arc::clone(&track)));
                match adoption {
                    Some(Adoption::New) => {
                        tracing::info!(call_id = %call_id, stream_id = %stream_id, "Remote stream arrived");
                        on_remote_stream(stream_id);
                    }
                    Some(Adoption::Joined) => {
                        tracing::debug!(call_id = %call_id, stream_id = %stream_id, "Remote track joined stream");
                    }
                    Some(Adoption::Ignored) => {
                        tracing::debug!(call_id = %call_id, stream_id = %stream_id, "Ignoring track of a second remote stream");
                    }
                    None => {
                        tracing::debug!(call_id = %call_id, "Remote track after close");
                    }
                }
                Box::pin(async {})
            },
        ));

        let gathered = Arc::clone(&candidates);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let gathered = Arc::clone(&gathered);
            Box::pin(async move {
                match candidate {
                    Some(candidate) => {
                        gathered.fetch_add(1, Ordering::SeqCst);
                        match candidate.to_json() {
                            Ok(init) => tracing::debug!(
                                call_id = %call_id,
                                candidate = %init.candidate,
                                "Local ICE candidate (no signaling channel, not forwarded)"
                            ),
                            Err(e) => tracing::warn!(call_id = %call_id, "Unserializable ICE candidate: {}", e),
                        }
                    }
                    None => tracing::debug!(call_id = %call_id, "ICE gathering complete"),
                }
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            tracing::debug!(call_id = %call_id, state = %state, "Peer connection state changed");
            Box::pin(async {})
        }));

        Ok((
            Self {
                call_id,
                pc,
                remote_slot,
                candidates,
                closed: AtomicBool::new(false),
            },
            remote_rx,
        ))
    }

    /// Call this peer belongs to
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// The underlying webrtc-rs connection, for stats and rendering
    pub fn rtc(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    /// Local ICE candidates gathered so far
    pub fn gathered_candidates(&self) -> usize {
        self.candidates.load(Ordering::SeqCst)
    }

    /// Whether [`NegotiationPeer::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.is_closed() {
            Err(NegotiationError::Closed)
        } else {
            Ok(())
        }
    }

    /// Attach every track of the local stream
    ///
    /// # Errors
    ///
    /// Returns error if a track cannot be added
    pub async fn attach(&self, stream: &LocalMediaStream) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        for track in stream.tracks() {
            let rtc: Arc<dyn TrackLocal + Send + Sync> = track.rtc_track();
            self.pc.add_track(rtc).await.map_err(|e| {
                NegotiationError::PeerConnection(format!(
                    "Failed to add {} track: {}",
                    track.kind(),
                    e
                ))
            })?;
            tracing::debug!(call_id = %self.call_id, track_id = %track.id(), "Attached local track");
        }
        Ok(())
    }

    /// Create an offer and commit it as the local description
    ///
    /// # Errors
    ///
    /// Returns error if the offer cannot be created or committed
    pub async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::Description(format!("Failed to create offer: {}", e)))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| {
                NegotiationError::Description(format!("Failed to set local description: {}", e))
            })?;
        tracing::debug!(call_id = %self.call_id, sdp_len = offer.sdp.len(), "Offer committed");
        Ok(SessionDescription::offer(offer.sdp))
    }

    /// Commit a remote offer, then create and commit the answer
    ///
    /// # Errors
    ///
    /// Returns error if the offer is invalid or the answer cannot be produced
    pub async fn accept_offer(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        let remote = to_rtc(offer, SdpKind::Offer)?;
        self.pc.set_remote_description(remote).await.map_err(|e| {
            NegotiationError::Description(format!("Failed to set remote description: {}", e))
        })?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::Description(format!("Failed to create answer: {}", e)))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| {
                NegotiationError::Description(format!("Failed to set local description: {}", e))
            })?;
        tracing::debug!(call_id = %self.call_id, sdp_len = answer.sdp.len(), "Answer committed");
        Ok(SessionDescription::answer(answer.sdp))
    }

    /// Commit the far end's answer to our offer
    ///
    /// # Errors
    ///
    /// Returns error if the answer is invalid or does not match the offer
    pub async fn accept_answer(&self, answer: &SessionDescription) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let remote = to_rtc(answer, SdpKind::Answer)?;
        self.pc.set_remote_description(remote).await.map_err(|e| {
            NegotiationError::Description(format!("Failed to set remote description: {}", e))
        })?;
        tracing::debug!(call_id = %self.call_id, "Remote answer committed");
        Ok(())
    }

    /// Currently committed local description
    pub async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.and_then(from_rtc)
    }

    /// Local description once ICE gathering has finished
    ///
    /// Carries every host candidate, so it can be handed over without
    /// trickling candidates separately.
    pub async fn gathered_local_description(&self) -> Option<SessionDescription> {
        let mut complete = self.pc.gathering_complete_promise().await;
        let _ = complete.recv().await;
        tracing::debug!(
            call_id = %self.call_id,
            candidates = self.gathered_candidates(),
            "ICE gathering finished"
        );
        self.local_description().await
    }

    /// Currently committed remote description
    pub async fn remote_description(&self) -> Option<SessionDescription> {
        self.pc.remote_description().await.and_then(from_rtc)
    }

    /// Close the connection and stop publishing remote streams
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns error if webrtc-rs fails to close the connection
    pub async fn close(&self) -> Result<(), NegotiationError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.remote_slot.lock().take();
        self.pc
            .close()
            .await
            .map_err(|e| NegotiationError::PeerConnection(format!("Failed to close: {}", e)))?;
        tracing::debug!(call_id = %self.call_id, "Peer connection closed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::media::{MediaDevices, SyntheticDevices};
    use crate::types::{MediaConstraints, MediaKind};

    async fn peer_with(constraints: MediaConstraints) -> NegotiationPeer {
        let devices = SyntheticDevices::new();
        let stream = devices.get_user_media(&constraints).await.unwrap();
        let (peer, _rx) =
            NegotiationPeer::connect(CallId::new(), &CallConfig::host_only(), Box::new(|_| {}))
                .await
                .unwrap();
        peer.attach(&stream).await.unwrap();
        peer
    }

    #[test]
    fn test_rtc_configuration_carries_ice_servers() {
        let rtc = rtc_configuration(&CallConfig::default());
        assert_eq!(rtc.ice_servers.len(), 2);
        assert_eq!(rtc.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }

    #[test]
    fn test_to_rtc_rejects_wrong_kind_and_empty() {
        let answer = SessionDescription::answer("v=0");
        assert!(matches!(
            to_rtc(&answer, SdpKind::Offer),
            Err(NegotiationError::InvalidDescription(_))
        ));
        let empty = SessionDescription::offer("  ");
        assert!(matches!(
            to_rtc(&empty, SdpKind::Offer),
            Err(NegotiationError::InvalidDescription(_))
        ));
    }

    #[tokio::test]
    async fn test_offer_sections_follow_tracks() {
        let peer = peer_with(MediaConstraints::video_call()).await;
        let offer = peer.create_offer().await.unwrap();
        assert!(offer.has_media(MediaKind::Audio));
        assert!(offer.has_media(MediaKind::Video));
        assert_eq!(peer.local_description().await.unwrap().kind, SdpKind::Offer);
        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_peers() {
        let caller = peer_with(MediaConstraints::audio_only()).await;
        let callee = peer_with(MediaConstraints::audio_only()).await;

        let offer = caller.create_offer().await.unwrap();
        let answer = callee.accept_offer(&offer).await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        let committed = callee.remote_description().await.unwrap();
        assert_eq!(committed.kind, SdpKind::Offer);
        assert_eq!(committed.media_sections(), offer.media_sections());

        caller.accept_answer(&answer).await.unwrap();
        assert_eq!(
            caller.remote_description().await.unwrap().kind,
            SdpKind::Answer
        );

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_gathered_description_keeps_media_sections() {
        let peer = peer_with(MediaConstraints::video_call()).await;
        let offer = peer.create_offer().await.unwrap();
        let gathered = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            peer.gathered_local_description(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(gathered.kind, SdpKind::Offer);
        assert_eq!(gathered.media_sections(), offer.media_sections());
        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_offer_is_rejected() {
        let peer = peer_with(MediaConstraints::audio_only()).await;
        let result = peer
            .accept_offer(&SessionDescription::offer("this is not sdp"))
            .await;
        assert!(result.is_err());
        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_negotiation() {
        let peer = peer_with(MediaConstraints::audio_only()).await;
        peer.close().await.unwrap();
        peer.close().await.unwrap();
        assert!(peer.is_closed());
        assert!(matches!(peer.create_offer().await, Err(NegotiationError::Closed)));
    }
}
