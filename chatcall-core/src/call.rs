//! Call session management
//!
//! [`CallSession`] owns everything a single call needs: the local media
//! stream, the peer connection, the remote stream slot and the elapsed
//! duration. A session holds at most one call at a time.
//!
//! ```text
//!     Idle ◄──────────────────────────────────────────┐
//!       │ start / answer                              │
//!       ▼                                             │
//!   Acquiring ── device error ───────────────────────►│
//!       │ local media                                 │
//!       ▼                                             │
//!  Negotiating ── negotiation error (media stopped) ─►│
//!       │ offer / answer committed                    │
//!       ▼                                             │
//!    Active ───────────────── end ───────────────────►┘
//! ```
//!
//! `end` may run from any phase. When it runs while `start`/`answer` is still
//! suspended, the pending operation releases what it obtained and returns
//! [`CallError::Cancelled`] instead of committing.
//!
//! The shared state sits behind a `parking_lot` mutex that is never held
//! across an `.await`, so a session can be shared between the view layer and
//! any number of tasks through an `Arc`.

use crate::config::{CallConfig, ConfigError};
use crate::identity::{PartyId, PartyIdentity};
use crate::media::{LocalMediaStream, MediaDevices, MediaError, RemoteMediaStream};
use crate::peer::{NegotiationError, NegotiationPeer};
use crate::types::{
    CallEnded, CallEvent, CallId, CallPhase, CallStatus, MediaConstraints, SessionDescription,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

/// Call management errors
#[derive(Error, Debug)]
pub enum CallError {
    /// Local media could not be obtained
    #[error("Device acquisition failed: {0}")]
    DeviceAcquisition(#[from] MediaError),

    /// Peer connection or session description failure
    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Another call is in progress on this session
    #[error("A call is already in progress")]
    CallAlreadyActive,

    /// Operation needs an active call
    #[error("No active call")]
    NoActiveCall,

    /// `end` ran before the operation could commit
    #[error("Call ended before setup completed")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Observer run once per ended call, after the session is back to idle
pub type CallEndedHook<I> = Arc<dyn Fn(&CallEnded<I>) + Send + Sync>;

/// Result of a successful [`CallSession::start`]
///
/// The offer still has to reach the far end through whatever channel the
/// application uses.
#[derive(Debug, Clone)]
pub struct OutgoingCall {
    /// Call identifier
    pub call_id: CallId,
    /// Local tracks, for the self-view
    pub local_stream: LocalMediaStream,
    /// Peer connection of the call
    pub peer: Arc<NegotiationPeer>,
    /// Committed local offer
    pub offer: SessionDescription,
}

/// Result of a successful [`CallSession::answer`]
#[derive(Debug, Clone)]
pub struct AnsweredCall {
    /// Call identifier
    pub call_id: CallId,
    /// Local tracks, for the self-view
    pub local_stream: LocalMediaStream,
    /// Peer connection of the call
    pub peer: Arc<NegotiationPeer>,
    /// Committed local answer, absent when no offer was supplied
    pub answer: Option<SessionDescription>,
}

struct CallSlot<I: PartyIdentity> {
    call_id: CallId,
    phase: CallPhase,
    party: Option<I>,
    local: Option<LocalMediaStream>,
    peer: Option<Arc<NegotiationPeer>>,
    remote: Option<watch::Receiver<Option<RemoteMediaStream>>>,
    duration_secs: u64,
}

impl<I: PartyIdentity> CallSlot<I> {
    fn acquiring(call_id: CallId) -> Self {
        Self {
            call_id,
            phase: CallPhase::Acquiring,
            party: None,
            local: None,
            peer: None,
            remote: None,
            duration_secs: 0,
        }
    }

    fn audio_enabled(&self) -> Option<bool> {
        self.local
            .as_ref()
            .and_then(LocalMediaStream::audio_track)
            .map(|t| t.is_enabled())
    }

    fn video_enabled(&self) -> Option<bool> {
        self.local
            .as_ref()
            .and_then(LocalMediaStream::video_track)
            .map(|t| t.is_enabled())
    }

    fn remote_stream(&self) -> Option<RemoteMediaStream> {
        self.remote.as_ref().and_then(|rx| rx.borrow().clone())
    }
}

/// Resources obtained by an in-flight `start`/`answer`, not yet committed
struct Prepared {
    local: LocalMediaStream,
    peer: Arc<NegotiationPeer>,
    remote: watch::Receiver<Option<RemoteMediaStream>>,
}

impl Prepared {
    async fn release(self) {
        self.local.stop_all();
        if let Err(e) = self.peer.close().await {
            tracing::warn!(call_id = %self.peer.call_id(), "Failed to close peer connection: {}", e);
        }
    }
}

/// Builder for [`CallSession`]
pub struct CallSessionBuilder<I: PartyIdentity> {
    config: CallConfig,
    devices: Arc<dyn MediaDevices>,
    on_call_ended: Option<CallEndedHook<I>>,
}

impl<I: PartyIdentity> CallSessionBuilder<I> {
    /// Use this configuration instead of the default STUN servers
    #[must_use]
    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `hook` once per ended call
    #[must_use]
    pub fn on_call_ended(mut self, hook: impl Fn(&CallEnded<I>) + Send + Sync + 'static) -> Self {
        self.on_call_ended = Some(Arc::new(hook));
        self
    }

    /// Build the session
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn build(self) -> Result<CallSession<I>, CallError> {
        self.config.validate()?;
        let (events, _) = broadcast::channel(self.config.event_capacity());
        Ok(CallSession {
            config: self.config,
            devices: self.devices,
            slot: Mutex::new(None),
            events,
            on_call_ended: self.on_call_ended,
        })
    }
}

/// Call session manager
///
/// The generic parameter `I` is the remote party identity; [`PartyId`] is
/// the plain user-id form used by the messenger.
///
/// Views read state through the accessors ([`CallSession::status`],
/// [`CallSession::is_muted`], ...) or by subscribing to [`CallEvent`]s; they
/// never touch the peer connection or the tracks directly.
pub struct CallSession<I: PartyIdentity = PartyId> {
    config: CallConfig,
    devices: Arc<dyn MediaDevices>,
    slot: Mutex<Option<CallSlot<I>>>,
    events: broadcast::Sender<CallEvent<I>>,
    on_call_ended: Option<CallEndedHook<I>>,
}

impl<I: PartyIdentity> CallSession<I> {
    /// Start building a session on top of the given devices
    pub fn builder(devices: Arc<dyn MediaDevices>) -> CallSessionBuilder<I> {
        CallSessionBuilder {
            config: CallConfig::default(),
            devices,
            on_call_ended: None,
        }
    }

    /// Session with the given configuration and no call-ended hook
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: CallConfig, devices: Arc<dyn MediaDevices>) -> Result<Self, CallError> {
        Self::builder(devices).config(config).build()
    }

    /// The fixed configuration every peer connection is built from
    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Subscribe to call events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent<I>> {
        self.events.subscribe()
    }

    /// Place a call
    ///
    /// Acquires audio (and 720p video when `wants_video`), builds a fresh peer
    /// connection, attaches the tracks, then creates and commits an offer.
    ///
    /// # Errors
    ///
    /// - `CallAlreadyActive` unless the session is idle
    /// - `DeviceAcquisition` if local media cannot be obtained
    /// - `Negotiation` if the connection or offer fails
    /// - `Cancelled` if [`CallSession::end`] ran meanwhile
    ///
    /// Nothing stays allocated after an error.
    #[tracing::instrument(skip(self), fields(party = %party))]
    pub async fn start(&self, party: I, wants_video: bool) -> Result<OutgoingCall, CallError> {
        let call_id = self.begin()?;
        tracing::info!(call_id = %call_id, video = wants_video, "Starting call");

        let prepared = match self
            .prepare(call_id, &MediaConstraints::for_call(wants_video))
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.abandon(call_id, &party, e)),
        };

        let offer = match prepared.peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                prepared.release().await;
                return Err(self.abandon(call_id, &party, e.into()));
            }
        };

        let local_stream = prepared.local.clone();
        let peer = Arc::clone(&prepared.peer);
        if let Err(prepared) = self.commit(call_id, party.clone(), prepared) {
            prepared.release().await;
            return Err(self.abandon(call_id, &party, CallError::Cancelled));
        }

        let _ = self.events.send(CallEvent::CallStarted {
            call_id,
            party,
            video: wants_video,
        });
        tracing::info!(call_id = %call_id, "Call started, offer ready");

        Ok(OutgoingCall {
            call_id,
            local_stream,
            peer,
            offer,
        })
    }

    /// Accept an incoming call
    ///
    /// Performs the same acquisition and connection setup as
    /// [`CallSession::start`]. With an offer, the offer is committed as remote
    /// description and an answer is created, committed and returned. Without
    /// one, negotiation is left to [`CallSession::complete_negotiation`].
    ///
    /// # Errors
    ///
    /// Same as [`CallSession::start`]; an invalid offer is a `Negotiation` error.
    #[tracing::instrument(skip(self, offer), fields(party = %party, has_offer = offer.is_some()))]
    pub async fn answer(
        &self,
        party: I,
        wants_video: bool,
        offer: Option<SessionDescription>,
    ) -> Result<AnsweredCall, CallError> {
        let call_id = self.begin()?;
        tracing::info!(call_id = %call_id, video = wants_video, "Answering call");

        let prepared = match self
            .prepare(call_id, &MediaConstraints::for_call(wants_video))
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.abandon(call_id, &party, e)),
        };

        let answer = match &offer {
            Some(offer) => match prepared.peer.accept_offer(offer).await {
                Ok(answer) => Some(answer),
                Err(e) => {
                    prepared.release().await;
                    return Err(self.abandon(call_id, &party, e.into()));
                }
            },
            None => None,
        };

        let local_stream = prepared.local.clone();
        let peer = Arc::clone(&prepared.peer);
        if let Err(prepared) = self.commit(call_id, party.clone(), prepared) {
            prepared.release().await;
            return Err(self.abandon(call_id, &party, CallError::Cancelled));
        }

        let _ = self.events.send(CallEvent::CallAnswered {
            call_id,
            party,
            video: wants_video,
            negotiated: answer.is_some(),
        });
        tracing::info!(call_id = %call_id, negotiated = answer.is_some(), "Call answered");

        Ok(AnsweredCall {
            call_id,
            local_stream,
            peer,
            answer,
        })
    }

    /// Finish a deferred negotiation on the answering side
    ///
    /// # Errors
    ///
    /// `NoActiveCall` without an active call, `Negotiation` if the offer is
    /// rejected
    pub async fn complete_negotiation(
        &self,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        let peer = self.active_peer()?;
        let answer = peer.accept_offer(offer).await?;
        tracing::info!(call_id = %peer.call_id(), "Deferred negotiation completed");
        Ok(answer)
    }

    /// Commit the far end's answer to the offer returned by [`CallSession::start`]
    ///
    /// # Errors
    ///
    /// `NoActiveCall` without an active call, `Negotiation` if the answer is
    /// rejected
    pub async fn accept_answer(&self, answer: &SessionDescription) -> Result<(), CallError> {
        let peer = self.active_peer()?;
        peer.accept_answer(answer).await?;
        Ok(())
    }

    /// Hang up
    ///
    /// Stops every local track, closes the peer connection, drops the remote
    /// stream and resets all derived state. Does nothing when idle, so it can
    /// be called any number of times and from several places at once; the
    /// call-ended hook runs once per call.
    #[tracing::instrument(skip(self))]
    pub async fn end(&self) {
        let Some(call) = self.slot.lock().take() else {
            tracing::trace!("No call to end");
            return;
        };

        let stopped = call.local.as_ref().map(LocalMediaStream::stop_all).unwrap_or(0);
        if let Some(peer) = &call.peer {
            if let Err(e) = peer.close().await {
                tracing::warn!(call_id = %call.call_id, "Failed to close peer connection: {}", e);
            }
        }
        tracing::info!(
            call_id = %call.call_id,
            old_phase = ?call.phase,
            stopped_tracks = stopped,
            "Call ended"
        );
        self.notify_ended(call);
    }

    /// Flip the microphone; returns the resulting muted state
    ///
    /// Without a local audio track nothing changes.
    pub fn toggle_mute(&self) -> bool {
        let toggled = {
            let slot = self.slot.lock();
            slot.as_ref().and_then(|call| {
                let audio = call.local.as_ref()?.audio_track()?;
                audio.set_enabled(!audio.is_enabled());
                Some((call.call_id, !audio.is_enabled()))
            })
        };
        match toggled {
            Some((call_id, muted)) => {
                tracing::debug!(call_id = %call_id, muted, "Microphone toggled");
                let _ = self.events.send(CallEvent::MuteChanged { call_id, muted });
                muted
            }
            None => self.is_muted(),
        }
    }

    /// Flip the camera; returns the resulting video-enabled state
    ///
    /// Voice-only calls have no video track, so nothing changes.
    pub fn toggle_video(&self) -> bool {
        let toggled = {
            let slot = self.slot.lock();
            slot.as_ref().and_then(|call| {
                let video = call.local.as_ref()?.video_track()?;
                video.set_enabled(!video.is_enabled());
                Some((call.call_id, video.is_enabled()))
            })
        };
        match toggled {
            Some((call_id, enabled)) => {
                tracing::debug!(call_id = %call_id, enabled, "Camera toggled");
                let _ = self.events.send(CallEvent::VideoToggled { call_id, enabled });
                enabled
            }
            None => self.is_video_enabled(),
        }
    }

    /// Advance the call duration by one second
    ///
    /// Returns the new duration, or `None` when no call is active.
    pub fn tick(&self) -> Option<u64> {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(call) if call.phase == CallPhase::Active => {
                call.duration_secs += 1;
                Some(call.duration_secs)
            }
            _ => None,
        }
    }

    /// Wait for the far end's stream
    ///
    /// Resolves `None` if there is no call or the call ends first.
    pub async fn wait_for_remote_stream(&self) -> Option<RemoteMediaStream> {
        let mut rx = {
            let slot = self.slot.lock();
            slot.as_ref()?.remote.clone()?
        };
        let stream = match rx.wait_for(Option::is_some).await {
            Ok(stream) => (*stream).clone(),
            Err(_) => None,
        };
        stream
    }

    /// Current phase
    pub fn phase(&self) -> CallPhase {
        self.slot
            .lock()
            .as_ref()
            .map(|call| call.phase)
            .unwrap_or(CallPhase::Idle)
    }

    /// Whether a call is established
    pub fn is_active(&self) -> bool {
        self.phase() == CallPhase::Active
    }

    /// Whether the microphone track exists and is disabled
    pub fn is_muted(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .and_then(CallSlot::audio_enabled)
            .map(|enabled| !enabled)
            .unwrap_or(false)
    }

    /// Whether the camera track exists and is enabled
    pub fn is_video_enabled(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .and_then(CallSlot::video_enabled)
            .unwrap_or(false)
    }

    /// Far end of the active call
    pub fn remote_party(&self) -> Option<I> {
        self.slot.lock().as_ref().and_then(|call| call.party.clone())
    }

    /// Local tracks of the active call
    pub fn local_stream(&self) -> Option<LocalMediaStream> {
        self.slot.lock().as_ref().and_then(|call| call.local.clone())
    }

    /// Far end's stream, once it has arrived
    pub fn remote_stream(&self) -> Option<RemoteMediaStream> {
        self.slot.lock().as_ref().and_then(CallSlot::remote_stream)
    }

    /// Peer connection of the active call
    pub fn peer(&self) -> Option<Arc<NegotiationPeer>> {
        self.slot.lock().as_ref().and_then(|call| call.peer.clone())
    }

    /// Seconds the active call has been running
    pub fn duration_secs(&self) -> u64 {
        self.slot
            .lock()
            .as_ref()
            .map(|call| call.duration_secs)
            .unwrap_or(0)
    }

    /// Consistent snapshot of all derived state
    pub fn status(&self) -> CallStatus<I> {
        let slot = self.slot.lock();
        match slot.as_ref() {
            None => CallStatus::idle(),
            Some(call) => CallStatus {
                phase: call.phase,
                call_id: Some(call.call_id),
                active: call.phase == CallPhase::Active,
                video_enabled: call.video_enabled().unwrap_or(false),
                muted: call.audio_enabled().map(|e| !e).unwrap_or(false),
                remote_party: call.party.clone(),
                duration_secs: call.duration_secs,
                has_remote_stream: call.remote_stream().is_some(),
            },
        }
    }

    fn begin(&self) -> Result<CallId, CallError> {
        let mut slot = self.slot.lock();
        if let Some(call) = slot.as_ref() {
            tracing::warn!(call_id = %call.call_id, phase = ?call.phase, "Rejecting second call");
            return Err(CallError::CallAlreadyActive);
        }
        let call_id = CallId::new();
        *slot = Some(CallSlot::acquiring(call_id));
        tracing::debug!(
            call_id = %call_id,
            old_phase = ?CallPhase::Idle,
            new_phase = ?CallPhase::Acquiring,
            "Call state transition"
        );
        Ok(call_id)
    }

    /// Move an in-flight attempt to `phase`; `false` if it was ended meanwhile
    fn advance(&self, call_id: CallId, phase: CallPhase) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(call) if call.call_id == call_id => {
                tracing::debug!(
                    call_id = %call_id,
                    old_phase = ?call.phase,
                    new_phase = ?phase,
                    "Call state transition"
                );
                call.phase = phase;
                true
            }
            _ => false,
        }
    }

    async fn prepare(
        &self,
        call_id: CallId,
        constraints: &MediaConstraints,
    ) -> Result<Prepared, CallError> {
        let local = self.devices.get_user_media(constraints).await?;

        if !self.advance(call_id, CallPhase::Negotiating) {
            local.stop_all();
            return Err(CallError::Cancelled);
        }

        let events = self.events.clone();
        let (peer, remote) = NegotiationPeer::connect(
            call_id,
            &self.config,
            Box::new(move |stream_id| {
                let _ = events.send(CallEvent::RemoteStreamArrived { call_id, stream_id });
            }),
        )
        .await
        .map_err(|e| {
            local.stop_all();
            CallError::from(e)
        })?;

        let prepared = Prepared {
            local,
            peer: Arc::new(peer),
            remote,
        };
        if let Err(e) = prepared.peer.attach(&prepared.local).await {
            prepared.release().await;
            return Err(e.into());
        }
        Ok(prepared)
    }

    /// Store the prepared resources; hands them back if the attempt was ended
    fn commit(&self, call_id: CallId, party: I, prepared: Prepared) -> Result<(), Prepared> {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(call) if call.call_id == call_id => {
                tracing::debug!(
                    call_id = %call_id,
                    old_phase = ?call.phase,
                    new_phase = ?CallPhase::Active,
                    "Call state transition"
                );
                call.phase = CallPhase::Active;
                call.party = Some(party);
                call.local = Some(prepared.local);
                call.peer = Some(prepared.peer);
                call.remote = Some(prepared.remote);
                Ok(())
            }
            _ => Err(prepared),
        }
    }

    /// Return a failed attempt to idle and pass its error through
    ///
    /// An attempt that `end` already took out of the slot reports `Cancelled`
    /// whatever failed afterwards; its `CallEnded` has already gone out.
    fn abandon(&self, call_id: CallId, party: &I, error: CallError) -> CallError {
        let owned = {
            let mut slot = self.slot.lock();
            let owned = slot.as_ref().map(|call| call.call_id) == Some(call_id);
            if owned {
                *slot = None;
            }
            owned
        };
        let error = if owned { error } else { CallError::Cancelled };

        if matches!(error, CallError::Cancelled) {
            tracing::info!(call_id = %call_id, "Call attempt cancelled by end()");
        } else {
            tracing::warn!(call_id = %call_id, "Call attempt failed: {}", error);
            let _ = self.events.send(CallEvent::CallFailed {
                call_id,
                party: party.clone(),
                error: error.to_string(),
            });
        }
        error
    }

    fn active_peer(&self) -> Result<Arc<NegotiationPeer>, CallError> {
        let slot = self.slot.lock();
        match slot.as_ref() {
            Some(call) if call.phase == CallPhase::Active => {
                call.peer.clone().ok_or(CallError::NoActiveCall)
            }
            _ => Err(CallError::NoActiveCall),
        }
    }

    fn notify_ended(&self, call: CallSlot<I>) {
        let ended = CallEnded {
            call_id: call.call_id,
            party: call.party,
            duration_secs: call.duration_secs,
            ended_at: Utc::now(),
        };
        let _ = self.events.send(CallEvent::CallEnded(ended.clone()));
        if let Some(hook) = &self.on_call_ended {
            hook(&ended);
        }
    }
}

impl<I: PartyIdentity> Drop for CallSession<I> {
    fn drop(&mut self) {
        let Some(call) = self.slot.get_mut().take() else {
            return;
        };
        tracing::debug!(call_id = %call.call_id, "Session dropped during a call, tearing down");

        if let Some(local) = &call.local {
            local.stop_all();
        }
        if let Some(peer) = call.peer.clone() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = peer.close().await {
                            tracing::warn!(call_id = %peer.call_id(), "Failed to close peer connection: {}", e);
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!(call_id = %call.call_id, "No runtime to close peer connection on drop");
                }
            }
        }
        self.notify_ended(call);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::media::{AccessPolicy, SyntheticDevices};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(devices: Arc<SyntheticDevices>) -> CallSession<PartyId> {
        CallSession::new(CallConfig::host_only(), devices).unwrap()
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = session(Arc::new(SyntheticDevices::new()));
        assert_eq!(session.phase(), CallPhase::Idle);
        assert_eq!(session.status(), CallStatus::idle());
        assert!(!session.toggle_mute());
        assert!(!session.toggle_video());
        assert_eq!(session.tick(), None);
    }

    #[test]
    fn test_builder_uses_event_capacity_from_config() {
        let config =
            CallConfig::from_json_str(r#"{"ice_servers":[],"event_capacity":4}"#).unwrap();
        let session = CallSession::<PartyId>::builder(Arc::new(SyntheticDevices::new()))
            .config(config)
            .build()
            .unwrap();
        assert_eq!(session.config().event_capacity(), 4);
        assert_eq!(session.config().ice_urls().count(), 0);
    }

    #[tokio::test]
    async fn test_start_commits_state() {
        let devices = Arc::new(SyntheticDevices::new());
        let session = session(Arc::clone(&devices));

        let call = session.start(PartyId::new("u1"), true).await.unwrap();
        assert!(session.is_active());
        assert!(session.is_video_enabled());
        assert!(!session.is_muted());
        assert_eq!(session.remote_party(), Some(PartyId::new("u1")));
        assert_eq!(session.status().call_id, Some(call.call_id));
        assert_eq!(devices.open_handles(), 2);

        session.end().await;
        assert_eq!(devices.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_device_failure_emits_call_failed() {
        let devices = Arc::new(SyntheticDevices::new().with_policy(AccessPolicy::Busy));
        let session = session(devices);
        let mut events = session.subscribe();

        let err = session.start(PartyId::new("u1"), false).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::DeviceAcquisition(MediaError::DeviceBusy(_))
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            CallEvent::CallFailed { .. }
        ));
        assert_eq!(session.phase(), CallPhase::Idle);
    }

    #[tokio::test]
    async fn test_drop_fires_hook_once() {
        let ended = Arc::new(AtomicUsize::new(0));
        let devices = Arc::new(SyntheticDevices::new());
        let counter = Arc::clone(&ended);
        let session = CallSession::<PartyId>::builder(Arc::clone(&devices) as Arc<dyn MediaDevices>)
            .config(CallConfig::host_only())
            .on_call_ended(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        session.start(PartyId::new("u1"), false).await.unwrap();
        drop(session);

        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert_eq!(devices.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_accept_answer_requires_active_call() {
        let session = session(Arc::new(SyntheticDevices::new()));
        let result = session
            .accept_answer(&SessionDescription::answer("v=0"))
            .await;
        assert!(matches!(result, Err(CallError::NoActiveCall)));
    }
}
