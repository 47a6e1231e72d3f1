//! Local and remote media
//!
//! This module holds the device boundary of a call:
//!
//! - [`MediaDevices`] is the capability that turns [`MediaConstraints`] into a
//!   [`LocalMediaStream`]. It must fail with distinct errors for permission
//!   denial, a missing device, and a busy device.
//! - [`LocalTrack`] wraps the webrtc-rs sample track attached to the peer
//!   connection together with the enabled/stopped flags that mute and video
//!   toggles act on. The enabled flag is the single source of truth for the
//!   `muted`/`video_enabled` state the view layer sees.
//! - [`RemoteMediaStream`] is the far end's stream, published once per call
//!   through a watch slot fed by the peer connection's track handler.
//! - [`SyntheticDevices`] is an in-process device implementation used by the
//!   terminal front-end and the tests.

use crate::types::{MediaConstraints, MediaKind, VideoResolution};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Media-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The user or platform refused access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No device of the requested kind
    #[error("Device not found: {0}")]
    DeviceNotFound(MediaKind),

    /// Device exists but is held by someone else
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// Track-level failure
    #[error("Track error: {0}")]
    TrackError(String),
}

/// Callback run once when a track stops, handing the device back
pub type DeviceRelease = Box<dyn FnOnce() + Send + Sync>;

struct LocalTrackInner {
    id: String,
    kind: MediaKind,
    device_id: String,
    resolution: Option<VideoResolution>,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
    release: Mutex<Option<DeviceRelease>>,
}

/// One local audio or video track
///
/// Clones share the same underlying track and flags.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<LocalTrackInner>,
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("device_id", &self.inner.device_id)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Codec a local track of this kind is created with
pub fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

impl LocalTrack {
    /// Create an enabled track bound to a device
    ///
    /// `release` runs exactly once, on the first [`LocalTrack::stop`].
    pub fn new(
        kind: MediaKind,
        stream_id: &str,
        device_id: impl Into<String>,
        resolution: Option<VideoResolution>,
        release: Option<DeviceRelease>,
    ) -> Self {
        let id = format!("{}-{}", kind, Uuid::new_v4());
        let rtc = Arc::new(TrackLocalStaticSample::new(
            codec_for(kind),
            id.clone(),
            stream_id.to_owned(),
        ));
        Self {
            inner: Arc::new(LocalTrackInner {
                id,
                kind,
                device_id: device_id.into(),
                resolution,
                rtc,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                release: Mutex::new(release),
            }),
        }
    }

    /// Track identifier
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Audio or video
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// Device the track was captured from
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Capture resolution, for video tracks
    pub fn resolution(&self) -> Option<VideoResolution> {
        self.inner.resolution
    }

    /// The webrtc-rs track attached to the peer connection
    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.inner.rtc)
    }

    /// Whether media currently flows from this track
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable the track; ignored once stopped
    pub fn set_enabled(&self, enabled: bool) {
        if !self.is_stopped() {
            self.inner.enabled.store(enabled, Ordering::SeqCst);
        }
    }

    /// Whether the track has been stopped
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stop the track and hand the device back
    ///
    /// Returns `false` if the track was already stopped.
    pub fn stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.enabled.store(false, Ordering::SeqCst);
        if let Some(release) = self.inner.release.lock().take() {
            release();
        }
        tracing::debug!(track_id = %self.inner.id, kind = %self.inner.kind, "Local track stopped");
        true
    }

    /// Push one media sample to the far end
    ///
    /// Samples written while the track is disabled or stopped are dropped;
    /// returns whether the sample was forwarded.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying track rejects the sample
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool, MediaError> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(false);
        }
        self.inner
            .rtc
            .write_sample(sample)
            .await
            .map_err(|e| MediaError::TrackError(e.to_string()))?;
        Ok(true)
    }
}

/// The local tracks obtained for one call
#[derive(Debug, Clone)]
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalMediaStream {
    /// Group tracks into a stream
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Stream identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All tracks, audio first
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// The microphone track, if any
    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == MediaKind::Audio)
    }

    /// The camera track, if any
    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == MediaKind::Video)
    }

    /// Stop every track; returns how many were still running
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }

    /// Whether every track has been stopped
    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(LocalTrack::is_stopped)
    }
}

/// Media received from the far end
#[derive(Clone)]
pub struct RemoteMediaStream {
    id: String,
    tracks: Vec<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteMediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

impl RemoteMediaStream {
    /// Remote stream identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote tracks, in arrival order
    pub fn tracks(&self) -> &[Arc<TrackRemote>] {
        &self.tracks
    }
}

/// What the slot does with an incoming remote track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Adoption {
    /// First stream of the call
    New,
    /// Another track of the stream already held
    Joined,
    /// Track of a later stream
    Ignored,
}

pub(crate) fn adoption(current: Option<&str>, incoming: &str) -> Adoption {
    match current {
        None => Adoption::New,
        Some(id) if id == incoming => Adoption::Joined,
        Some(_) => Adoption::Ignored,
    }
}

/// Write side of the per-call remote stream slot
///
/// Only the first remote stream is kept; further tracks of that stream are
/// appended, tracks of other streams are dropped.
pub(crate) struct RemoteStreamSlot {
    tx: watch::Sender<Option<RemoteMediaStream>>,
}

impl RemoteStreamSlot {
    pub(crate) fn new() -> (Self, watch::Receiver<Option<RemoteMediaStream>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    pub(crate) fn publish(&self, stream_id: String, track: Arc<TrackRemote>) -> Adoption {
        let mut outcome = Adoption::Ignored;
        self.tx.send_if_modified(|current| {
            outcome = adoption(current.as_ref().map(|s| s.id.as_str()), &stream_id);
            match outcome {
                Adoption::New => {
                    *current = Some(RemoteMediaStream {
                        id: stream_id.clone(),
                        tracks: vec![Arc::clone(&track)],
                    });
                    true
                }
                Adoption::Joined => {
                    if let Some(stream) = current.as_mut() {
                        stream.tracks.push(Arc::clone(&track));
                    }
                    true
                }
                Adoption::Ignored => false,
            }
        });
        outcome
    }
}

/// Device acquisition capability
///
/// Implementations return a stream with one audio track when
/// `constraints.audio` is set and one video track when `constraints.video`
/// is set, audio first.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire local media matching the constraints
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` if access is refused
    /// - `DeviceNotFound` if a requested kind has no device
    /// - `DeviceBusy` if the device cannot be opened
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, MediaError>;
}

/// How [`SyntheticDevices`] answers acquisition requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Hand out tracks
    Granted,
    /// Refuse as if the user declined the prompt
    Denied,
    /// Refuse as if another application holds the devices
    Busy,
}

/// In-process media devices
///
/// Produces real webrtc-rs sample tracks without touching hardware. The
/// number of tracks not yet stopped is tracked so callers can check that
/// every device handle was released.
pub struct SyntheticDevices {
    microphone: Option<String>,
    camera: Option<String>,
    policy: Mutex<AccessPolicy>,
    open_handles: Arc<AtomicUsize>,
    acquisitions: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevices {
    /// Microphone and camera present, access granted
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            microphone: Some("default-audio".to_string()),
            camera: Some("default-video".to_string()),
            policy: Mutex::new(AccessPolicy::Granted),
            open_handles: Arc::new(AtomicUsize::new(0)),
            acquisitions: AtomicUsize::new(0),
            gate,
        }
    }

    /// Remove the camera
    #[must_use]
    pub fn without_camera(mut self) -> Self {
        self.camera = None;
        self
    }

    /// Remove the microphone
    #[must_use]
    pub fn without_microphone(mut self) -> Self {
        self.microphone = None;
        self
    }

    /// Start with the given policy
    #[must_use]
    pub fn with_policy(self, policy: AccessPolicy) -> Self {
        *self.policy.lock() = policy;
        self
    }

    /// Change the policy for later acquisitions
    pub fn set_policy(&self, policy: AccessPolicy) {
        *self.policy.lock() = policy;
    }

    /// Suspend acquisitions until [`SyntheticDevices::release`] is called
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Let suspended and future acquisitions proceed
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Tracks handed out and not yet stopped
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Number of `get_user_media` calls seen
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    fn open_track(
        &self,
        kind: MediaKind,
        stream_id: &str,
        device_id: &str,
        resolution: Option<VideoResolution>,
    ) -> LocalTrack {
        let handles = Arc::clone(&self.open_handles);
        handles.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            kind = %kind,
            device_id,
            width = resolution.map(|r| r.width()),
            height = resolution.map(|r| r.height()),
            "Opened capture device"
        );
        let release: DeviceRelease = Box::new(move || {
            handles.fetch_sub(1, Ordering::SeqCst);
        });
        LocalTrack::new(kind, stream_id, device_id, resolution, Some(release))
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    #[tracing::instrument(skip(self))]
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalMediaStream, MediaError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(MediaError::TrackError("device gate closed".to_string()));
        }

        let mut devices = Vec::with_capacity(2);
        for kind in constraints.kinds() {
            let device = match kind {
                MediaKind::Audio => &self.microphone,
                MediaKind::Video => &self.camera,
            };
            match device {
                Some(id) => devices.push((kind, id.clone())),
                None => return Err(MediaError::DeviceNotFound(kind)),
            }
        }

        match *self.policy.lock() {
            AccessPolicy::Granted => {}
            AccessPolicy::Denied => {
                tracing::warn!("Media access denied");
                return Err(MediaError::PermissionDenied(
                    "user declined media access".to_string(),
                ));
            }
            AccessPolicy::Busy => {
                return Err(MediaError::DeviceBusy(
                    "capture device in use".to_string(),
                ));
            }
        }

        let stream_id = format!("local-{}", Uuid::new_v4());
        let tracks: Vec<LocalTrack> = devices
            .into_iter()
            .map(|(kind, device_id)| {
                let resolution = match kind {
                    MediaKind::Audio => None,
                    MediaKind::Video => constraints.video,
                };
                self.open_track(kind, &stream_id, &device_id, resolution)
            })
            .collect();

        tracing::info!(
            stream_id = %stream_id,
            tracks = tracks.len(),
            video = constraints.has_video(),
            "Acquired local media"
        );
        Ok(LocalMediaStream::new(stream_id, tracks))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn test_audio_only_acquisition() {
        let devices = SyntheticDevices::new();
        let stream = devices
            .get_user_media(&MediaConstraints::audio_only())
            .await
            .unwrap();
        assert_eq!(stream.tracks().len(), 1);
        assert!(stream.audio_track().is_some());
        assert!(stream.video_track().is_none());
        assert_eq!(devices.open_handles(), 1);
    }

    #[tokio::test]
    async fn test_video_acquisition_records_resolution() {
        let devices = SyntheticDevices::new();
        let stream = devices
            .get_user_media(&MediaConstraints::video_call())
            .await
            .unwrap();
        let video = stream.video_track().unwrap();
        assert_eq!(video.resolution(), Some(VideoResolution::HD720));
        assert_eq!(stream.tracks()[0].kind(), MediaKind::Audio);
        assert_eq!(devices.open_handles(), 2);
    }

    #[tokio::test]
    async fn test_distinct_failures() {
        let no_camera = SyntheticDevices::new().without_camera();
        assert_eq!(
            no_camera
                .get_user_media(&MediaConstraints::video_call())
                .await
                .unwrap_err(),
            MediaError::DeviceNotFound(MediaKind::Video)
        );

        let denied = SyntheticDevices::new().with_policy(AccessPolicy::Denied);
        assert!(matches!(
            denied.get_user_media(&MediaConstraints::audio_only()).await,
            Err(MediaError::PermissionDenied(_))
        ));

        let busy = SyntheticDevices::new().with_policy(AccessPolicy::Busy);
        assert!(matches!(
            busy.get_user_media(&MediaConstraints::audio_only()).await,
            Err(MediaError::DeviceBusy(_))
        ));
        assert_eq!(busy.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_stop_releases_device_once() {
        let devices = SyntheticDevices::new();
        let stream = devices
            .get_user_media(&MediaConstraints::video_call())
            .await
            .unwrap();
        assert_eq!(stream.stop_all(), 2);
        assert_eq!(devices.open_handles(), 0);
        assert_eq!(stream.stop_all(), 0);
        assert_eq!(devices.open_handles(), 0);
        assert!(stream.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_track_cannot_be_re_enabled() {
        let devices = SyntheticDevices::new();
        let stream = devices
            .get_user_media(&MediaConstraints::audio_only())
            .await
            .unwrap();
        let audio = stream.audio_track().unwrap();
        audio.stop();
        audio.set_enabled(true);
        assert!(!audio.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_track_drops_samples() {
        let devices = SyntheticDevices::new();
        let stream = devices
            .get_user_media(&MediaConstraints::audio_only())
            .await
            .unwrap();
        let audio = stream.audio_track().unwrap();
        let sample = Sample {
            data: Bytes::from_static(&[0u8; 4]),
            duration: Duration::from_millis(20),
            ..Default::default()
        };

        assert!(audio.write_sample(&sample).await.unwrap());
        audio.set_enabled(false);
        assert!(!audio.write_sample(&sample).await.unwrap());
    }

    #[tokio::test]
    async fn test_hold_suspends_acquisition() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.hold();

        let pending = {
            let devices = Arc::clone(&devices);
            tokio::spawn(async move {
                devices
                    .get_user_media(&MediaConstraints::audio_only())
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        devices.release();
        let stream = pending.await.unwrap().unwrap();
        assert_eq!(stream.tracks().len(), 1);
    }

    #[test]
    fn test_first_remote_stream_wins() {
        assert_eq!(adoption(None, "a"), Adoption::New);
        assert_eq!(adoption(Some("a"), "a"), Adoption::Joined);
        assert_eq!(adoption(Some("a"), "b"), Adoption::Ignored);
    }

    #[test]
    fn test_codecs_match_kind() {
        assert_eq!(codec_for(MediaKind::Audio).mime_type, MIME_TYPE_OPUS);
        assert_eq!(codec_for(MediaKind::Video).clock_rate, 90000);
    }
}
