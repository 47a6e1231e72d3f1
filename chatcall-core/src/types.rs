//! Call types and data structures

use crate::identity::PartyIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Create a new random call ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Microphone track
    Audio,
    /// Camera track
    Video,
}

impl MediaKind {
    /// Media name as it appears on an SDP `m=` line
    pub fn sdp_name(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sdp_name())
    }
}

/// Video resolution options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoResolution {
    /// 1280x720
    HD720,
}

impl VideoResolution {
    /// Get width in pixels
    pub fn width(&self) -> u32 {
        match self {
            Self::HD720 => 1280,
        }
    }

    /// Get height in pixels
    pub fn height(&self) -> u32 {
        match self {
            Self::HD720 => 720,
        }
    }
}

/// What to request from the local media devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Request a microphone track
    pub audio: bool,
    /// Request a camera track at this resolution, or no camera at all
    pub video: Option<VideoResolution>,
}

impl MediaConstraints {
    /// Constraints used for every call: audio always, 720p video on request
    pub fn for_call(wants_video: bool) -> Self {
        Self {
            audio: true,
            video: wants_video.then_some(VideoResolution::HD720),
        }
    }

    /// Audio-only call
    pub fn audio_only() -> Self {
        Self::for_call(false)
    }

    /// Video call with audio
    pub fn video_call() -> Self {
        Self::for_call(true)
    }

    /// Check if video is requested
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Media kinds this request produces, in track order
    pub fn kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::new();
        if self.audio {
            kinds.push(MediaKind::Audio);
        }
        if self.video.is_some() {
            kinds.push(MediaKind::Video);
        }
        kinds
    }
}

/// Position of a session in the call state machine
///
/// ```text
///   Idle ──start/answer──▶ Acquiring ──media──▶ Negotiating ──sdp──▶ Active
///    ▲                         │                     │                 │
///    └─────────── end / failure (from any state) ────┴─────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallPhase {
    /// No call
    Idle,
    /// Waiting for the local media devices
    Acquiring,
    /// Building the peer connection and session descriptions
    Negotiating,
    /// Call established locally
    Active,
}

/// Whether a session description is an offer or an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Caller side description
    Offer,
    /// Callee side description
    Answer,
}

/// A session description, ready to hand to whatever carries it to the far end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap an SDP offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Wrap an SDP answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Media names of every `m=` section, in order (`"audio"`, `"video"`, ...)
    pub fn media_sections(&self) -> Vec<&str> {
        self.sdp
            .lines()
            .filter_map(|line| line.strip_prefix("m="))
            .filter_map(|rest| rest.split_whitespace().next())
            .collect()
    }

    /// Check whether the description carries a section of the given kind
    pub fn has_media(&self, kind: MediaKind) -> bool {
        self.media_sections().contains(&kind.sdp_name())
    }
}

/// Snapshot of everything the view layer renders about the current call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "I: PartyIdentity")]
pub struct CallStatus<I: PartyIdentity> {
    /// State machine position
    pub phase: CallPhase,
    /// Current call attempt, if any
    pub call_id: Option<CallId>,
    /// Call established locally
    pub active: bool,
    /// Local camera track present and enabled
    pub video_enabled: bool,
    /// Local microphone track present and disabled
    pub muted: bool,
    /// Far end of the call
    pub remote_party: Option<I>,
    /// Seconds elapsed, advanced by the ticker
    pub duration_secs: u64,
    /// Far end media has arrived
    pub has_remote_stream: bool,
}

impl<I: PartyIdentity> CallStatus<I> {
    /// Status of a session with no call
    pub fn idle() -> Self {
        Self {
            phase: CallPhase::Idle,
            call_id: None,
            active: false,
            video_enabled: false,
            muted: false,
            remote_party: None,
            duration_secs: 0,
            has_remote_stream: false,
        }
    }
}

/// Payload of the call-ended notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "I: PartyIdentity")]
pub struct CallEnded<I: PartyIdentity> {
    /// The call that ended
    pub call_id: CallId,
    /// Far end, if the call got far enough to record one
    pub party: Option<I>,
    /// Seconds the call was active
    pub duration_secs: u64,
    /// When teardown finished
    pub ended_at: DateTime<Utc>,
}

/// Call event for notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "I: PartyIdentity")]
pub enum CallEvent<I: PartyIdentity> {
    /// Outgoing call established locally, offer ready
    CallStarted {
        /// Call identifier
        call_id: CallId,
        /// Who is being called
        party: I,
        /// Camera requested
        video: bool,
    },
    /// Incoming call accepted locally
    CallAnswered {
        /// Call identifier
        call_id: CallId,
        /// Who is calling
        party: I,
        /// Camera requested
        video: bool,
        /// An answer was produced immediately
        negotiated: bool,
    },
    /// First media from the far end
    RemoteStreamArrived {
        /// Call identifier
        call_id: CallId,
        /// Remote stream id
        stream_id: String,
    },
    /// Microphone toggled
    MuteChanged {
        /// Call identifier
        call_id: CallId,
        /// New muted state
        muted: bool,
    },
    /// Camera toggled
    VideoToggled {
        /// Call identifier
        call_id: CallId,
        /// New video-enabled state
        enabled: bool,
    },
    /// Call torn down
    CallEnded(CallEnded<I>),
    /// Call attempt failed before becoming active
    CallFailed {
        /// Call identifier
        call_id: CallId,
        /// Who the attempt was with
        party: I,
        /// Error description
        error: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::PartyId;

    #[test]
    fn test_call_id() {
        let id1 = CallId::new();
        let id2 = CallId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_call_constraints() {
        let audio = MediaConstraints::for_call(false);
        assert!(audio.audio);
        assert!(!audio.has_video());
        assert_eq!(audio.kinds(), vec![MediaKind::Audio]);

        let video = MediaConstraints::for_call(true);
        assert_eq!(video.video, Some(VideoResolution::HD720));
        assert_eq!(video.kinds(), vec![MediaKind::Audio, MediaKind::Video]);
    }

    #[test]
    fn test_video_resolution() {
        let hd720 = VideoResolution::HD720;
        assert_eq!(hd720.width(), 1280);
        assert_eq!(hd720.height(), 720);
    }

    #[test]
    fn test_media_sections() {
        let sdp = "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";
        let desc = SessionDescription::offer(sdp);
        assert_eq!(desc.media_sections(), vec!["audio", "video"]);
        assert!(desc.has_media(MediaKind::Audio));
        assert!(desc.has_media(MediaKind::Video));

        let audio_only = SessionDescription::answer("v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n");
        assert!(!audio_only.has_media(MediaKind::Video));
    }

    #[test]
    fn test_session_description_json_shape() {
        let desc = SessionDescription::offer("v=0");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");
    }

    #[test]
    fn test_idle_status() {
        let status: CallStatus<PartyId> = CallStatus::idle();
        assert_eq!(status.phase, CallPhase::Idle);
        assert!(!status.active);
        assert!(status.remote_party.is_none());
    }
}
