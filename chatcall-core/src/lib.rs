//! Chatcall - one-to-one voice and video call sessions for the chatcall messenger
//!
//! This library owns the lifecycle of a single call: it acquires the local
//! microphone and camera, builds a WebRTC peer connection, produces the offer
//! or answer for the far end, captures the far end's media and tears
//! everything down again. It features:
//!
//! - **Owned session state**: a [`CallSession`] value instead of process-wide state
//! - **Guarded lifecycle**: a second `start`/`answer` is rejected with
//!   [`CallError::CallAlreadyActive`], and `end` cancels a call still being set up
//! - **Single remote stream**: the first remote stream of a call wins and is
//!   delivered once through [`CallSession::wait_for_remote_stream`]
//! - **Events**: view layers subscribe to [`CallEvent`]s instead of polling
//!
//! Delivering offers, answers and ICE candidates to the far end is left to
//! the embedding application; local candidates are only logged.
//!
//! # Examples
//!
//! ```rust,no_run
//! use chatcall_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let session: CallSession = CallSession::builder(Arc::new(SyntheticDevices::new()))
//!     .on_call_ended(|ended| println!("call with {:?} ended", ended.party))
//!     .build()?;
//!
//! // Place a video call and hand the offer to the messenger
//! let call = session.start(PartyId::new("u1"), true).await?;
//! println!("{}", call.offer.sdp);
//!
//! session.toggle_mute();
//! session.end().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Core call types and data structures
pub mod types;

/// Remote party identity abstraction
pub mod identity;

/// Immutable call configuration
pub mod config;

/// Local device access and media tracks
pub mod media;

/// Peer connection and offer/answer negotiation
pub mod peer;

/// Call session state machine
pub mod call;

/// Call duration ticker
pub mod ticker;

// Re-export main types at crate root
pub use call::{AnsweredCall, CallEndedHook, CallError, CallSession, CallSessionBuilder, OutgoingCall};
pub use config::{CallConfig, ConfigError, IceServer, DEFAULT_ICE_SERVERS};
pub use identity::{PartyId, PartyIdentity};
pub use media::{
    AccessPolicy, LocalMediaStream, LocalTrack, MediaDevices, MediaError, RemoteMediaStream,
    SyntheticDevices,
};
pub use peer::{NegotiationError, NegotiationPeer};
pub use ticker::{spawn_duration_ticker, TICK_PERIOD};
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::call::{CallError, CallSession, OutgoingCall, AnsweredCall};
    pub use crate::config::CallConfig;
    pub use crate::identity::{PartyId, PartyIdentity};
    pub use crate::media::{MediaDevices, SyntheticDevices};
    pub use crate::ticker::spawn_duration_ticker;
    pub use crate::types::{
        CallEvent, CallId, CallPhase, CallStatus, MediaConstraints, SessionDescription,
    };
}
