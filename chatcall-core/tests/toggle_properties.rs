//! Property tests for mute and camera toggles

use chatcall_core::{CallConfig, CallSession, PartyId, SyntheticDevices};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Toggle {
    Mute,
    Video,
}

fn toggle() -> impl Strategy<Value = Toggle> {
    prop_oneof![Just(Toggle::Mute), Just(Toggle::Video)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn toggle_state_follows_parity(wants_video: bool, toggles in prop::collection::vec(toggle(), 0..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let session: CallSession =
                CallSession::new(CallConfig::host_only(), Arc::new(SyntheticDevices::new())).unwrap();
            session.start(PartyId::new("u1"), wants_video).await.unwrap();

            for t in &toggles {
                match t {
                    Toggle::Mute => { session.toggle_mute(); }
                    Toggle::Video => { session.toggle_video(); }
                }
            }

            let mutes = toggles.iter().filter(|t| matches!(t, Toggle::Mute)).count();
            let videos = toggles.iter().filter(|t| matches!(t, Toggle::Video)).count();

            prop_assert_eq!(session.is_muted(), mutes % 2 == 1);
            // Voice-only calls never gain a camera
            prop_assert_eq!(session.is_video_enabled(), wants_video && videos % 2 == 0);

            session.end().await;
            prop_assert!(!session.is_muted());
            prop_assert!(!session.is_video_enabled());
            Ok(())
        })?;
    }
}
