//! Once-per-second call duration ticker

use crate::call::CallSession;
use crate::identity::PartyIdentity;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Period used by the messenger UI
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Spawn a task that calls [`CallSession::tick`] every `period`
///
/// Ticks outside an active call are no-ops, so the task can run for the whole
/// lifetime of the session. It holds only a weak reference and exits once the
/// session is dropped; abort the handle to stop it earlier.
pub fn spawn_duration_ticker<I: PartyIdentity>(
    session: &Arc<CallSession<I>>,
    period: Duration,
) -> JoinHandle<()> {
    let session: Weak<CallSession<I>> = Arc::downgrade(session);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(session) = session.upgrade() else {
                tracing::debug!("Session dropped, stopping duration ticker");
                break;
            };
            if let Some(secs) = session.tick() {
                tracing::trace!(duration_secs = secs, "Call duration");
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::CallConfig;
    use crate::identity::PartyId;
    use crate::media::SyntheticDevices;

    #[tokio::test]
    async fn test_ticker_exits_when_session_dropped() {
        let session: Arc<CallSession<PartyId>> = Arc::new(
            CallSession::new(CallConfig::host_only(), Arc::new(SyntheticDevices::new())).unwrap(),
        );
        let handle = spawn_duration_ticker(&session, Duration::from_millis(10));
        drop(session);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_ignores_idle_session() {
        let session: Arc<CallSession<PartyId>> = Arc::new(
            CallSession::new(CallConfig::host_only(), Arc::new(SyntheticDevices::new())).unwrap(),
        );
        let handle = spawn_duration_ticker(&session, TICK_PERIOD);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.duration_secs(), 0);
        handle.abort();
    }
}
