//! Tests for terminal UI

#[cfg(test)]
mod tests {
    use super::super::terminal_ui::*;
    use chatcall_core::{CallId, CallPhase, CallStatus, PartyId};
    use std::time::Duration;

    fn active_status() -> CallStatus<PartyId> {
        CallStatus {
            phase: CallPhase::Active,
            call_id: Some(CallId::new()),
            active: true,
            video_enabled: true,
            muted: false,
            remote_party: Some(PartyId::new("u1")),
            duration_secs: 75,
            has_remote_stream: false,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(9), "00:09");
        assert_eq!(format_duration(75), "01:15");
        assert_eq!(format_duration(3600), "60:00");
    }

    #[test]
    fn test_view_from_active_status() {
        let view = CallView::from_status(&active_status(), false);
        assert_eq!(view.party, "u1");
        assert_eq!(view.duration, "01:15");
        assert!(view.active);
        assert!(view.video_enabled);
        assert!(!view.muted);
        assert!(!view.ringing);
    }

    #[test]
    fn test_ringing_stops_once_remote_media_arrives() {
        let mut status = active_status();
        assert!(CallView::from_status(&status, true).ringing);

        status.has_remote_stream = true;
        assert!(!CallView::from_status(&status, true).ringing);
    }

    #[test]
    fn test_idle_view() {
        let view = CallView::from_status(&CallStatus::idle(), true);
        assert_eq!(view.party, "-");
        assert_eq!(view.duration, "00:00");
        assert!(!view.active);
        assert!(!view.ringing);
    }

    #[test]
    fn test_ring_window() {
        let timeout = Duration::from_secs(2);
        assert!(ring_window_open(Duration::from_millis(500), timeout));
        assert!(!ring_window_open(Duration::from_secs(2), timeout));
        assert!(!ring_window_open(Duration::from_secs(3), Duration::ZERO));
    }

    #[test]
    fn test_display_mode_conversions() {
        let display: DisplayMode = CliDisplayMode::Ascii.into();
        assert_eq!(display, DisplayMode::Ascii);

        let display: DisplayMode = CliDisplayMode::Text.into();
        assert_eq!(display, DisplayMode::Text);

        let display: DisplayMode = CliDisplayMode::None.into();
        assert_eq!(display, DisplayMode::None);
    }
}
