// WheelTach — Tag Session Manager
//
// Tracks which rider identity is active, detects hand-offs, and kicks off
// the telemetry reset + identity resolution that a hand-off implies.  A
// radio-detected tag lives only in this volatile session state; the
// persisted default tag is never overwritten by a scan.

use crate::hw::{PulseCounter, Signals, TagScanner};
use crate::net::http::HttpTransport;
use crate::net::{Resolution, SyncEngine};
use crate::store::DeviceConfig;
use crate::telemetry::TelemetryEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOrigin {
    RadioDetection,
    DefaultConfig,
}

/// Resolved display identity for the active tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No resolution has completed yet.
    Unresolved,
    Known(String),
    /// A completed request said this tag has no identity.  Shown to the
    /// user as an error, unlike a merely skipped query.
    Unassigned,
}

pub struct TagSession {
    active_tag: String,
    origin: TagOrigin,
    identity: Identity,

    /// Last tag a session action (reset + resolution) ran for.  Updated
    /// immediately on change so the comparison is idempotent within a tick.
    last_session_tag: String,

    /// Last tag a telemetry upload succeeded for.  Deliberately only
    /// updated after a confirmed upload, so a tag switch never silently
    /// discards unsent distance.
    last_synced_tag: Option<String>,
}

impl TagSession {
    pub fn new(default_tag: &str) -> Self {
        Self {
            active_tag: default_tag.to_string(),
            origin: TagOrigin::DefaultConfig,
            identity: Identity::Unresolved,
            last_session_tag: String::new(),
            last_synced_tag: None,
        }
    }

    pub fn active_tag(&self) -> &str {
        &self.active_tag
    }

    pub fn origin(&self) -> TagOrigin {
        self.origin
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn last_synced_tag(&self) -> Option<&str> {
        self.last_synced_tag.as_deref()
    }

    /// Forget the session history so the next tick treats the active tag
    /// as brand new.  Called when leaving configuration mode.
    pub fn begin_new_session(&mut self) {
        self.last_session_tag.clear();
        self.last_synced_tag = None;
    }

    /// Record a confirmed upload for the active tag.
    pub fn mark_upload_success(&mut self) {
        self.last_synced_tag = Some(self.active_tag.clone());
    }

    /// One cooperative tick: poll the reader, then run the session action
    /// if the active tag changed since the last one.
    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        scanner: &mut dyn TagScanner,
        signals: &mut dyn Signals,
        telemetry: &mut TelemetryEngine,
        counter: &mut dyn PulseCounter,
        sync: &mut SyncEngine,
        http: &mut dyn HttpTransport,
        cfg: &DeviceConfig,
        now_ms: u32,
    ) {
        // Radio detection wins over whatever was active before.
        let mut cued = false;
        if let Some(uid) = scanner.poll() {
            if !uid.is_empty() && uid != self.active_tag {
                log::info!("tag detected: {}", uid);
                self.active_tag = uid;
                self.origin = TagOrigin::RadioDetection;
                signals.rider_cue();
                cued = true;
            }
        }

        if self.active_tag.is_empty() || self.active_tag == self.last_session_tag {
            return;
        }

        log::info!("rider change: '{}' -> '{}'", self.last_session_tag, self.active_tag);
        if !cued {
            signals.rider_cue();
        }

        telemetry.reset(counter);
        self.last_session_tag = self.active_tag.clone();

        if sync.is_connected() && !sync.auth_error() {
            match sync.resolve_username(http, cfg, &self.active_tag, now_ms) {
                Ok(Resolution::Known(name)) => {
                    log::info!("tag {} belongs to {}", self.active_tag, name);
                    self.identity = Identity::Known(name);
                }
                Ok(Resolution::Unassigned) => {
                    log::warn!("tag {} has no assigned identity", self.active_tag);
                    self.identity = Identity::Unassigned;
                }
                // Skipped or failed: keep whatever identity we knew before.
                Ok(Resolution::Skipped) => {}
                Err(e) => {
                    log::warn!("identity resolution failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::mock::{FakeCounter, FakeScanner, FakeSignals};
    use crate::net::http::mock::MockTransport;
    use crate::net::BootSession;

    fn fixtures() -> (TelemetryEngine, FakeCounter, FakeSignals, FakeScanner, SyncEngine, MockTransport, DeviceConfig)
    {
        let mut sync = SyncEngine::new(BootSession::ColdBoot);
        sync.state.connected = true;
        (
            TelemetryEngine::new(2075),
            FakeCounter::default(),
            FakeSignals::default(),
            FakeScanner::default(),
            sync,
            MockTransport::new(),
            DeviceConfig {
                wifi_ssid: Some("homenet".into()),
                wifi_pass: String::new(),
                device_name: "garage-bike".into(),
                default_tag: Some("DEFAULT01".into()),
                wheel_mm: Some(2075),
                server_url: Some("https://tacho.example".into()),
                api_key: String::new(),
                send_interval_s: Some(30),
                sleep_timeout_s: 300,
                refetch_interval_s: 3600,
                test_mode: false,
                test_distance_m: 500,
                test_interval_s: 10,
            },
        )
    }

    #[test]
    fn first_tick_starts_a_session_for_the_default_tag() {
        let (mut telemetry, mut counter, mut signals, mut scanner, mut sync, mut http, cfg) =
            fixtures();
        let mut session = TagSession::new("DEFAULT01");

        http.push_json(200, r#"{"user_id":"Ada"}"#);
        session.tick(
            &mut scanner, &mut signals, &mut telemetry, &mut counter, &mut sync, &mut http, &cfg, 0,
        );

        assert_eq!(session.active_tag(), "DEFAULT01");
        assert_eq!(session.origin(), TagOrigin::DefaultConfig);
        assert_eq!(*session.identity(), Identity::Known("Ada".into()));
        assert_eq!(signals.rider_cues, 1);
    }

    #[test]
    fn scan_switches_rider_resets_telemetry_and_cues_once() {
        let (mut telemetry, mut counter, mut signals, mut scanner, mut sync, mut http, cfg) =
            fixtures();
        let mut session = TagSession::new("DEFAULT01");

        // Establish the default session first.
        http.push_json(200, r#"{"user_id":"Ada"}"#);
        session.tick(
            &mut scanner, &mut signals, &mut telemetry, &mut counter, &mut sync, &mut http, &cfg, 0,
        );

        // Ride some distance, then a new card shows up.
        counter.count = 12;
        telemetry.sample(&counter, &mut signals, 1_000);
        assert!(telemetry.distance_mm() > 0.0);

        scanner.will_read("04FFEE01");
        http.push_json(200, r#"{"user_id":"Grace"}"#);
        session.tick(
            &mut scanner,
            &mut signals,
            &mut telemetry,
            &mut counter,
            &mut sync,
            &mut http,
            &cfg,
            2_000,
        );

        assert_eq!(session.active_tag(), "04FFEE01");
        assert_eq!(session.origin(), TagOrigin::RadioDetection);
        assert_eq!(*session.identity(), Identity::Known("Grace".into()));
        assert_eq!(telemetry.distance_mm(), 0.0);
        assert_eq!(counter.count, 0);
        // One cue for the default session, one for the scan — not two for
        // the scan.
        assert_eq!(signals.rider_cues, 2);
    }

    #[test]
    fn rescanning_the_active_tag_does_nothing() {
        let (mut telemetry, mut counter, mut signals, mut scanner, mut sync, mut http, cfg) =
            fixtures();
        let mut session = TagSession::new("DEFAULT01");

        http.push_json(200, r#"{"user_id":"Ada"}"#);
        session.tick(
            &mut scanner, &mut signals, &mut telemetry, &mut counter, &mut sync, &mut http, &cfg, 0,
        );

        counter.count = 5;
        telemetry.sample(&counter, &mut signals, 500);
        scanner.will_read("DEFAULT01");
        session.tick(
            &mut scanner, &mut signals, &mut telemetry, &mut counter, &mut sync, &mut http, &cfg, 1_000,
        );

        assert_eq!(signals.rider_cues, 1);
        assert!(telemetry.distance_mm() > 0.0);
    }

    #[test]
    fn skipped_resolution_keeps_previous_identity() {
        let (mut telemetry, mut counter, mut signals, mut scanner, mut sync, mut http, cfg) =
            fixtures();
        let mut session = TagSession::new("DEFAULT01");

        http.push_json(200, r#"{"user_id":"Ada"}"#);
        session.tick(
            &mut scanner, &mut signals, &mut telemetry, &mut counter, &mut sync, &mut http, &cfg, 0,
        );

        // Server melts down, then a new tag appears inside the back-off
        // window: the query is skipped and Ada is not overwritten.
        http.push_status(503);
        let _ = sync.resolve_username(&mut http, &cfg, "probe", 10_000);

        scanner.will_read("04FFEE01");
        session.tick(
            &mut scanner,
            &mut signals,
            &mut telemetry,
            &mut counter,
            &mut sync,
            &mut http,
            &cfg,
            11_000,
        );

        assert_eq!(*session.identity(), Identity::Known("Ada".into()));
    }

    #[test]
    fn auth_error_suppresses_resolution_entirely() {
        let (mut telemetry, mut counter, mut signals, mut scanner, mut sync, mut http, cfg) =
            fixtures();
        let mut session = TagSession::new("DEFAULT01");
        sync.state.auth_error = true;

        session.tick(
            &mut scanner, &mut signals, &mut telemetry, &mut counter, &mut sync, &mut http, &cfg, 0,
        );

        assert!(http.sent.is_empty());
        assert_eq!(*session.identity(), Identity::Unresolved);
    }

    #[test]
    fn synced_tag_updates_only_after_confirmed_upload() {
        let (mut telemetry, mut counter, mut signals, mut scanner, mut sync, mut http, cfg) =
            fixtures();
        let mut session = TagSession::new("DEFAULT01");

        http.push_json(200, r#"{"user_id":"Ada"}"#);
        session.tick(
            &mut scanner, &mut signals, &mut telemetry, &mut counter, &mut sync, &mut http, &cfg, 0,
        );
        assert_eq!(session.last_synced_tag(), None);

        session.mark_upload_success();
        assert_eq!(session.last_synced_tag(), Some("DEFAULT01"));

        // Switching riders must not move the synced marker by itself.
        scanner.will_read("04FFEE01");
        http.push_json(200, r#"{"user_id":"Grace"}"#);
        session.tick(
            &mut scanner,
            &mut signals,
            &mut telemetry,
            &mut counter,
            &mut sync,
            &mut http,
            &cfg,
            1_000,
        );
        assert_eq!(session.last_synced_tag(), Some("DEFAULT01"));

        session.mark_upload_success();
        assert_eq!(session.last_synced_tag(), Some("04FFEE01"));
    }

    #[test]
    fn new_session_clears_history_and_retriggers_the_active_tag() {
        let (mut telemetry, mut counter, mut signals, mut scanner, mut sync, mut http, cfg) =
            fixtures();
        let mut session = TagSession::new("DEFAULT01");

        http.push_json(200, r#"{"user_id":"Ada"}"#);
        session.tick(
            &mut scanner, &mut signals, &mut telemetry, &mut counter, &mut sync, &mut http, &cfg, 0,
        );
        session.mark_upload_success();

        session.begin_new_session();
        assert_eq!(session.last_synced_tag(), None);

        http.push_json(200, r#"{"user_id":"Ada"}"#);
        session.tick(
            &mut scanner, &mut signals, &mut telemetry, &mut counter, &mut sync, &mut http, &cfg, 1_000,
        );
        // Same tag, but the cleared history makes it a fresh session.
        assert_eq!(signals.rider_cues, 2);
    }
}
