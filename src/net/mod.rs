// WheelTach — Network Sync Engine
//
// Owns the wireless association and every remote exchange: telemetry
// upload, identity resolution, config report/fetch, firmware update,
// heartbeat.  Calls are blocking but bounded; outcomes are classified into
// `SyncError` instead of propagating transport errors.

pub mod api;
pub mod http;
pub mod ota;
#[cfg(target_os = "espidf")]
pub mod wifi;

use api::SyncError;
use http::{HttpTransport, Method, Response};
use ota::FirmwareInstaller;

use crate::config::*;
use crate::hw::{Signals, SystemControl, WifiLink};
use crate::store::{ConfigStore, DeviceConfig};

/// How this process came to life.  Decides whether the post-connect
/// sequence includes a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSession {
    ColdBoot,
    SensorWake,
}

/// Volatile connection state.  Lost across deep sleep, like everything not
/// in the store.
#[derive(Debug, Default)]
pub struct NetworkState {
    pub connected: bool,
    /// Consecutive failed association attempts; at 3 the radio is left
    /// alone until something external resets us.
    pub connect_failures: u8,
    /// Timestamp of the last server-side failure; gates identity
    /// resolution for `SERVER_BACKOFF_MS`.
    pub last_error_ms: Option<u32>,
    /// 401/403 seen; uploads and identity queries stop until any request
    /// succeeds.
    pub auth_error: bool,
}

/// Outcome of an identity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The backend returned a display name.
    Known(String),
    /// Completed request, no identity assigned (404 or the literal "NULL").
    Unassigned,
    /// Query not attempted (back-off, auth gate, offline).  Must not
    /// overwrite a previously known identity.
    Skipped,
}

pub struct SyncEngine {
    pub state: NetworkState,
    session: BootSession,
    heartbeat_sent: bool,
}

impl SyncEngine {
    pub fn new(session: BootSession) -> Self {
        Self {
            state: NetworkState::default(),
            session,
            heartbeat_sent: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn auth_error(&self) -> bool {
        self.state.auth_error
    }

    pub fn in_backoff(&self, now_ms: u32) -> bool {
        self.state
            .last_error_ms
            .map(|t| now_ms.wrapping_sub(t) < SERVER_BACKOFF_MS)
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    /// Bounded association attempt.  After the third consecutive failure the
    /// radio is not touched again; the error state stays surfaced until a
    /// reset clears the counter.
    pub fn connect(
        &mut self,
        wifi: &mut dyn WifiLink,
        signals: &mut dyn Signals,
        cfg: &DeviceConfig,
    ) -> Result<(), SyncError> {
        if self.state.connected && wifi.is_connected() {
            return Ok(());
        }
        self.state.connected = false;

        if self.state.connect_failures >= MAX_CONNECT_FAILURES {
            return Err(SyncError::Connectivity);
        }

        let ssid = cfg.wifi_ssid.as_deref().ok_or(SyncError::Configuration)?;
        log::info!("associating with '{}'", ssid);

        let up = match wifi.connect(ssid, &cfg.wifi_pass, WIFI_CONNECT_TIMEOUT_MS) {
            Ok(up) => up,
            Err(e) => {
                log::warn!("wifi driver error: {}", e);
                false
            }
        };

        if up {
            self.state.connected = true;
            self.state.connect_failures = 0;
            log::info!("wifi up");
            Ok(())
        } else {
            self.state.connect_failures += 1;
            log::warn!(
                "association failed ({}/{})",
                self.state.connect_failures,
                MAX_CONNECT_FAILURES
            );
            if self.state.connect_failures >= MAX_CONNECT_FAILURES {
                signals.error_cue();
            }
            Err(SyncError::Connectivity)
        }
    }

    /// Post-connect exchange sequence: report the local config, fetch the
    /// remote one (only if the report succeeded), check firmware, and on a
    /// cold boot announce liveness once.
    pub fn sync_after_connect(
        &mut self,
        http: &mut dyn HttpTransport,
        installer: &mut dyn FirmwareInstaller,
        store: &mut dyn ConfigStore,
        cfg: &mut DeviceConfig,
        system: &mut dyn SystemControl,
        now_ms: u32,
    ) {
        if self.report_config(http, cfg, now_ms).is_ok() {
            let _ = self.fetch_config(http, store, cfg, system, now_ms);
        }
        let _ = self.check_firmware_update(http, installer, system, cfg, now_ms);

        if self.session == BootSession::ColdBoot && !self.heartbeat_sent {
            let _ = self.send_heartbeat(http, cfg, now_ms);
            self.heartbeat_sent = true;
        }
    }

    // -----------------------------------------------------------------------
    // Telemetry & identity
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn send_telemetry(
        &mut self,
        http: &mut dyn HttpTransport,
        cfg: &DeviceConfig,
        id_tag: &str,
        speed_kmh: f32,
        distance_km: f64,
        pulse_delta: u32,
        is_test: bool,
        now_ms: u32,
    ) -> Result<(), SyncError> {
        if self.state.auth_error {
            return Err(SyncError::Authentication);
        }
        let base = cfg.server_url.as_deref().ok_or(SyncError::Configuration)?;
        if !self.state.connected {
            return Err(SyncError::Connectivity);
        }

        let url = api::endpoint(base, "/api/update-data");
        let body = serde_json::to_vec(&api::TelemetryReport {
            device_id: &cfg.device_name,
            id_tag,
            distance: distance_km,
        })
        .map_err(|_| SyncError::Server)?;

        self.call(http, cfg, Method::Post, url, body, now_ms)?;
        log::info!(
            "telemetry uploaded: {:.3} km / {} pulses / {:.1} km/h{}",
            distance_km,
            pulse_delta,
            speed_kmh,
            if is_test { " (test)" } else { "" }
        );
        Ok(())
    }

    /// Ask the backend for the display identity behind a tag.  Skipped
    /// inside the back-off window and while the auth flag is set.
    pub fn resolve_username(
        &mut self,
        http: &mut dyn HttpTransport,
        cfg: &DeviceConfig,
        id_tag: &str,
        now_ms: u32,
    ) -> Result<Resolution, SyncError> {
        if !self.state.connected || self.state.auth_error || self.in_backoff(now_ms) {
            return Ok(Resolution::Skipped);
        }
        let base = cfg.server_url.as_deref().ok_or(SyncError::Configuration)?;

        let url = api::endpoint(base, "/api/get-user-id");
        let body = serde_json::to_vec(&api::UserQuery { id_tag }).map_err(|_| SyncError::Server)?;

        match self.call(http, cfg, Method::Post, url, body, now_ms) {
            Ok(resp) => match serde_json::from_slice::<api::UserReply>(&resp.body) {
                Ok(reply) if reply.user_id == "NULL" => Ok(Resolution::Unassigned),
                Ok(reply) => Ok(Resolution::Known(reply.user_id)),
                Err(e) => {
                    log::warn!("malformed get-user-id reply: {}", e);
                    self.note_failure(SyncError::Server, now_ms);
                    Err(SyncError::Server)
                }
            },
            // Completed request, tag simply has no identity.  The failure
            // timestamp was already noted, throttling repeats.
            Err(SyncError::NotFound) => Ok(Resolution::Unassigned),
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Configuration sync
    // -----------------------------------------------------------------------

    pub fn report_config(
        &mut self,
        http: &mut dyn HttpTransport,
        cfg: &DeviceConfig,
        now_ms: u32,
    ) -> Result<(), SyncError> {
        let base = cfg.server_url.as_deref().ok_or(SyncError::Configuration)?;
        let url = api::endpoint(base, "/api/device/config/report");
        let body = serde_json::to_vec(&api::ConfigReport {
            device_id: &cfg.device_name,
            config: api::ConfigSnapshot {
                device_name: &cfg.device_name,
                default_id_tag: cfg.default_tag.as_deref().unwrap_or(""),
                send_interval_seconds: cfg.send_interval_s.unwrap_or(0),
                wheel_size: cfg.wheel_mm.unwrap_or(0),
                server_url: base,
                api_key: &cfg.api_key,
            },
        })
        .map_err(|_| SyncError::Server)?;

        self.call(http, cfg, Method::Post, url, body, now_ms)?;
        Ok(())
    }

    /// Fetch the server-side config and persist any field it carries.  A
    /// `requires_restart` reply restarts the device after persisting.
    pub fn fetch_config(
        &mut self,
        http: &mut dyn HttpTransport,
        store: &mut dyn ConfigStore,
        cfg: &mut DeviceConfig,
        system: &mut dyn SystemControl,
        now_ms: u32,
    ) -> Result<(), SyncError> {
        let base = cfg.server_url.as_deref().ok_or(SyncError::Configuration)?;
        let url = format!(
            "{}?device_id={}",
            api::endpoint(base, "/api/device/config/fetch"),
            cfg.device_name
        );

        let resp = self.call(http, cfg, Method::Get, url, Vec::new(), now_ms)?;
        let reply: api::ConfigFetchReply = match serde_json::from_slice(&resp.body) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("malformed config fetch reply: {}", e);
                self.note_failure(SyncError::Server, now_ms);
                return Err(SyncError::Server);
            }
        };

        apply_remote_config(store, cfg, &reply.config);
        if reply.requires_restart {
            log::info!("fetched config requires restart");
            system.restart();
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Firmware
    // -----------------------------------------------------------------------

    /// Best-effort: query for a newer image and apply it.  A successful
    /// download ends in a device restart, so `Ok(true)` is only ever seen
    /// by tests.
    pub fn check_firmware_update(
        &mut self,
        http: &mut dyn HttpTransport,
        installer: &mut dyn FirmwareInstaller,
        system: &mut dyn SystemControl,
        cfg: &DeviceConfig,
        now_ms: u32,
    ) -> Result<bool, SyncError> {
        let base = cfg.server_url.as_deref().ok_or(SyncError::Configuration)?;
        let url = format!(
            "{}?device_id={}&current_version={}",
            api::endpoint(base, "/api/device/firmware/info"),
            cfg.device_name,
            FIRMWARE_VERSION
        );

        let resp = self.call(http, cfg, Method::Get, url, Vec::new(), now_ms)?;
        let info: api::FirmwareInfo = match serde_json::from_slice(&resp.body) {
            Ok(i) => i,
            Err(e) => {
                log::warn!("malformed firmware info reply: {}", e);
                self.note_failure(SyncError::Server, now_ms);
                return Err(SyncError::Server);
            }
        };

        if !info.update_available {
            return Ok(false);
        }
        let Some(download_url) = info.download_url else {
            log::warn!("update available but no download url");
            return Ok(false);
        };
        log::info!(
            "firmware update {} available (running {})",
            info.latest_version.as_deref().unwrap_or("?"),
            FIRMWARE_VERSION
        );
        self.download_and_apply_firmware(http, installer, system, cfg, &download_url, now_ms)
    }

    pub fn download_and_apply_firmware(
        &mut self,
        http: &mut dyn HttpTransport,
        installer: &mut dyn FirmwareInstaller,
        system: &mut dyn SystemControl,
        cfg: &DeviceConfig,
        url: &str,
        now_ms: u32,
    ) -> Result<bool, SyncError> {
        let mut headers: Vec<(&str, &str)> = Vec::new();
        if !cfg.api_key.is_empty() {
            headers.push(("X-Api-Key", &cfg.api_key));
        }

        match http.download(url, &headers, installer) {
            Ok(200) => {
                log::info!("firmware applied, restarting");
                system.restart();
                Ok(true)
            }
            Ok(status) => {
                let err = api::classify_status(status).err().unwrap_or(SyncError::Server);
                self.note_failure(err, now_ms);
                Err(err)
            }
            Err(e) => {
                log::warn!("firmware download failed: {}", e);
                self.note_failure(SyncError::Server, now_ms);
                Err(SyncError::Server)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Fire-and-forget liveness signal, at most once per boot session.
    pub fn send_heartbeat(
        &mut self,
        http: &mut dyn HttpTransport,
        cfg: &DeviceConfig,
        now_ms: u32,
    ) -> Result<(), SyncError> {
        let base = cfg.server_url.as_deref().ok_or(SyncError::Configuration)?;
        let url = api::endpoint(base, "/api/device/heartbeat");
        let body = serde_json::to_vec(&api::Heartbeat {
            device_id: &cfg.device_name,
        })
        .map_err(|_| SyncError::Server)?;

        self.call(http, cfg, Method::Post, url, body, now_ms)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------------

    fn call(
        &mut self,
        http: &mut dyn HttpTransport,
        cfg: &DeviceConfig,
        method: Method,
        url: String,
        body: Vec<u8>,
        now_ms: u32,
    ) -> Result<Response, SyncError> {
        let mut headers: Vec<(&str, &str)> = Vec::new();
        if method == Method::Post {
            headers.push(("Content-Type", "application/json"));
        }
        if !cfg.api_key.is_empty() {
            headers.push(("X-Api-Key", &cfg.api_key));
        }

        match http.request(method, &url, &headers, &body) {
            Ok(resp) => match api::classify_status(resp.status) {
                Ok(()) => {
                    self.note_success();
                    Ok(resp)
                }
                Err(e) => {
                    log::warn!("{} -> {} ({})", url, resp.status, e);
                    self.note_failure(e, now_ms);
                    Err(e)
                }
            },
            Err(e) => {
                log::warn!("transport failure for {}: {}", url, e);
                self.note_failure(SyncError::Server, now_ms);
                Err(SyncError::Server)
            }
        }
    }

    fn note_success(&mut self) {
        if self.state.auth_error {
            log::info!("request succeeded, clearing auth error");
        }
        self.state.auth_error = false;
    }

    fn note_failure(&mut self, err: SyncError, now_ms: u32) {
        match err {
            SyncError::Authentication => {
                self.state.auth_error = true;
                self.state.last_error_ms = Some(now_ms);
            }
            SyncError::Server | SyncError::Maintenance | SyncError::NotFound => {
                self.state.last_error_ms = Some(now_ms);
            }
            SyncError::Configuration | SyncError::Connectivity => {}
        }
    }
}

/// Persist every field the server sent and mirror it into the cached
/// config.  Invalid values are dropped, same as the local resolver would.
fn apply_remote_config(
    store: &mut dyn ConfigStore,
    cfg: &mut DeviceConfig,
    remote: &api::RemoteConfig,
) {
    if let Some(v) = remote.device_name.as_deref().filter(|v| !v.is_empty()) {
        let _ = store.set_str(KEY_DEVICE_NAME, v);
        cfg.device_name = v.to_string();
    }
    if let Some(v) = remote.default_id_tag.as_deref().filter(|v| !v.is_empty()) {
        let _ = store.set_str(KEY_DEFAULT_TAG, v);
        cfg.default_tag = Some(v.to_string());
    }
    if let Some(v) = remote.send_interval_seconds.filter(|&v| v > 0) {
        let _ = store.set_u32(KEY_SEND_INTERVAL, v);
        cfg.send_interval_s = Some(v);
    }
    if let Some(v) = remote
        .wheel_size
        .filter(|v| (WHEEL_MM_MIN..=WHEEL_MM_MAX).contains(v))
    {
        let _ = store.set_u32(KEY_WHEEL_MM, v);
        cfg.wheel_mm = Some(v);
    }
    if let Some(v) = remote.server_url.as_deref().filter(|v| !v.is_empty()) {
        let _ = store.set_str(KEY_SERVER_URL, v);
        cfg.server_url = Some(v.to_string());
    }
    if let Some(v) = remote.api_key.as_deref() {
        let _ = store.set_str(KEY_API_KEY, v);
        cfg.api_key = v.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::http::mock::MockTransport;
    use super::ota::mock::MockInstaller;
    use super::*;
    use crate::hw::mock::{FakeSignals, FakeSystem, FakeWifi};
    use crate::store::mem::MemStore;
    use crate::store::ConfigStore;

    fn test_config() -> DeviceConfig {
        DeviceConfig {
            wifi_ssid: Some("homenet".into()),
            wifi_pass: "secret".into(),
            device_name: "garage-bike".into(),
            default_tag: Some("04A1B2C3".into()),
            wheel_mm: Some(2075),
            server_url: Some("https://tacho.example".into()),
            api_key: "k-123".into(),
            send_interval_s: Some(30),
            sleep_timeout_s: 300,
            refetch_interval_s: 3600,
            test_mode: false,
            test_distance_m: 500,
            test_interval_s: 10,
        }
    }

    fn online_engine() -> SyncEngine {
        let mut engine = SyncEngine::new(BootSession::ColdBoot);
        engine.state.connected = true;
        engine
    }

    #[test]
    fn telemetry_upload_posts_distance_with_api_key() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        http.push_status(200);

        engine
            .send_telemetry(&mut http, &test_config(), "04A1B2C3", 14.9, 20.75, 10, false, 1_000)
            .unwrap();

        let sent = &http.sent[0];
        assert_eq!(sent.url, "https://tacho.example/api/update-data");
        assert!(sent
            .headers
            .iter()
            .any(|(k, v)| k == "X-Api-Key" && v == "k-123"));
        let body: serde_json::Value = serde_json::from_slice(&sent.body).unwrap();
        assert_eq!(body["device_id"], "garage-bike");
        assert_eq!(body["distance"], 20.75);
    }

    #[test]
    fn missing_server_url_is_a_configuration_error() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let mut cfg = test_config();
        cfg.server_url = None;

        let err = engine
            .send_telemetry(&mut http, &cfg, "04A1B2C3", 0.0, 0.1, 1, false, 0)
            .unwrap_err();
        assert_eq!(err, SyncError::Configuration);
        assert!(http.sent.is_empty());
    }

    #[test]
    fn offline_upload_is_a_connectivity_error() {
        let mut engine = SyncEngine::new(BootSession::ColdBoot);
        let mut http = MockTransport::new();

        let err = engine
            .send_telemetry(&mut http, &test_config(), "04A1B2C3", 0.0, 0.1, 1, false, 0)
            .unwrap_err();
        assert_eq!(err, SyncError::Connectivity);
    }

    #[test]
    fn auth_error_is_sticky_until_any_success() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let cfg = test_config();

        http.push_status(401);
        let err = engine
            .send_telemetry(&mut http, &cfg, "04A1B2C3", 0.0, 0.1, 1, false, 1_000)
            .unwrap_err();
        assert_eq!(err, SyncError::Authentication);
        assert!(engine.auth_error());

        // Gated: no request leaves the device.
        let err = engine
            .send_telemetry(&mut http, &cfg, "04A1B2C3", 0.0, 0.1, 1, false, 2_000)
            .unwrap_err();
        assert_eq!(err, SyncError::Authentication);
        assert_eq!(http.sent.len(), 1);

        // Any successful request clears the flag.
        http.push_status(200);
        engine.report_config(&mut http, &cfg, 3_000).unwrap();
        assert!(!engine.auth_error());

        http.push_status(200);
        engine
            .send_telemetry(&mut http, &cfg, "04A1B2C3", 0.0, 0.1, 1, false, 4_000)
            .unwrap();
    }

    #[test]
    fn resolve_username_parses_known_and_null() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let cfg = test_config();

        http.push_json(200, r#"{"user_id":"Ada"}"#);
        assert_eq!(
            engine.resolve_username(&mut http, &cfg, "04A1B2C3", 0).unwrap(),
            Resolution::Known("Ada".into())
        );

        http.push_json(200, r#"{"user_id":"NULL"}"#);
        assert_eq!(
            engine.resolve_username(&mut http, &cfg, "04A1B2C3", 0).unwrap(),
            Resolution::Unassigned
        );
    }

    #[test]
    fn resolve_username_404_is_unassigned_and_throttles() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let cfg = test_config();

        http.push_status(404);
        assert_eq!(
            engine.resolve_username(&mut http, &cfg, "04A1B2C3", 10_000).unwrap(),
            Resolution::Unassigned
        );
        assert!(!engine.auth_error());

        // Inside the back-off window the query is skipped, not retried.
        assert_eq!(
            engine.resolve_username(&mut http, &cfg, "04A1B2C3", 20_000).unwrap(),
            Resolution::Skipped
        );
        assert_eq!(http.sent.len(), 1);

        // After the window a new attempt goes out.
        http.push_json(200, r#"{"user_id":"Ada"}"#);
        assert_eq!(
            engine
                .resolve_username(&mut http, &cfg, "04A1B2C3", 10_000 + SERVER_BACKOFF_MS)
                .unwrap(),
            Resolution::Known("Ada".into())
        );
    }

    #[test]
    fn server_failure_starts_backoff_window() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let cfg = test_config();

        http.push_status(503);
        let err = engine
            .resolve_username(&mut http, &cfg, "04A1B2C3", 5_000)
            .unwrap_err();
        assert_eq!(err, SyncError::Maintenance);
        assert!(engine.in_backoff(5_001));
        assert!(!engine.in_backoff(5_000 + SERVER_BACKOFF_MS));
    }

    #[test]
    fn connect_stops_after_three_consecutive_failures() {
        let mut engine = SyncEngine::new(BootSession::ColdBoot);
        let mut wifi = FakeWifi::default();
        let mut signals = FakeSignals::default();
        let cfg = test_config();

        for _ in 0..3 {
            assert_eq!(
                engine.connect(&mut wifi, &mut signals, &cfg).unwrap_err(),
                SyncError::Connectivity
            );
        }
        assert_eq!(wifi.connect_calls, 3);
        assert_eq!(signals.error_cues, 1);

        // A fourth call does not touch the radio.
        assert_eq!(
            engine.connect(&mut wifi, &mut signals, &cfg).unwrap_err(),
            SyncError::Connectivity
        );
        assert_eq!(wifi.connect_calls, 3);
    }

    #[test]
    fn connect_success_resets_failure_count() {
        let mut engine = SyncEngine::new(BootSession::ColdBoot);
        let mut wifi = FakeWifi::default();
        let mut signals = FakeSignals::default();
        let cfg = test_config();

        wifi.results.push_back(false);
        wifi.results.push_back(true);

        assert!(engine.connect(&mut wifi, &mut signals, &cfg).is_err());
        assert!(engine.connect(&mut wifi, &mut signals, &cfg).is_ok());
        assert_eq!(engine.state.connect_failures, 0);
        assert!(engine.is_connected());
    }

    #[test]
    fn post_connect_sequence_reports_fetches_checks_and_beats() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let mut installer = MockInstaller::default();
        let mut store = MemStore::new();
        let mut system = FakeSystem::default();
        let mut cfg = test_config();

        http.push_status(200); // config report
        http.push_json(200, r#"{"config":{"wheel_size":2100},"requires_restart":false}"#);
        http.push_json(200, r#"{"update_available":false}"#);
        http.push_status(200); // heartbeat

        engine.sync_after_connect(&mut http, &mut installer, &mut store, &mut cfg, &mut system, 0);

        let urls: Vec<_> = http.sent.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://tacho.example/api/device/config/report",
                "https://tacho.example/api/device/config/fetch?device_id=garage-bike",
                "https://tacho.example/api/device/firmware/info?device_id=garage-bike&current_version=0.2.0",
                "https://tacho.example/api/device/heartbeat",
            ]
        );
        assert_eq!(cfg.wheel_mm, Some(2100));
        assert_eq!(store.get_u32(KEY_WHEEL_MM), Some(2100));
        assert_eq!(system.restarts, 0);
    }

    #[test]
    fn failed_report_skips_fetch_but_not_firmware() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let mut installer = MockInstaller::default();
        let mut store = MemStore::new();
        let mut system = FakeSystem::default();
        let mut cfg = test_config();

        http.push_status(500); // config report fails
        http.push_json(200, r#"{"update_available":false}"#);
        http.push_status(200); // heartbeat

        engine.sync_after_connect(&mut http, &mut installer, &mut store, &mut cfg, &mut system, 0);

        let urls: Vec<_> = http.sent.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls.len(), 3);
        assert!(urls[1].contains("/api/device/firmware/info"));
    }

    #[test]
    fn heartbeat_is_sent_once_per_session_and_not_on_wake() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let mut installer = MockInstaller::default();
        let mut store = MemStore::new();
        let mut system = FakeSystem::default();
        let mut cfg = test_config();

        for _ in 0..2 {
            http.push_status(200);
            http.push_json(200, r#"{"config":{}}"#);
            http.push_json(200, r#"{"update_available":false}"#);
            http.push_status(200);
        }

        engine.sync_after_connect(&mut http, &mut installer, &mut store, &mut cfg, &mut system, 0);
        engine.sync_after_connect(&mut http, &mut installer, &mut store, &mut cfg, &mut system, 0);
        let beats = http
            .sent
            .iter()
            .filter(|s| s.url.ends_with("/heartbeat"))
            .count();
        assert_eq!(beats, 1);

        // A sleep-wake session never sends one.
        let mut wake_engine = SyncEngine::new(BootSession::SensorWake);
        wake_engine.state.connected = true;
        let mut http = MockTransport::new();
        http.push_status(200);
        http.push_json(200, r#"{"config":{}}"#);
        http.push_json(200, r#"{"update_available":false}"#);

        wake_engine
            .sync_after_connect(&mut http, &mut installer, &mut store, &mut cfg, &mut system, 0);
        assert!(http.sent.iter().all(|s| !s.url.ends_with("/heartbeat")));
    }

    #[test]
    fn fetched_restart_flag_restarts_after_persisting() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let mut store = MemStore::new();
        let mut system = FakeSystem::default();
        let mut cfg = test_config();

        http.push_json(
            200,
            r#"{"config":{"send_interval_seconds":60},"requires_restart":true}"#,
        );
        engine
            .fetch_config(&mut http, &mut store, &mut cfg, &mut system, 0)
            .unwrap();

        assert_eq!(store.get_u32(KEY_SEND_INTERVAL), Some(60));
        assert_eq!(system.restarts, 1);
    }

    #[test]
    fn firmware_update_downloads_image_and_restarts() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let mut installer = MockInstaller::default();
        let mut system = FakeSystem::default();
        let cfg = test_config();

        http.push_json(
            200,
            r#"{"update_available":true,"latest_version":"0.3.0","download_url":"https://tacho.example/api/device/firmware/download?device_id=garage-bike"}"#,
        );
        http.download_bytes = vec![0xE9, 0x01, 0x02, 0x03];

        let applied = engine
            .check_firmware_update(&mut http, &mut installer, &mut system, &cfg, 0)
            .unwrap();
        assert!(applied);
        assert_eq!(installer.image, vec![0xE9, 0x01, 0x02, 0x03]);
        assert_eq!(system.restarts, 1);
    }

    #[test]
    fn malformed_reply_counts_as_server_error() {
        let mut engine = online_engine();
        let mut http = MockTransport::new();
        let cfg = test_config();

        http.push_json(200, "not json");
        let err = engine
            .resolve_username(&mut http, &cfg, "04A1B2C3", 7_000)
            .unwrap_err();
        assert_eq!(err, SyncError::Server);
        assert!(engine.in_backoff(7_001));
    }
}
