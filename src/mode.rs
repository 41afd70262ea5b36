// WheelTach — Mode Controller
//
// Top-level state machine: configuration mode (portal + AP) vs operational
// mode (ride tracking).  Owns the cached config, the engines, and the tick
// sequencing.  There is no way back from operational to configuration mode
// short of a reset.

use crate::config::*;
use crate::hw::{ConfigPortal, PulseCounter, Signals, SystemControl, TagScanner, WifiLink};
use crate::net::http::HttpTransport;
use crate::net::ota::FirmwareInstaller;
use crate::net::{BootSession, SyncEngine};
use crate::power;
use crate::store::{ConfigStore, DeviceConfig, MissingField};
use crate::tag::TagSession;
use crate::telemetry::TelemetryEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Configuration,
    Operational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    /// Power-on, reset, or any non-sensor wake.
    PowerOn,
    /// Deep-sleep wake triggered by the wheel-sensor line.
    SensorWake,
}

/// Every peripheral seam the controller touches, bundled so tick functions
/// stay callable with test doubles.
pub struct Hardware<'a> {
    pub counter: &'a mut dyn PulseCounter,
    pub scanner: &'a mut dyn TagScanner,
    pub signals: &'a mut dyn Signals,
    pub wifi: &'a mut dyn WifiLink,
    pub http: &'a mut dyn HttpTransport,
    pub installer: &'a mut dyn FirmwareInstaller,
    pub system: &'a mut dyn SystemControl,
    pub portal: &'a mut dyn ConfigPortal,
    pub store: &'a mut dyn ConfigStore,
}

/// Initial mode after power-on or wake.  A sensor wake goes straight back
/// to riding — unless the exit-configuration flag was still pending, or the
/// configuration is incomplete.
pub fn boot_mode(wake: WakeCause, exit_config_pending: bool, critical_missing: bool) -> OperatingMode {
    if critical_missing {
        return OperatingMode::Configuration;
    }
    match wake {
        WakeCause::SensorWake if !exit_config_pending => OperatingMode::Operational,
        _ => OperatingMode::Configuration,
    }
}

struct ConfigState {
    entered_ms: u32,
    /// Active tag recorded at mode entry; a change is an exit condition.
    entry_tag: String,
}

struct Operation {
    telemetry: TelemetryEngine,
    session: TagSession,
    last_upload_ms: u32,
    last_refetch_ms: u32,
}

pub struct Controller {
    mode: OperatingMode,
    cfg: DeviceConfig,
    missing: Vec<MissingField>,
    sync: SyncEngine,
    config_state: Option<ConfigState>,
    op: Option<Operation>,
}

impl Controller {
    pub fn new(cfg: DeviceConfig, boot: BootSession) -> Self {
        let missing = cfg.critical_missing();
        Self {
            mode: OperatingMode::Configuration,
            cfg,
            missing,
            sync: SyncEngine::new(boot),
            config_state: None,
            op: None,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Critical fields still unresolved, for the user-facing layer to
    /// report.
    pub fn missing(&self) -> &[MissingField] {
        &self.missing
    }

    pub fn start(&mut self, hw: &mut Hardware<'_>, wake: WakeCause, exit_config_pending: bool, now_ms: u32) {
        for field in &self.missing {
            log::warn!("critical configuration missing: {}", field.label());
        }
        match boot_mode(wake, exit_config_pending, !self.missing.is_empty()) {
            OperatingMode::Configuration => self.enter_configuration(hw, now_ms),
            OperatingMode::Operational => self.enter_operation(hw, now_ms),
        }
    }

    pub fn tick(&mut self, hw: &mut Hardware<'_>, now_ms: u32) {
        match self.mode {
            OperatingMode::Configuration => self.config_tick(hw, now_ms),
            OperatingMode::Operational => self.operational_tick(hw, now_ms),
        }
    }

    // -----------------------------------------------------------------------
    // Configuration mode
    // -----------------------------------------------------------------------

    fn enter_configuration(&mut self, hw: &mut Hardware<'_>, now_ms: u32) {
        self.mode = OperatingMode::Configuration;
        log::info!("entering configuration mode");

        let ap_ssid = format!("{}-setup", self.cfg.device_name);
        if let Err(e) = hw.wifi.enter_ap_mode(&ap_ssid) {
            log::error!("access point start failed: {}", e);
        }
        if let Err(e) = hw.portal.start() {
            log::error!("configuration portal start failed: {}", e);
        }

        self.config_state = Some(ConfigState {
            entered_ms: now_ms,
            entry_tag: self.cfg.default_tag.clone().unwrap_or_default(),
        });
    }

    fn config_tick(&mut self, hw: &mut Hardware<'_>, now_ms: u32) {
        let Some(state) = self.config_state.as_mut() else {
            return;
        };

        // 1. A different tag showed up: the rider in front of the device
        //    wants to ride, not to configure.
        if let Some(uid) = hw.scanner.poll() {
            if !uid.is_empty() && uid != state.entry_tag {
                log::info!("tag {} seen during configuration, leaving", uid);
                hw.signals.rider_cue();
                self.try_leave_configuration(hw, now_ms);
                return;
            }
        }

        // 2. A literal pedal stroke means the same thing.
        if hw.counter.count() > 0 {
            log::info!("wheel pulse during configuration, leaving");
            self.try_leave_configuration(hw, now_ms);
            return;
        }

        // 3./4. Window expired: leave if the configuration became complete,
        //    otherwise re-arm the window and keep the portal up.
        if now_ms.wrapping_sub(state.entered_ms) >= CONFIG_MODE_TIMEOUT_MS {
            self.reload_config(hw.store);
            if self.missing.is_empty() {
                log::info!("configuration window expired and config is complete");
                self.try_leave_configuration(hw, now_ms);
            } else {
                for field in &self.missing {
                    log::warn!("still missing: {}", field.label());
                }
                if let Some(state) = self.config_state.as_mut() {
                    state.entered_ms = now_ms;
                }
            }
        }
    }

    /// Exit configuration mode — unless a re-read shows the critical set is
    /// still incomplete, in which case the device must stay put no matter
    /// which condition fired.
    fn try_leave_configuration(&mut self, hw: &mut Hardware<'_>, now_ms: u32) {
        self.reload_config(hw.store);
        if !self.missing.is_empty() {
            for field in &self.missing {
                log::warn!("cannot leave configuration, missing: {}", field.label());
            }
            // Re-arm so the same trigger doesn't fire every tick.
            hw.counter.clear();
            self.config_state = Some(ConfigState {
                entered_ms: now_ms,
                entry_tag: self.cfg.default_tag.clone().unwrap_or_default(),
            });
            return;
        }

        if let Err(e) = hw.portal.stop() {
            log::warn!("portal stop failed: {}", e);
        }
        if let Err(e) = hw.wifi.enter_client_mode() {
            log::warn!("client mode switch failed: {}", e);
        }
        self.config_state = None;
        self.enter_operation(hw, now_ms);
    }

    fn reload_config(&mut self, store: &mut dyn ConfigStore) {
        self.cfg = DeviceConfig::load(store);
        self.missing = self.cfg.critical_missing();
    }

    // -----------------------------------------------------------------------
    // Operational mode
    // -----------------------------------------------------------------------

    fn enter_operation(&mut self, hw: &mut Hardware<'_>, now_ms: u32) {
        let (Some(wheel_mm), Some(default_tag)) = (self.cfg.wheel_mm, self.cfg.default_tag.clone())
        else {
            // Should be unreachable: every path here re-checks the critical
            // set first.
            log::error!("operational entry without complete configuration");
            self.enter_configuration(hw, now_ms);
            return;
        };

        self.mode = OperatingMode::Operational;
        log::info!(
            "entering operational mode (wheel {} mm, default tag {})",
            wheel_mm,
            default_tag
        );

        self.op = Some(Operation {
            telemetry: TelemetryEngine::new(wheel_mm),
            session: TagSession::new(&default_tag),
            last_upload_ms: now_ms,
            last_refetch_ms: now_ms,
        });

        if self.sync.connect(hw.wifi, hw.signals, &self.cfg).is_ok() {
            self.sync.sync_after_connect(
                hw.http, hw.installer, hw.store, &mut self.cfg, hw.system, now_ms,
            );
        }
    }

    fn operational_tick(&mut self, hw: &mut Hardware<'_>, now_ms: u32) {
        let Some(op) = self.op.as_mut() else {
            return;
        };

        // Fixed order per tick: rider session, pulse sampling, upload
        // timer, periodic re-sync, sleep evaluation.
        op.session.tick(
            hw.scanner,
            hw.signals,
            &mut op.telemetry,
            hw.counter,
            &mut self.sync,
            hw.http,
            &self.cfg,
            now_ms,
        );

        op.telemetry.sample(hw.counter, hw.signals, now_ms);

        let send_interval_s = if self.cfg.test_mode {
            self.cfg.test_interval_s
        } else {
            self.cfg.send_interval_s.unwrap_or(30)
        };
        if now_ms.wrapping_sub(op.last_upload_ms) as u64 >= send_interval_s as u64 * 1000 {
            op.last_upload_ms = now_ms;

            if !self.sync.is_connected()
                && self.sync.connect(hw.wifi, hw.signals, &self.cfg).is_ok()
            {
                self.sync.sync_after_connect(
                    hw.http, hw.installer, hw.store, &mut self.cfg, hw.system, now_ms,
                );
            }

            let distance_km = if self.cfg.test_mode {
                self.cfg.test_distance_m as f64 / 1000.0
            } else {
                op.telemetry.distance_km_since_sync()
            };
            let result = self.sync.send_telemetry(
                hw.http,
                &self.cfg,
                op.session.active_tag(),
                op.telemetry.speed_kmh(),
                distance_km,
                op.telemetry.pulses_since_sync(),
                self.cfg.test_mode,
                now_ms,
            );
            match result {
                Ok(()) => {
                    op.telemetry.mark_synced();
                    op.session.mark_upload_success();
                }
                Err(e) => log::warn!("telemetry upload failed: {}", e),
            }
        }

        if now_ms.wrapping_sub(op.last_refetch_ms) as u64
            >= self.cfg.refetch_interval_s as u64 * 1000
        {
            op.last_refetch_ms = now_ms;
            if self.sync.is_connected() {
                let _ = self
                    .sync
                    .fetch_config(hw.http, hw.store, &mut self.cfg, hw.system, now_ms);
                let _ = self.sync.check_firmware_update(
                    hw.http, hw.installer, hw.system, &self.cfg, now_ms,
                );
            }
        }

        power::tick(
            &self.cfg,
            &mut op.telemetry,
            &mut self.sync,
            hw.counter,
            hw.signals,
            hw.system,
            hw.http,
            hw.installer,
            now_ms,
        );
    }
}
