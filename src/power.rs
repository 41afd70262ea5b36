// WheelTach — Power Lifecycle
//
// Decides when the device has been idle long enough to suspend into deep
// sleep, and performs the pre-sleep ritual: one last firmware check, rail
// shutdown, wake-trigger arm.  Waking restarts the whole process; nothing
// outside the store and the hardware counter survives.

use crate::hw::{PulseCounter, Signals, SystemControl};
use crate::net::http::HttpTransport;
use crate::net::ota::FirmwareInstaller;
use crate::net::SyncEngine;
use crate::store::DeviceConfig;
use crate::telemetry::TelemetryEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepDecision {
    /// Not idle long enough (or sleep disabled).
    Stay,
    /// Idle, but the sensor line is mid-pulse: reset the timer instead of
    /// risking a lost count.
    Defer,
    Suspend,
}

fn inactivity_exceeded(now_ms: u32, last_pulse_ms: u32, timeout_s: u32) -> bool {
    let elapsed = now_ms.wrapping_sub(last_pulse_ms) as u64;
    elapsed > timeout_s as u64 * 1000
}

/// Derived each tick, never persisted.
pub fn evaluate(now_ms: u32, last_pulse_ms: u32, timeout_s: u32, line_active: bool) -> SleepDecision {
    if timeout_s == 0 || !inactivity_exceeded(now_ms, last_pulse_ms, timeout_s) {
        SleepDecision::Stay
    } else if line_active {
        SleepDecision::Defer
    } else {
        SleepDecision::Suspend
    }
}

/// One power tick.  May not return on the device: a firmware download
/// restarts, a suspension powers down.
#[allow(clippy::too_many_arguments)]
pub fn tick(
    cfg: &DeviceConfig,
    telemetry: &mut TelemetryEngine,
    sync: &mut SyncEngine,
    counter: &dyn PulseCounter,
    signals: &mut dyn Signals,
    system: &mut dyn SystemControl,
    http: &mut dyn HttpTransport,
    installer: &mut dyn FirmwareInstaller,
    now_ms: u32,
) {
    if cfg.sleep_timeout_s == 0 {
        return;
    }
    if !inactivity_exceeded(now_ms, telemetry.last_pulse_ms(), cfg.sleep_timeout_s) {
        return;
    }

    // Last chance to pick up an update before a long idle stretch; a
    // successful download restarts the device right here.
    if sync.is_connected() {
        let _ = sync.check_firmware_update(http, installer, system, cfg, now_ms);
    }

    match evaluate(
        now_ms,
        telemetry.last_pulse_ms(),
        cfg.sleep_timeout_s,
        counter.line_active(),
    ) {
        SleepDecision::Stay => {}
        SleepDecision::Defer => {
            log::info!("sensor line active, deferring deep sleep");
            telemetry.touch(now_ms);
        }
        SleepDecision::Suspend => {
            log::info!(
                "idle for more than {} s, entering deep sleep",
                cfg.sleep_timeout_s
            );
            signals.shutdown();
            system.deep_sleep_until_pulse();
        }
    }
}

#[cfg(target_os = "espidf")]
pub use esp::EspSystemControl;

#[cfg(target_os = "espidf")]
mod esp {
    use crate::config::PIN_WHEEL_SENSOR;
    use crate::hw::SystemControl;

    pub struct EspSystemControl;

    impl SystemControl for EspSystemControl {
        fn restart(&mut self) {
            log::info!("restarting");
            unsafe {
                esp_idf_sys::esp_restart();
            }
        }

        /// Configure GPIO wakeup on the sensor line going LOW and enter
        /// deep sleep.  Does not return; the next pulse restarts the
        /// firmware from its entry point.
        fn deep_sleep_until_pulse(&mut self) {
            log::info!("deep sleep — wake on wheel pulse (GPIO{})", PIN_WHEEL_SENSOR);
            unsafe {
                esp_idf_sys::esp_deep_sleep_enable_gpio_wakeup(
                    1u64 << PIN_WHEEL_SENSOR,
                    esp_idf_sys::esp_deepsleep_gpio_wake_up_mode_t_ESP_GPIO_WAKEUP_GPIO_LOW,
                );
                esp_idf_sys::esp_deep_sleep_start();
            }
        }
    }
}
