// WheelTach — Bicycle Tachometer Firmware
//
// Controller core for a wheel-pulse + RFID sensor node: distance/speed
// telemetry, rider identification, server sync over an intermittent WiFi
// link, and a deep-sleep power lifecycle.  The logic modules are
// target-independent; everything touching ESP-IDF is gated on the espidf
// target so the engines and their tests build on the host.

pub mod config;
pub mod hw;
pub mod mode;
pub mod net;
pub mod power;
pub mod store;
pub mod tag;
pub mod telemetry;

#[cfg(target_os = "espidf")]
pub mod boot;
#[cfg(target_os = "espidf")]
pub mod drivers;
#[cfg(target_os = "espidf")]
pub mod portal;

// ---------------------------------------------------------------------------
// Utility: milliseconds since boot (wraps at ~49 days — fine for timeouts)
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
pub fn now_ms() -> u32 {
    unsafe { (esp_idf_sys::esp_timer_get_time() / 1000) as u32 }
}
