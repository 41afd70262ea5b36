// WheelTach — Hardware & System Configuration
// Target: Seeed Studio Xiao ESP32-C3 (RISC-V)

// ---------------------------------------------------------------------------
// GPIO Pin Definitions (Xiao ESP32-C3 pinout)
// ---------------------------------------------------------------------------
pub const PIN_WHEEL_SENSOR: i32 = 3; // D1 — Reed switch (INPUT_PULLUP, active LOW)
pub const PIN_STATUS_LED: i32 = 4;   // D2 — Pulse blip LED
pub const PIN_BUZZER: i32 = 5;       // D3 — Piezo feedback
pub const PIN_RC522_SCK: i32 = 8;    // D8 — SPI clock
pub const PIN_RC522_MOSI: i32 = 10;  // D10 — SPI out
pub const PIN_RC522_MISO: i32 = 9;   // D9 — SPI in
pub const PIN_RC522_CS: i32 = 7;     // D5 — SPI chip select

// ---------------------------------------------------------------------------
// Timing (milliseconds unless noted)
// ---------------------------------------------------------------------------
pub const TICK_INTERVAL_MS: u64 = 50;            // main control loop period
pub const WIFI_CONNECT_TIMEOUT_MS: u32 = 10_000; // bounded association attempt
pub const HTTP_TIMEOUT_MS: u64 = 10_000;         // every remote call is bounded
pub const SERVER_BACKOFF_MS: u32 = 60_000;       // wait after a server-side failure
pub const PULSE_BLIP_MS: u64 = 20;               // LED blip per counted pulse
pub const CONFIG_MODE_TIMEOUT_MS: u32 = 300_000; // portal window before re-check

// Inter-pulse deltas above this are treated as "stopped" rather than a speed.
pub const SPEED_WINDOW_MAX_MS: u32 = 5_000;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------
pub const SPEED_BUFFER_SLOTS: usize = 5;
pub const MAX_CONNECT_FAILURES: u8 = 3;
pub const WHEEL_MM_MIN: u32 = 500;
pub const WHEEL_MM_MAX: u32 = 3000;

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// NVS keys (max 15 chars). `KEY_TAG_LEGACY` is the pre-0.2 name for the
// default tag and is migrated to `KEY_DEFAULT_TAG` on first read.
// ---------------------------------------------------------------------------
pub const NVS_NAMESPACE: &str = "wheeltach";

pub const KEY_WIFI_SSID: &str = "wifi_ssid";
pub const KEY_WIFI_PASS: &str = "wifi_pass";
pub const KEY_DEVICE_NAME: &str = "dev_name";
pub const KEY_DEFAULT_TAG: &str = "def_tag";
pub const KEY_TAG_LEGACY: &str = "id_tag";
pub const KEY_WHEEL_MM: &str = "wheel_mm";
pub const KEY_SERVER_URL: &str = "srv_url";
pub const KEY_API_KEY: &str = "api_key";
pub const KEY_SEND_INTERVAL: &str = "send_iv";
pub const KEY_SLEEP_TIMEOUT: &str = "sleep_to";
pub const KEY_REFETCH_INTERVAL: &str = "cfg_iv";
pub const KEY_TEST_MODE: &str = "test_mode";
pub const KEY_TEST_DISTANCE: &str = "test_dist";
pub const KEY_TEST_INTERVAL: &str = "test_iv";
pub const KEY_EXIT_CONFIG: &str = "cfg_exit";

// ---------------------------------------------------------------------------
// Compile-time defaults (middle tier of the config resolution; set via
// environment at build time, written back to NVS on first resolve)
// ---------------------------------------------------------------------------
pub const DEFAULT_WIFI_SSID: Option<&str> = option_env!("WHEELTACH_WIFI_SSID");
pub const DEFAULT_WIFI_PASS: Option<&str> = option_env!("WHEELTACH_WIFI_PASS");
pub const DEFAULT_DEVICE_NAME: Option<&str> = option_env!("WHEELTACH_DEVICE_NAME");
pub const DEFAULT_TAG: Option<&str> = option_env!("WHEELTACH_DEFAULT_TAG");
pub const DEFAULT_WHEEL_MM: Option<&str> = option_env!("WHEELTACH_WHEEL_MM");
pub const DEFAULT_SERVER_URL: Option<&str> = option_env!("WHEELTACH_SERVER_URL");
pub const DEFAULT_API_KEY: Option<&str> = option_env!("WHEELTACH_API_KEY");
pub const DEFAULT_SEND_INTERVAL: Option<&str> = option_env!("WHEELTACH_SEND_INTERVAL");

// ---------------------------------------------------------------------------
// Hard-coded fallbacks (last tier). The four critical fields — SSID, default
// tag, wheel size, send interval — deliberately have none: when they cannot
// be resolved the device must stay in configuration mode.
// ---------------------------------------------------------------------------
pub const FALLBACK_DEVICE_NAME: &str = "wheeltach";
pub const FALLBACK_SLEEP_TIMEOUT_S: u32 = 300; // 0 disables deep sleep
pub const FALLBACK_REFETCH_S: u32 = 3_600;
pub const FALLBACK_TEST_DISTANCE_M: u32 = 500;
pub const FALLBACK_TEST_INTERVAL_S: u32 = 10;
