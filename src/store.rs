// WheelTach — Configuration Store
//
// NVS-backed persistent settings with a three-tier resolution per field:
// persisted value → compile-time default → hard-coded fallback.  A value
// resolved from the compile-time tier is written back so the next boot reads
// it straight from flash.

use crate::config::*;

/// Key/value persistence surviving power loss.  Shaped after NVS: strings
/// and u32 values, no nested structure.
pub trait ConfigStore {
    fn get_str(&self, key: &str) -> Option<String>;
    fn set_str(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn get_u32(&self, key: &str) -> Option<u32>;
    fn set_u32(&mut self, key: &str, value: u32) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Generic three-tier resolver
// ---------------------------------------------------------------------------

/// Resolve a string field.  `legacy` is an alternate key migrated to `key`
/// on first read.  Only the compile-time tier is written back; hard-coded
/// fallbacks stay implicit.
pub fn resolve_str(
    store: &mut dyn ConfigStore,
    key: &str,
    legacy: Option<&str>,
    build_default: Option<&str>,
    fallback: Option<&str>,
) -> Option<String> {
    if let Some(v) = store.get_str(key).filter(|v| !v.is_empty()) {
        return Some(v);
    }

    if let Some(old_key) = legacy {
        if let Some(v) = store.get_str(old_key).filter(|v| !v.is_empty()) {
            if store.set_str(key, &v).is_ok() {
                let _ = store.remove(old_key);
            }
            return Some(v);
        }
    }

    if let Some(v) = build_default.filter(|v| !v.is_empty()) {
        if let Err(e) = store.set_str(key, v) {
            log::warn!("config write-back failed for {}: {}", key, e);
        }
        return Some(v.to_string());
    }

    fallback.map(str::to_string)
}

/// Resolve a numeric field.  A tier whose value fails `valid` is skipped,
/// the same as if it were absent.
pub fn resolve_u32(
    store: &mut dyn ConfigStore,
    key: &str,
    build_default: Option<&str>,
    fallback: Option<u32>,
    valid: impl Fn(u32) -> bool,
) -> Option<u32> {
    if let Some(v) = store.get_u32(key).filter(|&v| valid(v)) {
        return Some(v);
    }

    if let Some(v) = build_default.and_then(|s| s.parse::<u32>().ok()).filter(|&v| valid(v)) {
        if let Err(e) = store.set_u32(key, v) {
            log::warn!("config write-back failed for {}: {}", key, e);
        }
        return Some(v);
    }

    fallback.filter(|&v| valid(v))
}

// ---------------------------------------------------------------------------
// Device configuration
// ---------------------------------------------------------------------------

/// A critical field that could not be resolved through any tier.  The device
/// cannot operate while any of these are missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    WifiSsid,
    DefaultTag,
    WheelSize,
    SendInterval,
}

impl MissingField {
    pub fn label(&self) -> &'static str {
        match self {
            Self::WifiSsid => "wifi ssid",
            Self::DefaultTag => "default tag",
            Self::WheelSize => "wheel size",
            Self::SendInterval => "send interval",
        }
    }
}

/// The full device configuration, cached in memory by the mode controller.
/// Critical fields stay `Option` so a missing value is visible instead of
/// silently defaulted.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub wifi_ssid: Option<String>,
    pub wifi_pass: String,
    pub device_name: String,
    pub default_tag: Option<String>,
    pub wheel_mm: Option<u32>,
    pub server_url: Option<String>,
    pub api_key: String,
    pub send_interval_s: Option<u32>,
    pub sleep_timeout_s: u32,
    pub refetch_interval_s: u32,
    pub test_mode: bool,
    pub test_distance_m: u32,
    pub test_interval_s: u32,
}

impl DeviceConfig {
    pub fn load(store: &mut dyn ConfigStore) -> Self {
        let wheel_ok = |v: u32| (WHEEL_MM_MIN..=WHEEL_MM_MAX).contains(&v);

        Self {
            wifi_ssid: resolve_str(store, KEY_WIFI_SSID, None, DEFAULT_WIFI_SSID, None),
            wifi_pass: resolve_str(store, KEY_WIFI_PASS, None, DEFAULT_WIFI_PASS, Some(""))
                .unwrap_or_default(),
            device_name: resolve_str(
                store,
                KEY_DEVICE_NAME,
                None,
                DEFAULT_DEVICE_NAME,
                Some(FALLBACK_DEVICE_NAME),
            )
            .unwrap_or_else(|| FALLBACK_DEVICE_NAME.to_string()),
            default_tag: resolve_str(
                store,
                KEY_DEFAULT_TAG,
                Some(KEY_TAG_LEGACY),
                DEFAULT_TAG,
                None,
            ),
            wheel_mm: resolve_u32(store, KEY_WHEEL_MM, DEFAULT_WHEEL_MM, None, wheel_ok),
            server_url: resolve_str(store, KEY_SERVER_URL, None, DEFAULT_SERVER_URL, None),
            api_key: resolve_str(store, KEY_API_KEY, None, DEFAULT_API_KEY, Some(""))
                .unwrap_or_default(),
            send_interval_s: resolve_u32(
                store,
                KEY_SEND_INTERVAL,
                DEFAULT_SEND_INTERVAL,
                None,
                |v| v > 0,
            ),
            sleep_timeout_s: resolve_u32(
                store,
                KEY_SLEEP_TIMEOUT,
                None,
                Some(FALLBACK_SLEEP_TIMEOUT_S),
                |_| true,
            )
            .unwrap_or(FALLBACK_SLEEP_TIMEOUT_S),
            refetch_interval_s: resolve_u32(
                store,
                KEY_REFETCH_INTERVAL,
                None,
                Some(FALLBACK_REFETCH_S),
                |_| true,
            )
            .unwrap_or(FALLBACK_REFETCH_S),
            test_mode: store.get_u32(KEY_TEST_MODE).unwrap_or(0) != 0,
            test_distance_m: resolve_u32(
                store,
                KEY_TEST_DISTANCE,
                None,
                Some(FALLBACK_TEST_DISTANCE_M),
                |v| v > 0,
            )
            .unwrap_or(FALLBACK_TEST_DISTANCE_M),
            test_interval_s: resolve_u32(
                store,
                KEY_TEST_INTERVAL,
                None,
                Some(FALLBACK_TEST_INTERVAL_S),
                |v| v > 0,
            )
            .unwrap_or(FALLBACK_TEST_INTERVAL_S),
        }
    }

    /// Critical fields still unresolved after all three tiers.  Non-empty
    /// forces configuration mode regardless of wake cause.
    pub fn critical_missing(&self) -> Vec<MissingField> {
        let mut missing = Vec::new();
        if self.wifi_ssid.is_none() {
            missing.push(MissingField::WifiSsid);
        }
        if self.default_tag.is_none() {
            missing.push(MissingField::DefaultTag);
        }
        if self.wheel_mm.is_none() {
            missing.push(MissingField::WheelSize);
        }
        if self.send_interval_s.is_none() {
            missing.push(MissingField::SendInterval);
        }
        missing
    }
}

/// Read and clear the one-shot "exiting configuration mode" flag.
pub fn take_exit_config_flag(store: &mut dyn ConfigStore) -> bool {
    let set = store.get_u32(KEY_EXIT_CONFIG).unwrap_or(0) != 0;
    if set {
        let _ = store.remove(KEY_EXIT_CONFIG);
    }
    set
}

// ---------------------------------------------------------------------------
// NVS implementation (device)
// ---------------------------------------------------------------------------

#[cfg(target_os = "espidf")]
pub use esp_nvs::NvsStore;

#[cfg(target_os = "espidf")]
mod esp_nvs {
    use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

    use super::ConfigStore;
    use crate::config::NVS_NAMESPACE;

    pub struct NvsStore {
        nvs: EspNvs<NvsDefault>,
    }

    impl NvsStore {
        pub fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
            Ok(Self {
                nvs: EspNvs::new(partition, NVS_NAMESPACE, true)?,
            })
        }
    }

    impl ConfigStore for NvsStore {
        fn get_str(&self, key: &str) -> Option<String> {
            let mut buf = [0u8; 128];
            match self.nvs.get_str(key, &mut buf) {
                Ok(Some(v)) => Some(v.to_string()),
                _ => None,
            }
        }

        fn set_str(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
            self.nvs.set_str(key, value)?;
            Ok(())
        }

        fn get_u32(&self, key: &str) -> Option<u32> {
            self.nvs.get_u32(key).ok().flatten()
        }

        fn set_u32(&mut self, key: &str, value: u32) -> anyhow::Result<()> {
            self.nvs.set_u32(key, value)?;
            Ok(())
        }

        fn remove(&mut self, key: &str) -> anyhow::Result<()> {
            self.nvs.remove(key)?;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory double (host tests)
// ---------------------------------------------------------------------------
