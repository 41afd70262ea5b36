// WheelTach — Remote API Types
//
// JSON payloads for the tracking backend and the HTTP-status → error
// classification shared by every call.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classified outcome of a remote exchange.  Returned as a value — nothing
/// in the sync engine panics or propagates transport errors raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// A required local setting (server URL) is absent.  Never retried.
    Configuration,
    /// No network association.
    Connectivity,
    /// 401/403 — sticky until any request succeeds.
    Authentication,
    /// 503 — the backend is down for maintenance.
    Maintenance,
    /// Any other non-2xx, and malformed response bodies.
    Server,
    /// 404 where it is an expected outcome (identity resolution).
    NotFound,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration missing",
            Self::Connectivity => "no connection",
            Self::Authentication => "authentication rejected",
            Self::Maintenance => "server maintenance",
            Self::Server => "server error",
            Self::NotFound => "not found",
        };
        f.write_str(s)
    }
}

pub fn classify_status(status: u16) -> Result<(), SyncError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(SyncError::Authentication),
        404 => Err(SyncError::NotFound),
        503 => Err(SyncError::Maintenance),
        _ => Err(SyncError::Server),
    }
}

/// Join the configured base URL and an endpoint path.
pub fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// POST /api/update-data — distance in km, decimal.
#[derive(Serialize)]
pub struct TelemetryReport<'a> {
    pub device_id: &'a str,
    pub id_tag: &'a str,
    pub distance: f64,
}

/// POST /api/get-user-id
#[derive(Serialize)]
pub struct UserQuery<'a> {
    pub id_tag: &'a str,
}

/// 200 reply to get-user-id.  `user_id` may be the literal "NULL" when the
/// tag exists but has no identity assigned.
#[derive(Deserialize)]
pub struct UserReply {
    pub user_id: String,
}

/// POST /api/device/config/report
#[derive(Serialize)]
pub struct ConfigReport<'a> {
    pub device_id: &'a str,
    pub config: ConfigSnapshot<'a>,
}

#[derive(Serialize)]
pub struct ConfigSnapshot<'a> {
    pub device_name: &'a str,
    pub default_id_tag: &'a str,
    pub send_interval_seconds: u32,
    pub wheel_size: u32,
    pub server_url: &'a str,
    pub api_key: &'a str,
}

/// GET /api/device/config/fetch reply.  Absent fields leave the stored
/// value untouched.
#[derive(Deserialize)]
pub struct ConfigFetchReply {
    #[serde(default)]
    pub config: RemoteConfig,
    #[serde(default)]
    pub requires_restart: bool,
}

#[derive(Deserialize, Default)]
pub struct RemoteConfig {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub default_id_tag: Option<String>,
    #[serde(default)]
    pub send_interval_seconds: Option<u32>,
    #[serde(default)]
    pub wheel_size: Option<u32>,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// GET /api/device/firmware/info reply.
#[derive(Deserialize)]
pub struct FirmwareInfo {
    pub update_available: bool,
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// POST /api/device/heartbeat
#[derive(Serialize)]
pub struct Heartbeat<'a> {
    pub device_id: &'a str,
}
