// WheelTach — Configuration Portal
//
// Thin web front-end over the NVS store, served while the device is in
// configuration mode.  Saving writes straight to flash, sets the one-shot
// exit flag and reboots; the portal never talks to the controller state.

use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::server::{Configuration as ServerConfiguration, EspHttpServer};
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use crate::config::*;
use crate::hw::ConfigPortal;
use crate::store::{ConfigStore, NvsStore};

pub struct SetupPortal {
    partition: EspDefaultNvsPartition,
    server: Option<EspHttpServer<'static>>,
}

impl SetupPortal {
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        Self {
            partition,
            server: None,
        }
    }
}

impl ConfigPortal for SetupPortal {
    fn start(&mut self) -> anyhow::Result<()> {
        if self.server.is_some() {
            return Ok(());
        }
        let mut server = EspHttpServer::new(&ServerConfiguration::default())?;

        let partition = self.partition.clone();
        server.fn_handler("/", Method::Get, move |req| -> anyhow::Result<()> {
            let store = NvsStore::new(partition.clone())?;
            let page = render_form(&store);
            let mut resp =
                req.into_response(200, Some("OK"), &[("Content-Type", "text/html")])?;
            resp.write_all(page.as_bytes())?;
            Ok(())
        })?;

        let partition = self.partition.clone();
        server.fn_handler("/save", Method::Post, move |mut req| -> anyhow::Result<()> {
            let mut body = Vec::new();
            let mut buf = [0u8; 256];
            while body.len() < 2048 {
                let n = req.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&buf[..n]);
            }

            let mut store = NvsStore::new(partition.clone())?;
            apply_form(&mut store, &body);
            store.set_u32(KEY_EXIT_CONFIG, 1)?;

            let mut resp = req.into_ok_response()?;
            resp.write_all(b"saved - device is restarting")?;
            drop(resp);

            log::info!("portal settings saved, restarting");
            // Let the TCP stack flush the reply before going down.
            std::thread::sleep(std::time::Duration::from_millis(500));
            unsafe {
                esp_idf_sys::esp_restart();
            }
            Ok(())
        })?;

        self.server = Some(server);
        log::info!("configuration portal up");
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        if self.server.take().is_some() {
            log::info!("configuration portal stopped");
        }
        Ok(())
    }
}

const TEXT_FIELDS: &[(&str, &str)] = &[
    (KEY_WIFI_SSID, "WiFi SSID"),
    (KEY_WIFI_PASS, "WiFi password"),
    (KEY_DEVICE_NAME, "Device name"),
    (KEY_DEFAULT_TAG, "Default tag"),
    (KEY_SERVER_URL, "Server URL"),
    (KEY_API_KEY, "API key"),
];

const NUMBER_FIELDS: &[(&str, &str)] = &[
    (KEY_WHEEL_MM, "Wheel circumference (mm)"),
    (KEY_SEND_INTERVAL, "Send interval (s)"),
    (KEY_SLEEP_TIMEOUT, "Sleep timeout (s, 0 = off)"),
    (KEY_REFETCH_INTERVAL, "Config refetch (s)"),
];

fn render_form(store: &NvsStore) -> String {
    let mut page = String::from(
        "<html><body><h1>WheelTach setup</h1><form method='post' action='/save'>",
    );
    for (key, label) in TEXT_FIELDS {
        let current = store.get_str(key).unwrap_or_default();
        page.push_str(&format!(
            "<p>{label}<br><input name='{key}' value='{current}'></p>"
        ));
    }
    for (key, label) in NUMBER_FIELDS {
        let current = store
            .get_u32(key)
            .map(|v| v.to_string())
            .unwrap_or_default();
        page.push_str(&format!(
            "<p>{label}<br><input name='{key}' type='number' value='{current}'></p>"
        ));
    }
    page.push_str("<p><button type='submit'>Save &amp; restart</button></p></form></body></html>");
    page
}

fn apply_form(store: &mut dyn ConfigStore, body: &[u8]) {
    let Ok(body) = std::str::from_utf8(body) else {
        log::warn!("non-utf8 form body ignored");
        return;
    };
    for pair in body.split('&') {
        let Some((key, raw)) = pair.split_once('=') else {
            continue;
        };
        let value = urldecode(raw);
        if value.is_empty() {
            continue;
        }
        if TEXT_FIELDS.iter().any(|(k, _)| k == &key) {
            let _ = store.set_str(key, &value);
        } else if NUMBER_FIELDS.iter().any(|(k, _)| k == &key) {
            if let Ok(v) = value.parse::<u32>() {
                let _ = store.set_u32(key, v);
            }
        }
    }
}

fn urldecode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                if let Ok(v) = u8::from_str_radix(hex, 16) {
                    out.push(v);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
