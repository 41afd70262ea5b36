// WheelTach — WiFi Link
//
// Station mode for operation, access-point mode for the configuration
// portal.  Association is polled with a hard deadline so a dead network
// can never stall the control loop for more than the configured bound.

use std::thread;
use std::time::{Duration, Instant};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};

use crate::hw::WifiLink;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct EspWifiLink {
    wifi: EspWifi<'static>,
}

impl EspWifiLink {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            wifi: EspWifi::new(modem, sysloop, Some(nvs))?,
        })
    }

    fn ensure_started(&mut self) -> anyhow::Result<()> {
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }
}

impl WifiLink for EspWifiLink {
    fn connect(&mut self, ssid: &str, pass: &str, timeout_ms: u32) -> anyhow::Result<bool> {
        let auth_method = if pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid.try_into().unwrap_or_default(),
                password: pass.try_into().unwrap_or_default(),
                auth_method,
                ..Default::default()
            }))?;
        self.ensure_started()?;
        self.wifi.connect()?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        while Instant::now() < deadline {
            if self.wifi.is_connected()? && self.wifi.sta_netif().is_up()? {
                if let Ok(info) = self.wifi.sta_netif().get_ip_info() {
                    log::info!("got IP {}", info.ip);
                }
                return Ok(true);
            }
            thread::sleep(POLL_INTERVAL);
        }

        let _ = self.wifi.disconnect();
        Ok(false)
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn enter_client_mode(&mut self) -> anyhow::Result<()> {
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
        self.ensure_started()?;
        Ok(())
    }

    fn enter_ap_mode(&mut self, ssid: &str) -> anyhow::Result<()> {
        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: ssid.try_into().unwrap_or_default(),
                auth_method: AuthMethod::None,
                ..Default::default()
            }))?;
        self.ensure_started()?;
        log::info!("access point '{}' up", ssid);
        Ok(())
    }
}
