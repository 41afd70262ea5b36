// WheelTach — Firmware Entry Point
//
// Boot sequence:
//   1. Detect the wake cause (power-on vs sensor-triggered deep-sleep wake).
//   2. Read and clear the one-shot exit-configuration flag.
//   3. Resolve the device configuration (store → build default → fallback).
//   4. Bring up the wheel-pulse ISR, feedback GPIO, RC522 and radio.
//   5. Hand everything to the mode controller and tick it forever.
//
// The loop ends only through a deep-sleep suspension or a restart.

use std::thread;
use std::time::Duration;

use esp_idf_hal::gpio::{OutputPin, PinDriver};
use esp_idf_hal::prelude::*;
use esp_idf_hal::spi::{config::Config as SpiConfig, SpiDeviceDriver, SpiDriverConfig};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use crate::config::*;
use crate::drivers::feedback::FeedbackDriver;
use crate::drivers::pulse::WheelPulseCounter;
use crate::drivers::rc522::Rc522;
use crate::mode::{Controller, Hardware, WakeCause};
use crate::net::http::EspTransport;
use crate::net::ota::OtaInstaller;
use crate::net::wifi::EspWifiLink;
use crate::net::BootSession;
use crate::portal::SetupPortal;
use crate::power::EspSystemControl;
use crate::store::{take_exit_config_flag, DeviceConfig, NvsStore};

pub fn run() -> anyhow::Result<()> {
    // Link esp-idf-sys runtime patches and initialise logging.
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("WheelTach {} starting…", FIRMWARE_VERSION);

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let partition = EspDefaultNvsPartition::take()?;

    // ---- Wake cause & persisted flags -------------------------------------
    let wake = wake_cause();
    let mut store = NvsStore::new(partition.clone())?;
    let exit_config_pending = take_exit_config_flag(&mut store);
    log::info!(
        "wake cause: {:?}, exit-config pending: {}",
        wake,
        exit_config_pending
    );

    let cfg = DeviceConfig::load(&mut store);

    // ---- Peripherals -------------------------------------------------------
    let mut counter = WheelPulseCounter::install()?;

    let led = PinDriver::output(peripherals.pins.gpio4.downgrade_output())?;
    let buzzer = PinDriver::output(peripherals.pins.gpio5.downgrade_output())?;
    let mut signals = FeedbackDriver::new(led, buzzer);

    let spi = SpiDeviceDriver::new_single(
        peripherals.spi2,
        peripherals.pins.gpio8,  // SCK
        peripherals.pins.gpio10, // MOSI
        Some(peripherals.pins.gpio9), // MISO
        Some(peripherals.pins.gpio7), // CS
        &SpiDriverConfig::new(),
        &SpiConfig::new().baudrate(4u32.MHz().into()),
    )?;
    let mut scanner = Rc522::new(spi);
    if let Err(e) = scanner.init() {
        log::error!("RC522 init failed: {}", e);
    }
    if !scanner.is_connected() {
        // Ride on the default tag only; the reader may be unplugged.
        log::warn!("RC522 not responding");
    }

    let mut wifi = EspWifiLink::new(peripherals.modem, sysloop, partition.clone())?;
    let mut http = EspTransport;
    let mut installer = OtaInstaller;
    let mut system = EspSystemControl;
    let mut portal = SetupPortal::new(partition);

    // ---- Controller --------------------------------------------------------
    let session = match wake {
        WakeCause::SensorWake => BootSession::SensorWake,
        WakeCause::PowerOn => BootSession::ColdBoot,
    };
    let mut controller = Controller::new(cfg, session);
    let mut hw = Hardware {
        counter: &mut counter,
        scanner: &mut scanner,
        signals: &mut signals,
        wifi: &mut wifi,
        http: &mut http,
        installer: &mut installer,
        system: &mut system,
        portal: &mut portal,
        store: &mut store,
    };

    controller.start(&mut hw, wake, exit_config_pending, crate::now_ms());

    let tick = Duration::from_millis(TICK_INTERVAL_MS);
    loop {
        controller.tick(&mut hw, crate::now_ms());
        thread::sleep(tick);
    }
}

fn wake_cause() -> WakeCause {
    let cause = unsafe { esp_idf_sys::esp_sleep_get_wakeup_cause() };
    if cause == esp_idf_sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_GPIO {
        WakeCause::SensorWake
    } else {
        WakeCause::PowerOn
    }
}
