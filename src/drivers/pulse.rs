// WheelTach — Wheel Pulse Counter
//
// The reed switch closes once per wheel revolution.  A GPIO edge ISR keeps
// an atomic count so no pulse is lost while the control loop is busy with a
// network round-trip.  The counter behaves like a peripheral: it runs until
// explicitly cleared.

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::ensure;

use crate::config::PIN_WHEEL_SENSOR;
use crate::hw::PulseCounter;

static PULSE_COUNT: AtomicU32 = AtomicU32::new(0);

unsafe extern "C" fn on_falling_edge(_arg: *mut core::ffi::c_void) {
    PULSE_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub struct WheelPulseCounter;

impl WheelPulseCounter {
    /// Configure the sensor pin (pull-up, falling edge) and attach the ISR.
    pub fn install() -> anyhow::Result<Self> {
        unsafe {
            let mut ret = esp_idf_sys::gpio_set_direction(
                PIN_WHEEL_SENSOR,
                esp_idf_sys::gpio_mode_t_GPIO_MODE_INPUT,
            );
            ensure!(ret == esp_idf_sys::ESP_OK, "gpio direction failed ({})", ret);

            ret = esp_idf_sys::gpio_set_pull_mode(
                PIN_WHEEL_SENSOR,
                esp_idf_sys::gpio_pull_mode_t_GPIO_PULLUP_ONLY,
            );
            ensure!(ret == esp_idf_sys::ESP_OK, "gpio pull mode failed ({})", ret);

            ret = esp_idf_sys::gpio_set_intr_type(
                PIN_WHEEL_SENSOR,
                esp_idf_sys::gpio_int_type_t_GPIO_INTR_NEGEDGE,
            );
            ensure!(ret == esp_idf_sys::ESP_OK, "gpio intr type failed ({})", ret);

            // May already be installed by another component.
            ret = esp_idf_sys::gpio_install_isr_service(0);
            ensure!(
                ret == esp_idf_sys::ESP_OK || ret == esp_idf_sys::ESP_ERR_INVALID_STATE,
                "isr service install failed ({})",
                ret
            );

            ret = esp_idf_sys::gpio_isr_handler_add(
                PIN_WHEEL_SENSOR,
                Some(on_falling_edge),
                core::ptr::null_mut(),
            );
            ensure!(ret == esp_idf_sys::ESP_OK, "isr handler add failed ({})", ret);
        }

        log::info!("wheel sensor armed on GPIO{}", PIN_WHEEL_SENSOR);
        Ok(Self)
    }
}

impl PulseCounter for WheelPulseCounter {
    fn count(&self) -> u32 {
        PULSE_COUNT.load(Ordering::Relaxed)
    }

    fn clear(&mut self) {
        PULSE_COUNT.store(0, Ordering::Relaxed);
    }

    fn line_active(&self) -> bool {
        // Active LOW: the reed contact pulls the line down while the magnet
        // passes.
        unsafe { esp_idf_sys::gpio_get_level(PIN_WHEEL_SENSOR) == 0 }
    }
}
