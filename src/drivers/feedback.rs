// WheelTach — Feedback Driver
//
// Status LED + piezo buzzer on plain GPIO.

use std::thread;
use std::time::Duration;

use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};

use crate::config::PULSE_BLIP_MS;
use crate::hw::Signals;

pub struct FeedbackDriver<'d> {
    led: PinDriver<'d, AnyOutputPin, Output>,
    buzzer: PinDriver<'d, AnyOutputPin, Output>,
}

impl<'d> FeedbackDriver<'d> {
    pub fn new(
        led: PinDriver<'d, AnyOutputPin, Output>,
        buzzer: PinDriver<'d, AnyOutputPin, Output>,
    ) -> Self {
        Self { led, buzzer }
    }

    /// Drive the buzzer for a fixed duration (blocks the calling thread).
    fn beep(&mut self, duration: Duration) {
        let _ = self.buzzer.set_high();
        thread::sleep(duration);
        let _ = self.buzzer.set_low();
    }
}

impl Signals for FeedbackDriver<'_> {
    fn wheel_blip(&mut self) {
        let _ = self.led.set_high();
        thread::sleep(Duration::from_millis(PULSE_BLIP_MS));
        let _ = self.led.set_low();
    }

    /// Two short beeps — a new rider took over.
    fn rider_cue(&mut self) {
        self.beep(Duration::from_millis(60));
        thread::sleep(Duration::from_millis(60));
        self.beep(Duration::from_millis(60));
    }

    /// One long beep — connectivity gave up.
    fn error_cue(&mut self) {
        self.beep(Duration::from_millis(400));
    }

    fn shutdown(&mut self) {
        let _ = self.led.set_low();
        let _ = self.buzzer.set_low();
    }
}
