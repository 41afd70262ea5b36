// WheelTach — Telemetry Engine
//
// Converts raw wheel-pulse counts into cumulative distance and a smoothed
// speed.  Sampled once per control-loop tick; the hardware counter keeps
// counting between samples, so nothing is lost to loop latency.

use crate::config::{SPEED_BUFFER_SLOTS, SPEED_WINDOW_MAX_MS};
use crate::hw::{PulseCounter, Signals};

/// Fixed-capacity rolling buffer of the most recent instantaneous speeds.
/// Reports the arithmetic mean of the filled slots.
#[derive(Debug, Default)]
struct SpeedWindow {
    slots: [f32; SPEED_BUFFER_SLOTS],
    next: usize,
    filled: usize,
}

impl SpeedWindow {
    fn push(&mut self, kmh: f32) {
        self.slots[self.next] = kmh;
        self.next = (self.next + 1) % SPEED_BUFFER_SLOTS;
        self.filled = (self.filled + 1).min(SPEED_BUFFER_SLOTS);
    }

    fn mean(&self) -> f32 {
        if self.filled == 0 {
            return 0.0;
        }
        self.slots.iter().take(self.filled).sum::<f32>() / self.filled as f32
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

pub struct TelemetryEngine {
    wheel_mm: u32,

    distance_mm: f64,
    speed: SpeedWindow,

    last_count: u32,
    last_pulse_ms: u32,
    has_pulse: bool,

    // Baseline recorded at the last successful upload.
    synced_count: u32,
    synced_distance_mm: f64,
}

impl TelemetryEngine {
    pub fn new(wheel_mm: u32) -> Self {
        Self {
            wheel_mm,
            distance_mm: 0.0,
            speed: SpeedWindow::default(),
            last_count: 0,
            last_pulse_ms: 0,
            has_pulse: false,
            synced_count: 0,
            synced_distance_mm: 0.0,
        }
    }

    /// Read the hardware counter; no-op while it is unchanged.  On new
    /// pulses: extend cumulative distance, derive an instantaneous speed
    /// from the inter-pulse delta, and blip the status LED.
    pub fn sample(&mut self, counter: &dyn PulseCounter, signals: &mut dyn Signals, now_ms: u32) {
        let count = counter.count();
        if count == self.last_count {
            return;
        }

        self.distance_mm = count as f64 * self.wheel_mm as f64;

        let delta_ms = now_ms.wrapping_sub(self.last_pulse_ms);
        let kmh = if self.has_pulse && delta_ms > 0 && delta_ms < SPEED_WINDOW_MAX_MS {
            // mm/ms → km/h
            (self.wheel_mm as f32 / delta_ms as f32) * 3.6
        } else {
            0.0 // first pulse, or longer than the validity window: stopped
        };
        self.speed.push(kmh);

        self.last_count = count;
        self.last_pulse_ms = now_ms;
        self.has_pulse = true;

        signals.wheel_blip();
    }

    /// Zero distance, the speed window, and the hardware counter.  Called
    /// only on a tag-session change; there is no concurrent writer, so the
    /// three clears are atomic with respect to the loop.
    pub fn reset(&mut self, counter: &mut dyn PulseCounter) {
        counter.clear();
        self.distance_mm = 0.0;
        self.speed.clear();
        self.last_count = 0;
        self.has_pulse = false;
        self.synced_count = 0;
        self.synced_distance_mm = 0.0;
    }

    pub fn speed_kmh(&self) -> f32 {
        self.speed.mean()
    }

    pub fn distance_mm(&self) -> f64 {
        self.distance_mm
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_mm / 1_000_000.0
    }

    /// Milliseconds-since-boot of the most recent counted pulse.
    pub fn last_pulse_ms(&self) -> u32 {
        self.last_pulse_ms
    }

    /// Treat `now_ms` as activity for the inactivity timer (used when sleep
    /// is deferred because the sensor line was mid-pulse).
    pub fn touch(&mut self, now_ms: u32) {
        self.last_pulse_ms = now_ms;
    }

    pub fn pulses_since_sync(&self) -> u32 {
        self.last_count.saturating_sub(self.synced_count)
    }

    pub fn distance_km_since_sync(&self) -> f64 {
        (self.distance_mm - self.synced_distance_mm) / 1_000_000.0
    }

    /// Record the current totals as uploaded.
    pub fn mark_synced(&mut self) {
        self.synced_count = self.last_count;
        self.synced_distance_mm = self.distance_mm;
    }
}
