// WheelTach — Hardware Seams
//
// Narrow interfaces over every peripheral the controller touches, so the
// engines can be exercised on the host with in-memory doubles.  The real
// implementations live under `drivers/` and in the net/portal modules.

/// The wheel-pulse counter peripheral.  Incremented by hardware (an ISR on
/// the reed-switch line) outside the control loop; the controller only reads
/// and clears it.
pub trait PulseCounter {
    fn count(&self) -> u32;
    fn clear(&mut self);
    /// Raw line level: `true` while the reed switch is closed (a pulse may
    /// be in flight).
    fn line_active(&self) -> bool;
}

/// RFID reader.  `poll` returns a tag UID when a card is present in the
/// field, `None` otherwise.
pub trait TagScanner {
    fn poll(&mut self) -> Option<String>;
}

/// Feedback actuators (status LED + buzzer).  The visual/audio rendering
/// itself is a collaborator concern; these are fire-and-forget cues.
pub trait Signals {
    /// Brief LED blip on every counted wheel pulse.
    fn wheel_blip(&mut self);
    /// Rider identity changed.
    fn rider_cue(&mut self);
    /// Persistent connectivity failure.
    fn error_cue(&mut self);
    /// Power down display/actuator rails ahead of deep sleep.
    fn shutdown(&mut self);
}

/// Reset and suspend.  On the device both calls diverge; the host doubles
/// record them so tests can observe the decision without dying.
pub trait SystemControl {
    fn restart(&mut self);
    /// Arm the wake trigger on the sensor line going active, then suspend.
    fn deep_sleep_until_pulse(&mut self);
}

/// The wireless radio.  `connect` is a bounded association attempt (short
/// polling inside, never longer than `timeout_ms`); mode switches tear down
/// whatever the radio was doing before.
pub trait WifiLink {
    fn connect(&mut self, ssid: &str, pass: &str, timeout_ms: u32) -> anyhow::Result<bool>;
    fn is_connected(&self) -> bool;
    fn enter_client_mode(&mut self) -> anyhow::Result<()>;
    fn enter_ap_mode(&mut self, ssid: &str) -> anyhow::Result<()>;
}

/// The web configuration portal (external collaborator; started in
/// configuration mode, stopped on exit).
pub trait ConfigPortal {
    fn start(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory doubles (host tests)
// ---------------------------------------------------------------------------
