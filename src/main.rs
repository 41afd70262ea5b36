// WheelTach — binary shim; the firmware proper lives in the library so the
// controller logic stays host-testable.

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    wheeltach::boot::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("wheeltach is ESP32-C3 firmware; build for the espidf target to run it");
}
