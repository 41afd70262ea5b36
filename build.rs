fn main() {
    // ESP-IDF link arguments only apply to the device target; host builds
    // (cargo test) skip them.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
