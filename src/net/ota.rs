// WheelTach — Firmware Installation
//
// Streaming sink for a downloaded firmware image.  The device
// implementation writes into the inactive OTA slot and marks it bootable;
// the caller restarts afterwards.

pub trait FirmwareInstaller {
    /// Pull the image from `read` (returns 0 at end of stream) and commit
    /// it.  `expected_len` comes from Content-Length when the server sent
    /// one; a short stream is an error.
    fn install(
        &mut self,
        expected_len: Option<u64>,
        read: &mut dyn FnMut(&mut [u8]) -> anyhow::Result<usize>,
    ) -> anyhow::Result<()>;
}

#[cfg(target_os = "espidf")]
pub use esp::OtaInstaller;

#[cfg(target_os = "espidf")]
mod esp {
    use anyhow::bail;
    use esp_idf_svc::ota::EspOta;

    use super::FirmwareInstaller;

    pub struct OtaInstaller;

    impl FirmwareInstaller for OtaInstaller {
        fn install(
            &mut self,
            expected_len: Option<u64>,
            read: &mut dyn FnMut(&mut [u8]) -> anyhow::Result<usize>,
        ) -> anyhow::Result<()> {
            let mut ota = EspOta::new()?;
            let mut update = ota.initiate_update()?;

            let mut buf = [0u8; 4096];
            let mut total: u64 = 0;
            loop {
                let n = match read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        update.abort()?;
                        return Err(e);
                    }
                };
                if let Err(e) = update.write(&buf[..n]) {
                    update.abort()?;
                    bail!("ota write: {e:?}");
                }
                total += n as u64;
            }

            if let Some(expected) = expected_len {
                if total != expected {
                    update.abort()?;
                    bail!("firmware image truncated: {total} of {expected} bytes");
                }
            }

            update.complete()?;
            log::info!("firmware image written ({} bytes), next boot uses it", total);
            Ok(())
        }
    }
}
