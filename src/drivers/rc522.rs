// WheelTach — MFRC522 RFID Reader
//
// Custom register-level driver over SPI.  Only what the tachometer needs:
// detect a card in the field and read its 4-byte UID.  Avoids external
// crate version conflicts with esp-idf-hal.

use std::thread;
use std::time::Duration;

use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver};

use crate::hw::TagScanner;

// MFRC522 register addresses
const REG_COMMAND: u8 = 0x01;
const REG_COM_IRQ: u8 = 0x04;
const REG_ERROR: u8 = 0x06;
const REG_FIFO_DATA: u8 = 0x09;
const REG_FIFO_LEVEL: u8 = 0x0A;
const REG_BIT_FRAMING: u8 = 0x0D;
const REG_MODE: u8 = 0x11;
const REG_TX_CONTROL: u8 = 0x14;
const REG_TX_ASK: u8 = 0x15;
const REG_T_MODE: u8 = 0x2A;
const REG_T_PRESCALER: u8 = 0x2B;
const REG_T_RELOAD_H: u8 = 0x2C;
const REG_T_RELOAD_L: u8 = 0x2D;
const REG_VERSION: u8 = 0x37;

// MFRC522 commands
const CMD_IDLE: u8 = 0x00;
const CMD_TRANSCEIVE: u8 = 0x0C;
const CMD_SOFT_RESET: u8 = 0x0F;

// PICC commands
const PICC_REQA: u8 = 0x26;
const PICC_ANTICOLL: u8 = 0x93;

pub struct Rc522<'d> {
    spi: SpiDeviceDriver<'d, SpiDriver<'d>>,
}

impl<'d> Rc522<'d> {
    pub fn new(spi: SpiDeviceDriver<'d, SpiDriver<'d>>) -> Self {
        Self { spi }
    }

    fn read_reg(&mut self, reg: u8) -> anyhow::Result<u8> {
        let tx = [((reg << 1) & 0x7E) | 0x80, 0x00];
        let mut rx = [0u8; 2];
        self.spi.transfer(&mut rx, &tx)?;
        Ok(rx[1])
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> anyhow::Result<()> {
        self.spi.write(&[(reg << 1) & 0x7E, value])?;
        Ok(())
    }

    /// Verify the chip answers with a plausible version byte.
    pub fn is_connected(&mut self) -> bool {
        match self.read_reg(REG_VERSION) {
            Ok(v) => v != 0x00 && v != 0xFF,
            Err(_) => false,
        }
    }

    /// Soft reset, timer setup (~25 ms timeout), 100% ASK, antenna on.
    pub fn init(&mut self) -> anyhow::Result<()> {
        self.write_reg(REG_COMMAND, CMD_SOFT_RESET)?;
        thread::sleep(Duration::from_millis(50));

        self.write_reg(REG_T_MODE, 0x8D)?;
        self.write_reg(REG_T_PRESCALER, 0x3E)?;
        self.write_reg(REG_T_RELOAD_H, 0x00)?;
        self.write_reg(REG_T_RELOAD_L, 0x1E)?;
        self.write_reg(REG_TX_ASK, 0x40)?;
        self.write_reg(REG_MODE, 0x3D)?;

        // Antenna on (TX1/TX2 drivers)
        let tx_control = self.read_reg(REG_TX_CONTROL)?;
        if tx_control & 0x03 != 0x03 {
            self.write_reg(REG_TX_CONTROL, tx_control | 0x03)?;
        }

        let version = self.read_reg(REG_VERSION)?;
        log::info!("MFRC522 initialised (version 0x{:02X})", version);
        Ok(())
    }

    /// Run one transceive cycle.  Returns the FIFO contents, or `None` when
    /// the timer expired without a card answering.
    fn transceive(&mut self, data: &[u8], tx_last_bits: u8) -> anyhow::Result<Option<Vec<u8>>> {
        self.write_reg(REG_COM_IRQ, 0x7F)?; // clear interrupt flags
        self.write_reg(REG_FIFO_LEVEL, 0x80)?; // flush FIFO
        self.write_reg(REG_COMMAND, CMD_IDLE)?;

        for &byte in data {
            self.write_reg(REG_FIFO_DATA, byte)?;
        }
        self.write_reg(REG_BIT_FRAMING, tx_last_bits & 0x07)?;
        self.write_reg(REG_COMMAND, CMD_TRANSCEIVE)?;
        self.write_reg(REG_BIT_FRAMING, (tx_last_bits & 0x07) | 0x80)?; // StartSend

        let mut completed = false;
        for _ in 0..25 {
            let irq = self.read_reg(REG_COM_IRQ)?;
            if irq & 0x01 != 0 {
                return Ok(None); // timer ran out, no card
            }
            if irq & 0x30 != 0 {
                completed = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        if !completed {
            return Ok(None);
        }

        if self.read_reg(REG_ERROR)? & 0x1B != 0 {
            return Ok(None); // protocol/parity/collision error
        }

        let n = self.read_reg(REG_FIFO_LEVEL)? as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read_reg(REG_FIFO_DATA)?);
        }
        Ok(Some(out))
    }

    /// REQA + anticollision: returns the UID of a card in the field.
    fn read_uid(&mut self) -> anyhow::Result<Option<String>> {
        // 7-bit frame for REQA
        if self.transceive(&[PICC_REQA], 7)?.is_none() {
            return Ok(None);
        }

        let Some(reply) = self.transceive(&[PICC_ANTICOLL, 0x20], 0)? else {
            return Ok(None);
        };
        if reply.len() != 5 {
            return Ok(None);
        }
        // Last byte is the BCC checksum over the four UID bytes.
        let bcc = reply[0] ^ reply[1] ^ reply[2] ^ reply[3];
        if bcc != reply[4] {
            log::warn!("tag UID checksum mismatch");
            return Ok(None);
        }

        let uid = reply[..4]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<String>();
        Ok(Some(uid))
    }
}

impl TagScanner for Rc522<'_> {
    fn poll(&mut self) -> Option<String> {
        match self.read_uid() {
            Ok(uid) => uid,
            Err(e) => {
                log::warn!("RC522 read error: {}", e);
                None
            }
        }
    }
}
