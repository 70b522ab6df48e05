//! Bus transaction seam between the factory engine and the controller.
//!
//! Three capabilities are injected into the device context:
//!
//! - [`RegisterBus`]: single-register reads/writes plus raw block transfers
//!   to the fixed controller address.
//! - [`ReadyLine`]: the level-triggered ready/busy line the engine polls.
//! - [`IrqControl`]: suspends and restores normal touch-event delivery.
//!
//! [`I2cBus`] and [`IntPin`] adapt `embedded-hal` 1.0 implementations to
//! these traits.

use embedded_hal::digital::{self, InputPin};
use embedded_hal::i2c::{self, I2c, SevenBitAddress};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::FactoryConfig;
use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("read of register 0x{reg:02X} failed")]
    Read { reg: u8 },
    #[error("write to register 0x{reg:02X} failed")]
    Write { reg: u8 },
    #[error("transfer incomplete: {done} of {expected} messages")]
    Transfer { expected: usize, done: usize },
    #[error("i2c: {0}")]
    I2c(i2c::ErrorKind),
    #[error("ready line: {0}")]
    Line(digital::ErrorKind),
}

pub trait RegisterBus {
    /// Read one byte from `reg`.
    fn read_reg(&mut self, reg: u8) -> Result<u8, BusError>;

    /// Write one byte to `reg`.
    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), BusError>;

    /// Send `bytes` as a single write message.
    fn write_block(&mut self, bytes: &[u8]) -> Result<(), BusError>;

    /// Select `reg` with a one-byte write, then read `buf.len()` bytes in
    /// the same transaction.
    fn write_read(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError>;
}

pub trait ReadyLine {
    /// `Ok(())` once the controller has a reply pending,
    /// `Err(nb::Error::WouldBlock)` while it is still busy.
    fn poll_ready(&mut self) -> nb::Result<(), BusError>;
}

pub trait IrqControl {
    fn disable_irq(&mut self);
    fn enable_irq(&mut self);
}

/// How long [`wait_ready`] keeps polling before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReadyPolicy {
    /// Poll until the line asserts. A wedged controller stalls the caller.
    #[default]
    Unbounded,
    /// Give up with [`DeviceError::ReadyTimeout`] after this many polls.
    MaxPolls(u32),
}

/// Busy-poll the ready line under `policy`.
pub fn wait_ready<R>(line: &mut R, policy: ReadyPolicy) -> Result<(), DeviceError>
where
    R: ReadyLine + ?Sized,
{
    let mut polls: u32 = 0;
    loop {
        match line.poll_ready() {
            Ok(()) => return Ok(()),
            Err(nb::Error::Other(e)) => return Err(DeviceError::Bus(e)),
            Err(nb::Error::WouldBlock) => {
                polls = polls.saturating_add(1);
                if let ReadyPolicy::MaxPolls(limit) = policy {
                    if polls >= limit {
                        return Err(DeviceError::ReadyTimeout { polls });
                    }
                }
                core::hint::spin_loop();
            }
        }
    }
}

/// [`RegisterBus`] over any `embedded-hal` I2C master.
#[derive(Debug)]
pub struct I2cBus<I> {
    i2c: I,
    addr: SevenBitAddress,
}

impl<I> I2cBus<I>
where
    I: I2c<SevenBitAddress>,
{
    pub fn new(i2c: I, addr: SevenBitAddress) -> Self {
        Self { i2c, addr }
    }

    /// Bus at the address named in the board config.
    pub fn from_config(i2c: I, config: &FactoryConfig) -> Self {
        Self::new(i2c, config.i2c_addr)
    }

    pub fn address(&self) -> SevenBitAddress {
        self.addr
    }

    pub fn release(self) -> I {
        self.i2c
    }
}

fn i2c_error<E: i2c::Error>(op: &str, reg: u8, e: &E) -> BusError {
    let kind = e.kind();
    debug!("i2c {} at 0x{:02X} failed: {}", op, reg, kind);
    BusError::I2c(kind)
}

impl<I> RegisterBus for I2cBus<I>
where
    I: I2c<SevenBitAddress>,
{
    fn read_reg(&mut self, reg: u8) -> Result<u8, BusError> {
        let mut value = [0u8; 1];
        self.i2c
            .write_read(self.addr, &[reg], &mut value)
            .map_err(|e| i2c_error("read", reg, &e))?;
        Ok(value[0])
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.i2c
            .write(self.addr, &[reg, value])
            .map_err(|e| i2c_error("write", reg, &e))
    }

    fn write_block(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        let reg = bytes.first().copied().unwrap_or_default();
        self.i2c
            .write(self.addr, bytes)
            .map_err(|e| i2c_error("block write", reg, &e))
    }

    fn write_read(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.i2c
            .write_read(self.addr, &[reg], buf)
            .map_err(|e| i2c_error("write_read", reg, &e))
    }
}

/// Active-low interrupt pin used as the ready line.
#[derive(Debug)]
pub struct IntPin<P> {
    pin: P,
}

impl<P: InputPin> IntPin<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: InputPin> ReadyLine for IntPin<P> {
    fn poll_ready(&mut self) -> nb::Result<(), BusError> {
        match self.pin.is_low() {
            Ok(true) => Ok(()),
            Ok(false) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(BusError::Line(digital::Error::kind(&e)))),
        }
    }
}
