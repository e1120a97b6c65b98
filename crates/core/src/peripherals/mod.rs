pub mod adc;
#[cfg(feature = "std")]
pub mod systick;
pub mod uart;

pub use adc::{AdcSettings, AdcStatus};
pub use uart::{SerialSettings, UsartStatus};

use crate::{ConversionError, InitError, TransmitError};

/// How long a blocking HAL call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait without bound.
    Forever,
    Millis(u32),
}

/// One analog-to-digital conversion channel.
pub trait Converter {
    fn configure(&mut self, settings: &AdcSettings) -> Result<(), InitError>;
    /// Starts continuous conversion.
    fn start(&mut self);
    /// Blocks until an end-of-conversion is flagged.
    fn poll_for_conversion(&mut self, timeout: Timeout) -> Result<(), ConversionError>;
    /// Reads the data register, clearing end-of-conversion.
    fn value(&mut self) -> u32;
}

/// Transmit side of one serial transceiver.
pub trait SerialPort {
    fn configure(&mut self, settings: &SerialSettings) -> Result<(), InitError>;
    /// Sends every byte, blocking until the last one has left the shifter.
    fn transmit(&mut self, bytes: &[u8], timeout: Timeout) -> Result<(), TransmitError>;
}
