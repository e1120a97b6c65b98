#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod acquisition;
pub mod allocator;
pub mod heap;
pub mod line;
pub mod metrics;
pub mod peripherals;

mod tests;

pub use acquisition::{Acquisition, AcquisitionSettings, State, Step};
pub use heap::{HeapLayout, OutOfMemory, SbrkHeap};

/// Fatal startup failure. The firmware halts on any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("ADC rejected configuration: {0}")]
    Adc(&'static str),
    #[error("ADC channel {0} cannot be configured")]
    Channel(u8),
    #[error("serial port rejected configuration: {0}")]
    Serial(&'static str),
}

/// Failure while waiting for an end-of-conversion. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("conversion wait timed out")]
    Timeout,
    #[error("conversion overrun")]
    Overrun,
    #[error("converter not started")]
    NotStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransmitError {
    #[error("transmit timed out")]
    Timeout,
    #[error("serial port not configured")]
    NotConfigured,
    #[error("transmitter disabled by serial mode")]
    TxDisabled,
    #[error("serial line error during transmit")]
    Line,
}
