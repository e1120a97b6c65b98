//! The ADC-to-serial polling loop.
//!
//! `Initializing` runs once; `Sampling` runs forever. A configuration
//! failure moves the loop to `Halted`, which it never leaves.

use alloc::sync::Arc;
use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::line::SampleLine;
use crate::metrics::AcquisitionObserver;
use crate::peripherals::{AdcSettings, Converter, SerialPort, SerialSettings, Timeout};
use crate::InitError;

/// Pause after every read sample.
pub const THROTTLE_MS: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionSettings {
    pub adc: AdcSettings,
    pub serial: SerialSettings,
    pub throttle_ms: u32,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            adc: AdcSettings::default(),
            serial: SerialSettings::default(),
            throttle_ms: THROTTLE_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initializing,
    Sampling,
    Halted,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A conversion was read and handed to the transmitter.
    Sampled(u32),
    /// The conversion wait failed; nothing was sent.
    Skipped,
    /// The loop is not sampling.
    Halted,
}

pub struct Acquisition<A, S, D> {
    pub adc: A,
    pub serial: S,
    pub delay: D,
    pub observers: Vec<Arc<dyn AcquisitionObserver>>,
    settings: AcquisitionSettings,
    state: State,
    fault: Option<InitError>,
}

impl<A, S, D> Acquisition<A, S, D>
where
    A: Converter,
    S: SerialPort,
    D: DelayNs,
{
    pub fn new(adc: A, serial: S, delay: D, settings: AcquisitionSettings) -> Self {
        Self {
            adc,
            serial,
            delay,
            observers: Vec::new(),
            settings,
            state: State::Initializing,
            fault: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AcquisitionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// The error that halted the loop, if any.
    pub fn fault(&self) -> Option<InitError> {
        self.fault
    }

    /// Configures the converter, then the serial port, then starts
    /// continuous conversion.
    ///
    /// On failure the loop halts and the converter is never started. Calling
    /// again after a failure returns the same error.
    pub fn boot(&mut self) -> Result<(), InitError> {
        match self.state {
            State::Sampling => return Ok(()),
            State::Halted => return Err(self.fault.unwrap_or(InitError::Adc("halted"))),
            State::Initializing => {}
        }

        if let Err(err) = self.configure() {
            error!("Initialization failed: {}", err);
            self.state = State::Halted;
            self.fault = Some(err);
            for observer in &self.observers {
                observer.on_halt(&err);
            }
            return Err(err);
        }

        self.adc.start();
        self.state = State::Sampling;
        info!(
            "Sampling ADC channel {} at {} baud",
            self.settings.adc.channel, self.settings.serial.baud
        );
        for observer in &self.observers {
            observer.on_boot();
        }
        Ok(())
    }

    fn configure(&mut self) -> Result<(), InitError> {
        self.adc.configure(&self.settings.adc)?;
        self.serial.configure(&self.settings.serial)?;
        Ok(())
    }

    /// Runs one sampling iteration.
    ///
    /// A failed conversion wait yields [`Step::Skipped`] without output or
    /// delay. A failed transmit is logged and the delay still applies.
    pub fn step(&mut self) -> Step {
        if self.state != State::Sampling {
            return Step::Halted;
        }

        if let Err(err) = self.adc.poll_for_conversion(Timeout::Forever) {
            debug!("Conversion wait failed: {}", err);
            for observer in &self.observers {
                observer.on_wait_failed(&err);
            }
            return Step::Skipped;
        }

        let value = self.adc.value();
        let line = SampleLine::format(value);
        match self.serial.transmit(line.as_bytes(), Timeout::Forever) {
            Ok(()) => {
                debug!("Sample {} sent", value);
                for observer in &self.observers {
                    observer.on_sample(value, line.len());
                }
            }
            Err(err) => {
                warn!("Transmit of sample {} failed: {}", value, err);
                for observer in &self.observers {
                    observer.on_transmit_failed(&err);
                }
            }
        }

        self.delay.delay_ms(self.settings.throttle_ms);
        Step::Sampled(value)
    }

    /// Boots and samples forever. Never returns; a boot failure ends in
    /// [`error_handler`].
    pub fn run(mut self) -> ! {
        if self.boot().is_err() {
            error_handler();
        }
        loop {
            self.step();
        }
    }

    pub fn into_parts(self) -> (A, S, D) {
        (self.adc, self.serial, self.delay)
    }
}

/// Terminal halt. A human has to reset the device.
pub fn error_handler() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
