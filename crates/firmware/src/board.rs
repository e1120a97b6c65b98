//! NUCLEO-F401RE wiring: ADC1 channel 0 on PA0, USART2 TX on PA2.

use adcstream_core::peripherals::adc::{Alignment, Resolution, SampleTime, TriggerEdge};
use adcstream_core::peripherals::uart::{FlowControl, Oversampling, Parity, StopBits, WordLength};
use adcstream_core::peripherals::{
    AdcSettings, AdcStatus, Converter, SerialPort, SerialSettings, Timeout,
};
use adcstream_core::{ConversionError, InitError, TransmitError};
use stm32f4xx_hal::adc::config::{self as hal_adc, AdcConfig, Sequence};
use stm32f4xx_hal::adc::Adc;
use embedded_hal_nb::serial::Write as _;
use stm32f4xx_hal::gpio::{Analog, PA0, PA2};
use stm32f4xx_hal::pac;
use stm32f4xx_hal::prelude::*;
use stm32f4xx_hal::rcc::Clocks;
use stm32f4xx_hal::serial::{config as hal_serial, Tx};

/// Core cycles burnt between two status register polls.
const POLL_CYCLES: u32 = 64;

/// Cycle budget for one blocking wait.
struct Deadline {
    remaining: Option<u64>,
}

impl Deadline {
    fn new(timeout: Timeout, sysclk_hz: u32) -> Self {
        let remaining = match timeout {
            Timeout::Forever => None,
            Timeout::Millis(ms) => Some(u64::from(ms) * u64::from(sysclk_hz / 1000)),
        };
        Self { remaining }
    }

    /// Spends one poll interval. Returns `false` once the budget is gone.
    fn tick(&mut self) -> bool {
        match self.remaining.as_mut() {
            None => true,
            Some(left) if *left >= u64::from(POLL_CYCLES) => {
                *left -= u64::from(POLL_CYCLES);
                cortex_m::asm::delay(POLL_CYCLES);
                true
            }
            Some(_) => false,
        }
    }
}

pub struct BoardAdc {
    adc: Adc<pac::ADC1>,
    pin: PA0<Analog>,
    sysclk_hz: u32,
    started: bool,
}

impl BoardAdc {
    pub fn new(adc: Adc<pac::ADC1>, pin: PA0<Analog>, clocks: &Clocks) -> Self {
        Self {
            adc,
            pin,
            sysclk_hz: clocks.sysclk().raw(),
            started: false,
        }
    }

    fn status() -> AdcStatus {
        // SAFETY: read-only access to a register the HAL driver does not cache.
        let bits = unsafe { (*pac::ADC1::ptr()).sr().read().bits() };
        AdcStatus::from_bits_truncate(bits)
    }

    fn clear_overrun() {
        // SR bits are rc_w0: writing ones leaves them untouched.
        unsafe {
            (*pac::ADC1::ptr())
                .sr()
                .write(|w| w.bits(!AdcStatus::OVR.bits()));
        }
    }
}

impl Converter for BoardAdc {
    fn configure(&mut self, settings: &AdcSettings) -> Result<(), InitError> {
        settings.validate()?;
        if settings.channel != 0 {
            return Err(InitError::Channel(settings.channel));
        }
        if settings.scan || settings.discontinuous || settings.conversions != 1 {
            return Err(InitError::Adc("only a single regular conversion is wired"));
        }
        if settings.trigger_edge != TriggerEdge::None {
            return Err(InitError::Adc("external triggers are not wired"));
        }

        let resolution = match settings.resolution {
            Resolution::Bits12 => hal_adc::Resolution::Twelve,
            Resolution::Bits10 => hal_adc::Resolution::Ten,
            Resolution::Bits8 => hal_adc::Resolution::Eight,
            Resolution::Bits6 => hal_adc::Resolution::Six,
        };
        let align = match settings.alignment {
            Alignment::Right => hal_adc::Align::Right,
            Alignment::Left => hal_adc::Align::Left,
        };
        let continuous = if settings.continuous {
            hal_adc::Continuous::Continuous
        } else {
            hal_adc::Continuous::Single
        };
        let sample_time = match settings.sample_time {
            SampleTime::Cycles3 => hal_adc::SampleTime::Cycles_3,
            SampleTime::Cycles15 => hal_adc::SampleTime::Cycles_15,
            SampleTime::Cycles28 => hal_adc::SampleTime::Cycles_28,
            SampleTime::Cycles56 => hal_adc::SampleTime::Cycles_56,
            SampleTime::Cycles84 => hal_adc::SampleTime::Cycles_84,
            SampleTime::Cycles112 => hal_adc::SampleTime::Cycles_112,
            SampleTime::Cycles144 => hal_adc::SampleTime::Cycles_144,
            SampleTime::Cycles480 => hal_adc::SampleTime::Cycles_480,
        };

        // EOC selection stays at its reset value (end of sequence), which keeps
        // overrun detection off while DR sits unread during the throttle.
        let config = AdcConfig::default()
            .resolution(resolution)
            .align(align)
            .continuous(continuous)
            .scan(hal_adc::Scan::Disabled);
        self.adc.apply_config(config);
        self.adc
            .configure_channel(&self.pin, Sequence::One, sample_time);
        Ok(())
    }

    fn start(&mut self) {
        self.adc.enable();
        self.adc.start_conversion();
        self.started = true;
    }

    fn poll_for_conversion(&mut self, timeout: Timeout) -> Result<(), ConversionError> {
        if !self.started {
            return Err(ConversionError::NotStarted);
        }
        let mut deadline = Deadline::new(timeout, self.sysclk_hz);
        loop {
            let status = Self::status();
            if status.contains(AdcStatus::OVR) {
                Self::clear_overrun();
                // An overrun stops the sequence; kick it again.
                self.adc.start_conversion();
                return Err(ConversionError::Overrun);
            }
            if status.contains(AdcStatus::EOC) {
                return Ok(());
            }
            if !deadline.tick() {
                return Err(ConversionError::Timeout);
            }
        }
    }

    fn value(&mut self) -> u32 {
        u32::from(self.adc.current_sample())
    }
}

enum Port {
    Unconfigured(pac::USART2, PA2),
    Ready(Tx<pac::USART2>),
    Faulted,
}

pub struct BoardSerial {
    port: Port,
    clocks: Clocks,
    tx_enabled: bool,
}

impl BoardSerial {
    pub fn new(usart: pac::USART2, tx: PA2, clocks: &Clocks) -> Self {
        Self {
            port: Port::Unconfigured(usart, tx),
            clocks: *clocks,
            tx_enabled: false,
        }
    }

    fn hal_config(settings: &SerialSettings) -> Result<hal_serial::Config, InitError> {
        settings.validate()?;
        if settings.oversampling != Oversampling::By16 {
            return Err(InitError::Serial("8x oversampling is not supported"));
        }
        if settings.flow_control != FlowControl::None {
            return Err(InitError::Serial("hardware flow control is not wired"));
        }

        let config = hal_serial::Config::default().baudrate(settings.baud.bps());
        let config = match settings.word_length {
            WordLength::Bits8 => config.wordlength_8(),
            WordLength::Bits9 => config.wordlength_9(),
        };
        let config = match settings.parity {
            Parity::None => config.parity_none(),
            Parity::Even => config.parity_even(),
            Parity::Odd => config.parity_odd(),
        };
        let stop_bits = match settings.stop_bits {
            StopBits::One => hal_serial::StopBits::STOP1,
            StopBits::Half => hal_serial::StopBits::STOP0P5,
            StopBits::OneAndHalf => hal_serial::StopBits::STOP1P5,
            StopBits::Two => hal_serial::StopBits::STOP2,
        };
        Ok(config.stopbits(stop_bits))
    }
}

/// Retries a non-blocking serial call until it completes or the budget runs out.
fn drive<E>(
    deadline: &mut Deadline,
    mut op: impl FnMut() -> nb::Result<(), E>,
) -> Result<(), TransmitError> {
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(nb::Error::WouldBlock) => {
                if !deadline.tick() {
                    return Err(TransmitError::Timeout);
                }
            }
            Err(nb::Error::Other(_)) => return Err(TransmitError::Line),
        }
    }
}

impl SerialPort for BoardSerial {
    fn configure(&mut self, settings: &SerialSettings) -> Result<(), InitError> {
        let config = Self::hal_config(settings)?;
        let (usart, pin) = match core::mem::replace(&mut self.port, Port::Faulted) {
            Port::Unconfigured(usart, pin) => (usart, pin),
            other => {
                self.port = other;
                return Err(InitError::Serial("USART2 is already configured"));
            }
        };
        let tx = usart
            .tx(pin, config, &self.clocks)
            .map_err(|_| InitError::Serial("USART2 rejected the configuration"))?;
        self.port = Port::Ready(tx);
        self.tx_enabled = settings.transmits();
        Ok(())
    }

    fn transmit(&mut self, bytes: &[u8], timeout: Timeout) -> Result<(), TransmitError> {
        let Port::Ready(tx) = &mut self.port else {
            return Err(TransmitError::NotConfigured);
        };
        if !self.tx_enabled {
            return Err(TransmitError::TxDisabled);
        }

        let mut deadline = Deadline::new(timeout, self.clocks.sysclk().raw());
        for &byte in bytes {
            drive(&mut deadline, || tx.write(byte))?;
        }
        drive(&mut deadline, || tx.flush())
    }
}
