use serde::{Deserialize, Serialize};

use crate::InitError;

/// Highest regular channel on STM32F4 ADC1 (temperature sensor/VBAT).
pub const MAX_CHANNEL: u8 = 18;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Bits6,
    Bits8,
    Bits10,
    #[default]
    Bits12,
}

impl Resolution {
    pub fn bits(self) -> u32 {
        match self {
            Resolution::Bits6 => 6,
            Resolution::Bits8 => 8,
            Resolution::Bits10 => 10,
            Resolution::Bits12 => 12,
        }
    }

    pub fn max_value(self) -> u32 {
        (1 << self.bits()) - 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleTime {
    #[default]
    Cycles3,
    Cycles15,
    Cycles28,
    Cycles56,
    Cycles84,
    Cycles112,
    Cycles144,
    Cycles480,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    #[default]
    Right,
    Left,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEdge {
    /// Software start only.
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

/// ADC1 init block. Defaults match the firmware: 12-bit, channel 0,
/// continuous, single conversion, 3-cycle sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdcSettings {
    pub resolution: Resolution,
    pub channel: u8,
    pub continuous: bool,
    pub scan: bool,
    pub discontinuous: bool,
    pub trigger_edge: TriggerEdge,
    pub alignment: Alignment,
    pub conversions: u8,
    pub sample_time: SampleTime,
}

impl Default for AdcSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::Bits12,
            channel: 0,
            continuous: true,
            scan: false,
            discontinuous: false,
            trigger_edge: TriggerEdge::None,
            alignment: Alignment::Right,
            conversions: 1,
            sample_time: SampleTime::Cycles3,
        }
    }
}

impl AdcSettings {
    pub fn max_value(&self) -> u32 {
        self.resolution.max_value()
    }

    pub fn validate(&self) -> Result<(), InitError> {
        if self.channel > MAX_CHANNEL {
            return Err(InitError::Channel(self.channel));
        }
        if !(1..=16).contains(&self.conversions) {
            return Err(InitError::Adc("sequence length must be 1..=16"));
        }
        if !self.scan && self.conversions > 1 {
            return Err(InitError::Adc("multi-conversion sequence requires scan mode"));
        }
        // RM0090: continuous and discontinuous mode are mutually exclusive.
        if self.continuous && self.discontinuous {
            return Err(InitError::Adc("continuous and discontinuous mode both set"));
        }
        Ok(())
    }
}

bitflags::bitflags! {
    /// `ADC_SR` bits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct AdcStatus: u32 {
        const AWD = 1 << 0;
        const EOC = 1 << 1;
        const JEOC = 1 << 2;
        const JSTRT = 1 << 3;
        const STRT = 1 << 4;
        const OVR = 1 << 5;
    }
}

#[cfg(feature = "std")]
pub use sim::{SimAdc, SimConversion};

#[cfg(feature = "std")]
mod sim {
    use std::fmt;

    use super::{AdcSettings, AdcStatus};
    use crate::peripherals::{Converter, Timeout};
    use crate::{ConversionError, InitError};

    /// Outcome of one scripted conversion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SimConversion {
        Sample(u32),
        /// The sequencer overran before the result was read.
        Fail,
    }

    type Script = Box<dyn Iterator<Item = SimConversion> + Send>;

    /// Scripted ADC: hands out conversions from a lazy source in order.
    ///
    /// Once the source runs dry every poll times out.
    pub struct SimAdc {
        script: Script,
        next: Option<SimConversion>,
        settings: Option<AdcSettings>,
        status: AdcStatus,
        dr: u32,
        polls: u64,
        reject: Option<InitError>,
    }

    impl SimAdc {
        pub fn new<I>(script: I) -> Self
        where
            I: IntoIterator<Item = SimConversion>,
            I::IntoIter: Send + 'static,
        {
            let mut script: Script = Box::new(script.into_iter());
            let next = script.next();
            Self {
                script,
                next,
                settings: None,
                status: AdcStatus::empty(),
                dr: 0,
                polls: 0,
                reject: None,
            }
        }

        pub fn from_samples(samples: &[u32]) -> Self {
            Self::new(samples.to_vec().into_iter().map(SimConversion::Sample))
        }

        /// Makes `configure` fail with `error`.
        pub fn rejecting(mut self, error: InitError) -> Self {
            self.reject = Some(error);
            self
        }

        pub fn polls(&self) -> u64 {
            self.polls
        }

        pub fn status(&self) -> AdcStatus {
            self.status
        }

        pub fn is_started(&self) -> bool {
            self.status.contains(AdcStatus::STRT)
        }

        pub fn is_exhausted(&self) -> bool {
            self.next.is_none()
        }

        pub fn settings(&self) -> Option<&AdcSettings> {
            self.settings.as_ref()
        }

        fn pop(&mut self) -> Option<SimConversion> {
            let current = self.next.take();
            if current.is_some() {
                self.next = self.script.next();
            }
            current
        }
    }

    impl fmt::Debug for SimAdc {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("SimAdc")
                .field("next", &self.next)
                .field("status", &self.status)
                .field("dr", &self.dr)
                .field("polls", &self.polls)
                .finish_non_exhaustive()
        }
    }

    impl Converter for SimAdc {
        fn configure(&mut self, settings: &AdcSettings) -> Result<(), InitError> {
            if let Some(error) = self.reject {
                return Err(error);
            }
            settings.validate()?;
            self.settings = Some(settings.clone());
            self.status = AdcStatus::empty();
            Ok(())
        }

        fn start(&mut self) {
            self.status.insert(AdcStatus::STRT);
        }

        fn poll_for_conversion(&mut self, _timeout: Timeout) -> Result<(), ConversionError> {
            self.polls += 1;
            if !self.is_started() {
                return Err(ConversionError::NotStarted);
            }
            match self.pop() {
                Some(SimConversion::Sample(raw)) => {
                    let max = self.settings.as_ref().map_or(u32::MAX, AdcSettings::max_value);
                    if raw > max {
                        tracing::warn!("Scripted sample {} exceeds full scale {}, masked", raw, max);
                    }
                    self.dr = raw & max;
                    self.status.remove(AdcStatus::OVR);
                    self.status.insert(AdcStatus::EOC);
                    Ok(())
                }
                Some(SimConversion::Fail) => {
                    self.status.insert(AdcStatus::OVR);
                    self.status.remove(AdcStatus::EOC);
                    Err(ConversionError::Overrun)
                }
                None => Err(ConversionError::Timeout),
            }
        }

        fn value(&mut self) -> u32 {
            self.status.remove(AdcStatus::EOC);
            self.dr
        }
    }
}
