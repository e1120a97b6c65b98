use serde::{Deserialize, Serialize};

use crate::InitError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordLength {
    #[default]
    Bits8,
    Bits9,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    #[default]
    One,
    Half,
    OneAndHalf,
    Two,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    #[default]
    None,
    Rts,
    Cts,
    RtsCts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Tx,
    Rx,
    #[default]
    TxRx,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Oversampling {
    #[default]
    By16,
    By8,
}

/// USART2 init block: 9600 baud, 8N1, no flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSettings {
    pub baud: u32,
    pub word_length: WordLength,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    pub mode: Mode,
    pub oversampling: Oversampling,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud: 9600,
            word_length: WordLength::Bits8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            mode: Mode::TxRx,
            oversampling: Oversampling::By16,
        }
    }
}

impl SerialSettings {
    pub fn validate(&self) -> Result<(), InitError> {
        if self.baud == 0 {
            return Err(InitError::Serial("baud rate must be non-zero"));
        }
        Ok(())
    }

    pub fn transmits(&self) -> bool {
        matches!(self.mode, Mode::Tx | Mode::TxRx)
    }
}

bitflags::bitflags! {
    /// `USART_SR` bits used by the transmitter.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct UsartStatus: u32 {
        const TC = 1 << 6;
        const TXE = 1 << 7;
    }
}

#[cfg(feature = "std")]
pub use sim::SimUart;

#[cfg(feature = "std")]
mod sim {
    use std::io::{self, Write};

    use super::{SerialSettings, UsartStatus};
    use crate::peripherals::{SerialPort, Timeout};
    use crate::{InitError, TransmitError};

    /// Simulated USART transmitter.
    /// Captures every transmitted byte and optionally mirrors it to stdout.
    #[derive(Debug, Default)]
    pub struct SimUart {
        settings: Option<SerialSettings>,
        status: UsartStatus,
        captured: Vec<u8>,
        echo: bool,
        reject: Option<InitError>,
    }

    impl SimUart {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_echo(mut self, echo: bool) -> Self {
            self.echo = echo;
            self
        }

        /// Makes `configure` fail with `error`.
        pub fn rejecting(mut self, error: InitError) -> Self {
            self.reject = Some(error);
            self
        }

        pub fn status(&self) -> UsartStatus {
            self.status
        }

        pub fn settings(&self) -> Option<&SerialSettings> {
            self.settings.as_ref()
        }

        pub fn output(&self) -> &[u8] {
            &self.captured
        }

        pub fn output_string(&self) -> String {
            String::from_utf8_lossy(&self.captured).into_owned()
        }

        /// Completed lines, CRLF stripped.
        pub fn lines(&self) -> Vec<String> {
            self.output_string()
                .split_inclusive("\r\n")
                .filter_map(|line| line.strip_suffix("\r\n"))
                .map(str::to_string)
                .collect()
        }
    }

    impl SerialPort for SimUart {
        fn configure(&mut self, settings: &SerialSettings) -> Result<(), InitError> {
            if let Some(error) = self.reject {
                return Err(error);
            }
            settings.validate()?;
            self.settings = Some(settings.clone());
            self.status = UsartStatus::TXE | UsartStatus::TC;
            Ok(())
        }

        fn transmit(&mut self, bytes: &[u8], _timeout: Timeout) -> Result<(), TransmitError> {
            let settings = self.settings.as_ref().ok_or(TransmitError::NotConfigured)?;
            if !settings.transmits() {
                return Err(TransmitError::TxDisabled);
            }

            self.status.remove(UsartStatus::TC);
            self.captured.extend_from_slice(bytes);
            if self.echo {
                let mut stdout = io::stdout().lock();
                // A closed stdout must not stall the transmitter.
                let _ = stdout.write_all(bytes).and_then(|()| stdout.flush());
            }
            self.status.insert(UsartStatus::TC);
            Ok(())
        }
    }
}
