use adcstream_core::peripherals::{AdcSettings, SerialSettings};
use adcstream_core::{AcquisitionSettings, HeapLayout};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// An address or byte count, written either as a YAML integer or as a
/// string (`"0x2000_0000"`, `"1024"`, `"1 KiB"`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Quantity {
    Number(u64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("invalid size '{0}': {1}")]
    InvalidSize(String, String),
    #[error("value {0:#x} does not fit the target address space")]
    OutOfRange(u64),
}

impl Quantity {
    /// Plain address: decimal or `0x` hex, underscores allowed.
    pub fn address(&self) -> Result<u64, QuantityError> {
        match self {
            Quantity::Number(n) => Ok(*n),
            Quantity::Text(s) => parse_number(s),
        }
    }

    /// Like [`Quantity::address`], but also accepts human sizes like `"1 KiB"`.
    pub fn size(&self) -> Result<u64, QuantityError> {
        match self {
            Quantity::Number(n) => Ok(*n),
            Quantity::Text(s) => parse_number(s).or_else(|_| parse_size(s)),
        }
    }
}

fn parse_number(text: &str) -> Result<u64, QuantityError> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|_| QuantityError::InvalidNumber(text.to_string()))
}

pub fn parse_size(size_str: &str) -> Result<u64, QuantityError> {
    use human_size::{Byte, Size, SpecificSize};
    let trimmed = size_str.trim();
    // "1KiB" and "1 KiB" are both accepted.
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (value, unit) = trimmed.split_at(split);
    let normalized = format!("{} {}", value.trim(), unit.trim());

    let s: Size = normalized
        .parse()
        .map_err(|e| QuantityError::InvalidSize(size_str.to_string(), format!("{}", e)))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

fn to_usize(value: u64) -> Result<usize, QuantityError> {
    usize::try_from(value).map_err(|_| QuantityError::OutOfRange(value))
}

/// RAM bounds normally taken from the linker script.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    pub heap_start: Quantity,
    pub stack_top: Quantity,
    pub min_stack_size: Quantity,
}

impl LayoutConfig {
    pub fn resolve(&self) -> Result<HeapLayout> {
        let layout = HeapLayout::new(
            to_usize(self.heap_start.address().context("layout.heap_start")?)?,
            to_usize(self.stack_top.address().context("layout.stack_top")?)?,
            to_usize(self.min_stack_size.size().context("layout.min_stack_size")?)?,
        );
        layout.validate().context("Invalid heap layout")?;
        Ok(layout)
    }
}

fn default_throttle_ms() -> u32 {
    adcstream_core::acquisition::THROTTLE_MS
}

/// Board description: peripheral init blocks plus the RAM layout.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BoardDescriptor {
    pub name: String,
    #[serde(default)]
    pub layout: Option<LayoutConfig>,
    #[serde(default)]
    pub adc: AdcSettings,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u32,
}

impl BoardDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open board descriptor at {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("Failed to parse Board Descriptor")
    }

    pub fn settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            adc: self.adc.clone(),
            serial: self.serial.clone(),
            throttle_ms: self.throttle_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SampleEvent {
    /// The conversion wait fails for this iteration.
    Fail,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(untagged)]
pub enum ScriptedSample {
    Value(u32),
    Event(SampleEvent),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SessionInputs {
    pub board: String,
    #[serde(default)]
    pub elf: Option<String>,
    #[serde(default)]
    pub samples: Vec<ScriptedSample>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SessionLimits {
    pub max_steps: u64,
    #[serde(default)]
    pub wall_time_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxSteps,
    SourceExhausted,
    WallTime,
    Halt,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SerialContainsAssertion {
    pub serial_contains: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ExpectedLinesAssertion {
    pub expected_lines: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StopReasonAssertion {
    pub expected_stop_reason: StopReason,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum SessionAssertion {
    SerialContains(SerialContainsAssertion),
    ExpectedLines(ExpectedLinesAssertion),
    ExpectedStopReason(StopReasonAssertion),
}

/// A scripted host run: which board, which conversions, when to stop and
/// what the serial stream must show.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SessionScript {
    pub schema_version: String,
    pub inputs: SessionInputs,
    pub limits: SessionLimits,
    #[serde(default)]
    pub assertions: Vec<SessionAssertion>,
}

impl SessionScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open session script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_reader(f).context("Failed to parse Session Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if self.inputs.board.trim().is_empty() {
            anyhow::bail!("Input 'board' path cannot be empty");
        }

        if self.limits.max_steps == 0 {
            anyhow::bail!("Limit 'max_steps' must be greater than zero");
        }

        Ok(())
    }
}
