use std::sync::Arc;
use std::time::{Duration, Instant};

use adcstream_config::{ScriptedSample, SessionAssertion, StopReason};
use adcstream_core::metrics::{AcquisitionMetrics, MetricsSnapshot};
use adcstream_core::peripherals::adc::{SimAdc, SimConversion};
use adcstream_core::peripherals::systick::SimClock;
use adcstream_core::peripherals::uart::SimUart;
use adcstream_core::{Acquisition, AcquisitionSettings, HeapLayout, Step};
use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{debug, error, info};

/// Where the simulated converter's results come from.
#[derive(Debug, Clone)]
pub enum ConversionSource {
    Scripted(Vec<SimConversion>),
    /// Endless [`synthetic_ramp`] up to `max_value`.
    Ramp { max_value: u32 },
}

/// Knobs for one host run of the acquisition loop.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub settings: AcquisitionSettings,
    pub source: ConversionSource,
    pub max_steps: u64,
    pub wall_time: Option<Duration>,
    pub echo: bool,
    pub realtime: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub stop_reason: StopReason,
    pub steps: u64,
    pub virtual_time_ms: u64,
    pub lines: Vec<String>,
    #[serde(skip)]
    pub serial: String,
    pub metrics: MetricsSnapshot,
    pub fault: Option<String>,
}

pub fn to_conversions(samples: &[ScriptedSample], max_value: u32) -> Result<Vec<SimConversion>> {
    let conversions: Vec<_> = samples
        .iter()
        .map(|sample| match sample {
            ScriptedSample::Value(v) => SimConversion::Sample(*v),
            ScriptedSample::Event(_) => SimConversion::Fail,
        })
        .collect();
    check_sample_range(&conversions, max_value)?;
    Ok(conversions)
}

/// Rejects scripted samples the converter could never produce.
pub fn check_sample_range(conversions: &[SimConversion], max_value: u32) -> Result<()> {
    let out_of_range = conversions.iter().find_map(|conversion| match conversion {
        SimConversion::Sample(raw) if *raw > max_value => Some(*raw),
        _ => None,
    });
    if let Some(raw) = out_of_range {
        bail!("Sample {} exceeds the converter's full scale of {}", raw, max_value);
    }
    Ok(())
}

/// Endless triangle sweep over the converter's full range.
pub fn synthetic_ramp(max_value: u32) -> impl Iterator<Item = SimConversion> + Send + 'static {
    let period = 32u64;
    (0u64..).map(move |i| {
        let phase = i % (2 * period);
        let level = if phase < period { phase } else { 2 * period - phase };
        SimConversion::Sample((u64::from(max_value) * level / period) as u32)
    })
}

pub fn run_session(config: SessionConfig) -> SessionOutcome {
    let adc = match config.source {
        ConversionSource::Scripted(conversions) => SimAdc::new(conversions),
        ConversionSource::Ramp { max_value } => SimAdc::new(synthetic_ramp(max_value)),
    };
    let uart = SimUart::new().with_echo(config.echo);
    let clock = if config.realtime {
        SimClock::realtime()
    } else {
        SimClock::new()
    };
    let metrics = Arc::new(AcquisitionMetrics::new());
    let mut acq = Acquisition::new(adc, uart, clock, config.settings).with_observer(metrics.clone());

    if let Err(e) = acq.boot() {
        error!("Device halted during initialization: {}", e);
        return SessionOutcome {
            stop_reason: StopReason::Halt,
            steps: 0,
            virtual_time_ms: 0,
            lines: Vec::new(),
            serial: String::new(),
            metrics: metrics.snapshot(),
            fault: Some(e.to_string()),
        };
    }

    let start = Instant::now();
    let mut steps = 0u64;
    let stop_reason = loop {
        if steps >= config.max_steps {
            break StopReason::MaxSteps;
        }
        if acq.adc.is_exhausted() {
            break StopReason::SourceExhausted;
        }
        if let Some(limit) = config.wall_time {
            if start.elapsed() >= limit {
                break StopReason::WallTime;
            }
        }
        if let Step::Skipped = acq.step() {
            debug!("Step {} produced no output", steps);
        }
        steps += 1;
    };

    info!("Session stopped after {} steps: {:?}", steps, stop_reason);

    SessionOutcome {
        stop_reason,
        steps,
        virtual_time_ms: acq.delay.elapsed_ms(),
        lines: acq.serial.lines(),
        serial: acq.serial.output_string(),
        metrics: metrics.snapshot(),
        fault: None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssertionResult {
    pub assertion: String,
    pub passed: bool,
}

pub fn check_assertions(
    assertions: &[SessionAssertion],
    outcome: &SessionOutcome,
) -> Vec<AssertionResult> {
    assertions
        .iter()
        .map(|assertion| match assertion {
            SessionAssertion::SerialContains(a) => AssertionResult {
                assertion: format!("serial_contains: {:?}", a.serial_contains),
                passed: outcome.serial.contains(&a.serial_contains),
            },
            SessionAssertion::ExpectedLines(a) => AssertionResult {
                assertion: format!("expected_lines: {} lines", a.expected_lines.len()),
                passed: outcome.lines == a.expected_lines,
            },
            SessionAssertion::ExpectedStopReason(a) => AssertionResult {
                assertion: format!("expected_stop_reason: {:?}", a.expected_stop_reason),
                passed: outcome.stop_reason == a.expected_stop_reason,
            },
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutSummary {
    pub heap_start: String,
    pub limit: String,
    pub stack_top: String,
    pub capacity: usize,
}

impl From<&HeapLayout> for LayoutSummary {
    fn from(layout: &HeapLayout) -> Self {
        Self {
            heap_start: format!("{:#x}", layout.heap_start),
            limit: format!("{:#x}", layout.limit().unwrap_or(0)),
            stack_top: format!("{:#x}", layout.stack_top),
            capacity: layout.capacity(),
        }
    }
}
