use core::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::{ConversionError, InitError, TransmitError};

/// Hooks into the acquisition loop. Every method defaults to a no-op.
pub trait AcquisitionObserver: core::fmt::Debug + Send + Sync {
    fn on_boot(&self) {}
    fn on_halt(&self, _error: &InitError) {}
    fn on_sample(&self, _value: u32, _bytes: usize) {}
    fn on_wait_failed(&self, _error: &ConversionError) {}
    fn on_transmit_failed(&self, _error: &TransmitError) {}
}

#[derive(Debug, Default)]
pub struct AcquisitionMetrics {
    samples: AtomicU32,
    skipped: AtomicU32,
    transmit_errors: AtomicU32,
    bytes_sent: AtomicU32,
    last_sample: AtomicU32,
}

/// Point-in-time copy of [`AcquisitionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub samples: u32,
    pub skipped: u32,
    pub transmit_errors: u32,
    pub bytes_sent: u32,
    pub last_sample: Option<u32>,
}

impl AcquisitionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_samples(&self) -> u32 {
        self.samples.load(Ordering::SeqCst)
    }

    pub fn get_skipped(&self) -> u32 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn get_transmit_errors(&self) -> u32 {
        self.transmit_errors.load(Ordering::SeqCst)
    }

    pub fn get_bytes_sent(&self) -> u32 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.get_samples();
        MetricsSnapshot {
            samples,
            skipped: self.get_skipped(),
            transmit_errors: self.get_transmit_errors(),
            bytes_sent: self.get_bytes_sent(),
            last_sample: (samples > 0).then(|| self.last_sample.load(Ordering::SeqCst)),
        }
    }
}

impl AcquisitionObserver for AcquisitionMetrics {
    fn on_sample(&self, value: u32, bytes: usize) {
        self.samples.fetch_add(1, Ordering::SeqCst);
        self.bytes_sent.fetch_add(bytes as u32, Ordering::SeqCst);
        self.last_sample.store(value, Ordering::SeqCst);
    }

    fn on_wait_failed(&self, _error: &ConversionError) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn on_transmit_failed(&self, _error: &TransmitError) {
        self.transmit_errors.fetch_add(1, Ordering::SeqCst);
    }
}
