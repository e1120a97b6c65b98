use std::time::Duration;

use embedded_hal::delay::DelayNs;

/// Simulated SysTick delay source.
///
/// Keeps a virtual clock; in real-time mode each delay also sleeps the
/// calling thread.
#[derive(Debug, Default)]
pub struct SimClock {
    elapsed_ns: u64,
    delays: u64,
    realtime: bool,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn realtime() -> Self {
        Self {
            realtime: true,
            ..Self::default()
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns / 1_000_000
    }

    /// Number of millisecond delays requested so far.
    pub fn delays(&self) -> u64 {
        self.delays
    }

    fn advance(&mut self, ns: u64) {
        self.elapsed_ns += ns;
        if self.realtime {
            std::thread::sleep(Duration::from_nanos(ns));
        }
    }
}

impl DelayNs for SimClock {
    fn delay_ns(&mut self, ns: u32) {
        self.advance(u64::from(ns));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delays += 1;
        self.advance(u64::from(ms) * 1_000_000);
    }
}
