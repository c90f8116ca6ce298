// Write pacing: consecutive ledger writes are spaced at least `interval` apart.
// No wait before the first write, none after the last.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time source for pacing; swapped out in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Clock that only advances when slept on. Records every sleep.
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move time forward without recording a sleep (simulates work).
    pub fn advance(&self, d: Duration) {
        *self.elapsed.lock().unwrap_or_else(|p| p.into_inner()) += d;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn sleep(&self, d: Duration) {
        self.sleeps.lock().unwrap_or_else(|p| p.into_inner()).push(d);
        self.advance(d);
    }
}

pub struct WriteScheduler {
    interval: Duration,
    last_write: Option<Instant>,
    clock: Arc<dyn Clock>,
}

impl WriteScheduler {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            last_write: None,
            clock,
        }
    }

    /// Block until the next write may be issued. Returns the time slept.
    pub fn wait_turn(&mut self) -> Duration {
        let Some(last) = self.last_write else {
            return Duration::ZERO;
        };
        let since = self.clock.now().saturating_duration_since(last);
        if since >= self.interval {
            return Duration::ZERO;
        }
        let wait = self.interval - since;
        log::debug!("pacing ledger writes: sleeping {:?}", wait);
        self.clock.sleep(wait);
        wait
    }

    /// Mark that a write was just issued, whatever its outcome.
    pub fn record_write(&mut self) {
        self.last_write = Some(self.clock.now());
    }
}
