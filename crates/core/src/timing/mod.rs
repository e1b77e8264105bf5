use std::{
    rc::Rc,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

/// Source of monotonic microsecond timestamps.
///
/// The detector reads it once per sample. Health is reported for diagnostics
/// only and never influences detection or tempo tracking.
pub trait TimingProvider {
    fn now_us(&self) -> u64;

    fn is_healthy(&self) -> bool {
        true
    }
}

impl<T: TimingProvider + ?Sized> TimingProvider for &T {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}

impl<T: TimingProvider + ?Sized> TimingProvider for Rc<T> {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}

impl<T: TimingProvider + ?Sized> TimingProvider for Arc<T> {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}

/// Clock that only moves when told to. Drives deterministic playback of
/// recorded or synthetic samples and doubles as the test mock.
#[derive(Debug)]
pub struct ManualClock {
    now_us: AtomicU64,
    healthy: AtomicBool,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(start_us),
            healthy: AtomicBool::new(true),
        }
    }

    /// Moves the clock to `time_us`. Earlier values are ignored so the clock
    /// stays monotonic.
    pub fn set(&self, time_us: u64) {
        self.now_us.fetch_max(time_us, Ordering::Relaxed);
    }

    /// Advances the clock and returns the new time.
    pub fn advance(&self, delta_us: u64) -> u64 {
        self.now_us.fetch_add(delta_us, Ordering::Relaxed) + delta_us
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

impl TimingProvider for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Relaxed)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

/// Wall clock measured from the moment it was created.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::start()
    }
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimingProvider for MonotonicClock {
    fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_never_moves_backwards() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.advance(500), 1_500);
        clock.set(200);
        assert_eq!(clock.now_us(), 1_500);
        clock.set(9_000);
        assert_eq!(clock.now_us(), 9_000);
    }

    #[test]
    fn shared_handles_observe_the_same_time() {
        let clock = Rc::new(ManualClock::default());
        let reader = Rc::clone(&clock);
        clock.advance(125);
        assert_eq!(reader.now_us(), 125);
        assert_eq!((&*clock).now_us(), 125);
    }

    #[test]
    fn health_is_reported_independently() {
        let clock = Arc::new(ManualClock::default());
        assert!(clock.is_healthy());
        clock.set_healthy(false);
        assert!(!clock.is_healthy());
    }

    #[test]
    fn monotonic_clock_advances() {
        let clock = MonotonicClock::start();
        let first = clock.now_us();
        let second = clock.now_us();
        assert!(second >= first);
        assert!(clock.is_healthy());
    }
}
