use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time source of the matching loop: chunk timing, backoff and "today".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration);

    fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        (self.now() - start).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clock that only moves when told to. Sleeping advances it.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    slept: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            slept: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let (Ok(mut now), Ok(step)) = (self.now.lock(), chrono::Duration::from_std(duration)) {
            *now += step;
        }
    }

    /// Total time spent in [`Clock::sleep`].
    pub fn slept(&self) -> Duration {
        self.slept.lock().map(|d| *d).unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            *slept += duration;
        }
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn manual_clock_moves_on_sleep() {
        let start = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(10));
        clock.sleep(Duration::from_secs(5));
        assert_eq!(clock.elapsed_since(start), Duration::from_secs(15));
        assert_eq!(clock.slept(), Duration::from_secs(5));
    }
}
