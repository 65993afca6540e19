use std::time::{Duration, Instant};

/// Single-shot timer restarted by every `start`, so bursts of calls fire
/// once. The owner drives it with [`DebounceTimer::poll`].
///
/// Polled rather than backed by `tokio::time::sleep_until`: the preview
/// manager owns its timers and is driven from one task, and a caller-supplied
/// `Instant` lets tests fire a timer without sleeping.
#[derive(Debug, Clone)]
pub struct DebounceTimer {
    interval: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub fn start(&mut self) {
        self.deadline = Some(Instant::now() + self.interval);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once when the deadline has passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_interval() {
        let mut timer = DebounceTimer::new(Duration::from_millis(200));
        assert!(!timer.poll(Instant::now() + Duration::from_secs(1)));

        timer.start();
        assert!(timer.is_active());
        assert!(!timer.poll(Instant::now()));
        assert!(timer.poll(Instant::now() + Duration::from_secs(1)));
        assert!(!timer.is_active());
        assert!(!timer.poll(Instant::now() + Duration::from_secs(2)));
    }

    #[test]
    fn restart_pushes_deadline() {
        let mut timer = DebounceTimer::new(Duration::from_millis(200));
        timer.start();
        let first = timer.deadline().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        timer.start();
        assert!(timer.deadline().unwrap() > first);
        assert!(!timer.poll(first));

        timer.stop();
        assert!(!timer.poll(Instant::now() + Duration::from_secs(1)));
    }
}
