//! Activity gating for the adaptive tuner: decides, from successive
//! temperature/duty samples, whether learning should be inhibited to avoid
//! drifting PID gains while the machine is thermally idle.

use std::time::{Duration, Instant};

/// Parameters driving activity detection; resolved once from
/// [`crate::config::DaemonConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ActivityConfig {
    pub temp_delta_threshold: u8,
    pub fan_delta_threshold: u8,
    pub stable_period: Duration,
    pub max_idle_cycles: u32,
}

/// Tracks whether recent samples show meaningful thermal/actuator change.
/// Advisory only: clearing `learning_inhibited` never suppresses sampling
/// or history growth, only gain mutation.
pub struct ActivityDetector {
    last_activity: Instant,
    consecutive_idle_cycles: u32,
    learning_inhibited: bool,
    previous: Option<(u8, u8)>,
}

impl ActivityDetector {
    pub fn new(now: Instant) -> Self {
        Self {
            last_activity: now,
            consecutive_idle_cycles: 0,
            learning_inhibited: false,
            previous: None,
        }
    }

    pub fn learning_inhibited(&self) -> bool {
        self.learning_inhibited
    }

    /// Feeds one new (temp, fan_duty) sample at time `now` and updates
    /// activity state. The first sample establishes a baseline and is
    /// never itself classified active or idle.
    pub fn observe(&mut self, cfg: &ActivityConfig, temp: u8, duty: u8, now: Instant) {
        if let Some((prev_temp, prev_duty)) = self.previous {
            let temp_change = (temp as i32 - prev_temp as i32).unsigned_abs();
            let fan_change = (duty as i32 - prev_duty as i32).unsigned_abs();
            let active = temp_change >= cfg.temp_delta_threshold as u32
                || fan_change >= cfg.fan_delta_threshold as u32;

            if active {
                self.last_activity = now;
                self.consecutive_idle_cycles = 0;
            } else {
                self.consecutive_idle_cycles += 1;
            }
        }
        self.previous = Some((temp, duty));

        self.learning_inhibited = now.saturating_duration_since(self.last_activity) > cfg.stable_period
            || self.consecutive_idle_cycles >= cfg.max_idle_cycles;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ActivityConfig {
        ActivityConfig {
            temp_delta_threshold: 2,
            fan_delta_threshold: 5,
            stable_period: Duration::from_secs(300),
            max_idle_cycles: 5,
        }
    }

    #[test]
    fn first_sample_never_inhibits() {
        let t0 = Instant::now();
        let mut detector = ActivityDetector::new(t0);
        detector.observe(&cfg(), 60, 20, t0);
        assert!(!detector.learning_inhibited());
    }

    #[test]
    fn idle_cycles_trip_inhibition_before_stable_period_elapses() {
        let t0 = Instant::now();
        let mut detector = ActivityDetector::new(t0);
        let cfg = cfg();
        detector.observe(&cfg, 60, 20, t0);
        for i in 1..=5u32 {
            let now = t0 + Duration::from_secs(i as u64);
            detector.observe(&cfg, 60, 20, now);
            if i < 5 {
                assert!(!detector.learning_inhibited(), "tick {i} should not yet inhibit");
            }
        }
        assert!(detector.learning_inhibited());
    }

    #[test]
    fn stable_period_alone_trips_inhibition() {
        let t0 = Instant::now();
        let mut detector = ActivityDetector::new(t0);
        let cfg = cfg();
        detector.observe(&cfg, 60, 20, t0);
        // A single idle tick a long time later: consecutive_idle_cycles is
        // only 1, but the clock-based criterion alone must still trip.
        let later = t0 + Duration::from_secs(301);
        detector.observe(&cfg, 60, 20, later);
        assert!(detector.learning_inhibited());
    }

    #[test]
    fn temperature_jump_clears_inhibition_next_tick() {
        let t0 = Instant::now();
        let mut detector = ActivityDetector::new(t0);
        let cfg = cfg();
        detector.observe(&cfg, 60, 20, t0);
        for i in 1..=6u32 {
            detector.observe(&cfg, 60, 20, t0 + Duration::from_secs(i as u64));
        }
        assert!(detector.learning_inhibited());

        let jump_time = t0 + Duration::from_secs(7);
        detector.observe(&cfg, 85, 20, jump_time);
        assert!(!detector.learning_inhibited());
    }

    #[test]
    fn fan_delta_alone_counts_as_activity() {
        let t0 = Instant::now();
        let mut detector = ActivityDetector::new(t0);
        let cfg = cfg();
        detector.observe(&cfg, 60, 20, t0);
        let t1 = t0 + Duration::from_secs(1);
        detector.observe(&cfg, 60, 30, t1);
        assert!(!detector.learning_inhibited());
    }
}
