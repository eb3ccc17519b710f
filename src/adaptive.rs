//! The adaptive self-tuning layer: observes a rolling temperature history
//! and a derived performance score, and mutates PID gains online under
//! rapid/normal/steady regimes, reversing direction on regression.

use circular_queue::CircularQueue;

use crate::pid::PidState;

const HISTORY_CAPACITY: usize = 60;
const MIN_SAMPLES_FOR_OSCILLATION: usize = 10;
const DIRECTION_UP_THRESHOLD: f64 = 0.05;
const DIRECTION_DOWN_THRESHOLD: f64 = -0.05;
const REVERSAL_DAMPING: f64 = 0.8;
const OSCILLATION_GAIN_THRESHOLD: f64 = 3.0;
const ERROR_GAIN_THRESHOLD: f64 = 5.0;

/// Parameters driving a tuning pass; resolved once from [`crate::config::DaemonConfig`].
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    pub tuning_interval: u32,
    pub target_performance: f64,
    pub rapid_max: u32,
    pub rapid_multiplier: f64,
    pub steady_threshold: f64,
    pub steady_cycles_required: u32,
}

/// Which regime the tuner is currently operating in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Rapid,
    Normal,
    Steady,
}

/// The adaptive tuner's full mutable state.
pub struct AdaptiveState {
    history: CircularQueue<u8>,
    pub performance_score: f64,
    previous_performance_score: f64,
    pub learning_cycles: u64,
    cycles_since_tuning: u32,
    pub phase: Phase,
    rapid_cycles_done: u32,
    consecutive_stable_cycles: u32,
    /// Signed step sizes: sign encodes the current search direction.
    pub dkp: f64,
    pub dki: f64,
    pub dkd: f64,
}

impl AdaptiveState {
    pub fn new() -> Self {
        Self {
            history: CircularQueue::with_capacity(HISTORY_CAPACITY),
            performance_score: 0.0,
            previous_performance_score: 0.0,
            learning_cycles: 0,
            cycles_since_tuning: 0,
            phase: Phase::Rapid,
            rapid_cycles_done: 0,
            consecutive_stable_cycles: 0,
            dkp: 0.10,
            dki: 0.01,
            dkd: 0.02,
        }
    }

    /// Clears history, scores, counters, and phase back to their initial
    /// state. Called atomically with [`PidState::reset`] on any mode
    /// transition, setpoint change, or explicit reset.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Records a temperature sample. Callers must only invoke this while
    /// Auto mode is active (per the data model invariant).
    pub fn observe_temperature(&mut self, temp: u8) {
        self.history.push(temp);
    }

    /// Advances the tuning-interval counter by one cycle.
    pub fn tick(&mut self) {
        self.cycles_since_tuning += 1;
    }

    /// Whether enough cycles have elapsed since the last tuning pass.
    pub fn due(&self, cfg: &AdaptiveConfig) -> bool {
        self.cycles_since_tuning >= cfg.tuning_interval
    }

    fn oscillation(&self) -> f64 {
        if self.history.len() < MIN_SAMPLES_FOR_OSCILLATION {
            return 0.0;
        }
        let values: Vec<f64> = self.history.iter().map(|&t| t as f64).collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        variance.sqrt()
    }

    /// Runs one tuning pass: computes the performance score, selects a
    /// phase, applies directional reversal if the score regressed, and
    /// mutates `pid`'s gains (always re-clamped to their documented
    /// ranges). Never called while learning is inhibited; callers are
    /// responsible for that gate.
    pub fn tune(&mut self, pid: &mut PidState, cfg: &AdaptiveConfig, max_temp: u8, target: u8, duty: u8, error: f64) {
        let oscillation = self.oscillation();
        let error_score = (1.0 - (max_temp as f64 - target as f64).abs() / 50.0).clamp(0.0, 1.0);
        let oscillation_component = 1.0 - (oscillation / 10.0).clamp(0.0, 1.0);
        let fan_efficiency = if error.abs() < ERROR_GAIN_THRESHOLD {
            1.0 - duty as f64 / 100.0
        } else {
            0.0
        };
        let score = 0.6 * error_score + 0.3 * oscillation_component + 0.1 * fan_efficiency;

        let phase = if self.rapid_cycles_done < cfg.rapid_max {
            Phase::Rapid
        } else if self.consecutive_stable_cycles >= cfg.steady_cycles_required {
            Phase::Steady
        } else {
            Phase::Normal
        };
        let multiplier = match phase {
            Phase::Rapid => cfg.rapid_multiplier,
            Phase::Steady => 0.3,
            Phase::Normal => 1.0,
        };

        let delta_score = score - self.previous_performance_score;
        if delta_score < DIRECTION_DOWN_THRESHOLD {
            self.dkp = -self.dkp * REVERSAL_DAMPING;
            self.dki = -self.dki * REVERSAL_DAMPING;
            self.dkd = -self.dkd * REVERSAL_DAMPING;
        }
        // delta_score > DIRECTION_UP_THRESHOLD, or in between: keep signs.

        if score < cfg.target_performance {
            pid.kp += multiplier * self.dkp;
        }
        if oscillation > OSCILLATION_GAIN_THRESHOLD {
            pid.ki -= multiplier * self.dki;
            pid.kd += multiplier * self.dkd;
        } else if error.abs() > ERROR_GAIN_THRESHOLD {
            pid.ki += multiplier * self.dki;
        }
        pid.clamp_gains();

        if delta_score.abs() < cfg.steady_threshold {
            self.consecutive_stable_cycles += 1;
        } else {
            self.consecutive_stable_cycles = 0;
        }
        if phase == Phase::Rapid {
            self.rapid_cycles_done += 1;
        }

        self.phase = phase;
        self.previous_performance_score = score;
        self.performance_score = score;
        self.learning_cycles += 1;
        self.cycles_since_tuning = 0;

        tracing::trace!(
            phase = ?phase,
            multiplier,
            score,
            dkp = self.dkp,
            dki = self.dki,
            dkd = self.dkd,
            kp = pid.kp,
            ki = pid.ki,
            kd = pid.kd,
            "adaptive tuning pass"
        );
    }
}

impl Default for AdaptiveState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AdaptiveConfig {
        AdaptiveConfig {
            tuning_interval: 30,
            target_performance: 0.8,
            rapid_max: 10,
            rapid_multiplier: 3.0,
            steady_threshold: 0.05,
            steady_cycles_required: 5,
        }
    }

    #[test]
    fn due_respects_tuning_interval() {
        let mut adaptive = AdaptiveState::new();
        let cfg = cfg();
        for _ in 0..29 {
            adaptive.tick();
        }
        assert!(!adaptive.due(&cfg));
        adaptive.tick();
        assert!(adaptive.due(&cfg));
    }

    #[test]
    fn gains_remain_in_range_after_many_passes() {
        let mut pid = PidState::new(2.0, 0.1, 0.5, 0.0, 100.0, true);
        let mut adaptive = AdaptiveState::new();
        let cfg = cfg();
        for i in 0..200u8 {
            adaptive.observe_temperature(60 + (i % 7));
            adaptive.tune(&mut pid, &cfg, 60 + (i % 7), 65, 50, -5.0 + i as f64 % 3.0);
            assert!(pid.kp >= 0.5 && pid.kp <= 5.0);
            assert!(pid.ki >= 0.01 && pid.ki <= 0.5);
            assert!(pid.kd >= 0.1 && pid.kd <= 2.0);
        }
    }

    #[test]
    fn oscillation_requires_minimum_sample_count() {
        let mut adaptive = AdaptiveState::new();
        for _ in 0..5 {
            adaptive.observe_temperature(70);
        }
        assert_eq!(adaptive.oscillation(), 0.0);
    }

    #[test]
    fn reset_clears_history_and_counters() {
        let mut adaptive = AdaptiveState::new();
        for _ in 0..20 {
            adaptive.observe_temperature(70);
        }
        adaptive.tick();
        adaptive.reset();
        assert_eq!(adaptive.history.len(), 0);
        assert_eq!(adaptive.learning_cycles, 0);
    }

    #[test]
    fn oscillating_temperatures_increase_oscillation_score() {
        let mut adaptive = AdaptiveState::new();
        for i in 0..60u32 {
            let t = if i % 2 == 0 { 60 } else { 70 };
            adaptive.observe_temperature(t);
        }
        assert!(adaptive.oscillation() > OSCILLATION_GAIN_THRESHOLD);
    }
}
