//! Discrete-time PID controller with anti-windup, plus the fixed
//! proportional-step fallback used when PID is disabled.

pub const KP_RANGE: (f64, f64) = (0.5, 5.0);
pub const KI_RANGE: (f64, f64) = (0.01, 0.5);
pub const KD_RANGE: (f64, f64) = (0.1, 2.0);
const INTEGRAL_RANGE: (f64, f64) = (-100.0, 100.0);

/// The PID controller's full mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct PidState {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub integral: f64,
    pub previous_error: f64,
    pub out_min: f64,
    pub out_max: f64,
    pub enabled: bool,
    fallback_duty: u8,
}

impl PidState {
    pub fn new(kp: f64, ki: f64, kd: f64, out_min: f64, out_max: f64, enabled: bool) -> Self {
        let mut s = Self {
            kp,
            ki,
            kd,
            integral: 0.0,
            previous_error: 0.0,
            out_min,
            out_max,
            enabled,
            fallback_duty: 10,
        };
        s.clamp_gains();
        s
    }

    /// Zeroes the integral accumulator and previous-error memory. Called
    /// whenever the controller resets: mode change, setpoint change, or an
    /// explicit reset request.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
    }

    /// Clamps `kp`/`ki`/`kd` back into their documented ranges. The
    /// adaptive tuner calls this after every gain mutation; it is also
    /// idempotent on values that are already in range.
    pub fn clamp_gains(&mut self) {
        self.kp = self.kp.clamp(KP_RANGE.0, KP_RANGE.1);
        self.ki = self.ki.clamp(KI_RANGE.0, KI_RANGE.1);
        self.kd = self.kd.clamp(KD_RANGE.0, KD_RANGE.1);
    }

    /// Runs one discrete PID step (or the fallback step, if disabled) and
    /// returns the resulting fan duty in `[0, 100]`.
    pub fn update(&mut self, error: f64) -> u8 {
        if !self.enabled {
            return self.fallback_step(error);
        }

        self.integral = (self.integral + error).clamp(INTEGRAL_RANGE.0, INTEGRAL_RANGE.1);
        let derivative = error - self.previous_error;
        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        let output = output.clamp(self.out_min, self.out_max);
        self.previous_error = error;

        output.round().clamp(0.0, 100.0) as u8
    }

    fn fallback_step(&mut self, error: f64) -> u8 {
        if error >= 0.0 {
            self.fallback_duty = self.fallback_duty.saturating_add(2).max(10).min(100);
        } else {
            self.fallback_duty = self.fallback_duty.saturating_sub(2).min(100);
        }
        self.fallback_duty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_integral_and_previous_error() {
        let mut pid = PidState::new(2.0, 0.1, 0.5, 0.0, 100.0, true);
        pid.update(10.0);
        pid.reset();
        assert_eq!(pid.integral, 0.0);
        assert_eq!(pid.previous_error, 0.0);
    }

    #[test]
    fn integral_stays_within_anti_windup_clamp() {
        let mut pid = PidState::new(2.0, 0.5, 0.5, 0.0, 100.0, true);
        for _ in 0..1000 {
            pid.update(127.0);
            assert!(pid.integral >= -100.0 && pid.integral <= 100.0);
        }
    }

    #[test]
    fn output_is_clamped_to_bounds() {
        let mut pid = PidState::new(5.0, 0.5, 2.0, 0.0, 100.0, true);
        for _ in 0..50 {
            let duty = pid.update(127.0);
            assert!(duty <= 100);
        }
        for _ in 0..50 {
            let duty = pid.update(-127.0);
            assert!(duty == 0 || duty <= 100);
        }
    }

    #[test]
    fn clamp_gains_enforces_documented_ranges() {
        let mut pid = PidState::new(2.0, 0.1, 0.5, 0.0, 100.0, true);
        pid.kp = 99.0;
        pid.ki = -5.0;
        pid.kd = 0.0;
        pid.clamp_gains();
        assert!((KP_RANGE.0..=KP_RANGE.1).contains(&pid.kp));
        assert!((KI_RANGE.0..=KI_RANGE.1).contains(&pid.ki));
        assert!((KD_RANGE.0..=KD_RANGE.1).contains(&pid.kd));
    }

    #[test]
    fn fallback_increments_and_decrements_with_floors() {
        let mut pid = PidState::new(2.0, 0.1, 0.5, 0.0, 100.0, false);
        assert_eq!(pid.update(1.0), 12); // 10 -> +2
        for _ in 0..100 {
            pid.update(1.0);
        }
        assert_eq!(pid.update(1.0), 100); // clamps at 100
        for _ in 0..100 {
            pid.update(-1.0);
        }
        assert_eq!(pid.update(-1.0), 0); // floors at 0
    }
}
