//! The controller state machine: the single place that ties sampling,
//! activity detection, adaptive tuning, PID, and fan writes together into
//! one ordered per-tick sequence.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::activity::{ActivityConfig, ActivityDetector};
use crate::adaptive::{AdaptiveConfig, AdaptiveState};
use crate::config::DaemonConfig;
use crate::ec::EcTransport;
use crate::logging::RateLimiter;
use crate::pid::PidState;
use crate::sensors;

/// One tick's instantaneous readings. Created fresh every tick; never
/// mutated after construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sample {
    pub cpu_temp: u8,
    pub gpu_temp: u8,
    pub fan_duty: u8,
    pub fan_rpm: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Auto,
    Manual,
}

/// A consistent, lock-protected view of the daemon's current state, read
/// by the IPC server and written only by the control thread.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sample: Sample,
    pub auto_mode: bool,
    pub target_temperature: u8,
}

/// A mutation requested by an IPC client. Applied at the next tick
/// boundary, never mid-tick.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    SetFan(u8),
    SetAuto,
    SetTargetTemp(u8),
}

struct ControlState {
    mode: Mode,
    target_temperature: u8,
    manual_duty: u8,
    last_written_duty: Option<u8>,
}

/// Owns every piece of per-tick control state and the sole EC transport
/// handle. Exactly one thread ever calls [`Controller::tick`].
pub struct Controller {
    ec: Box<dyn EcTransport + Send>,
    control: ControlState,
    pid: PidState,
    adaptive: AdaptiveState,
    adaptive_cfg: AdaptiveConfig,
    activity: ActivityDetector,
    activity_cfg: ActivityConfig,
    pid_enabled: bool,
    adaptive_enabled: bool,
    commands: Receiver<Command>,
    snapshot: Arc<Mutex<Snapshot>>,
    rate_limiter: RateLimiter,
}

impl Controller {
    pub fn new(
        ec: Box<dyn EcTransport + Send>,
        cfg: &DaemonConfig,
        commands: Receiver<Command>,
        snapshot: Arc<Mutex<Snapshot>>,
        now: Instant,
    ) -> Self {
        let pid = PidState::new(
            cfg.pid_kp,
            cfg.pid_ki,
            cfg.pid_kd,
            cfg.pid_output_min,
            cfg.pid_output_max,
            cfg.pid_enabled,
        );
        let adaptive_cfg = AdaptiveConfig {
            tuning_interval: cfg.adaptive_tuning_interval,
            target_performance: cfg.adaptive_target_performance,
            rapid_max: cfg.adaptive_rapid_cycles,
            rapid_multiplier: cfg.adaptive_rapid_multiplier,
            steady_threshold: cfg.adaptive_steady_threshold,
            steady_cycles_required: cfg.adaptive_steady_cycles,
        };
        let activity_cfg = ActivityConfig {
            temp_delta_threshold: cfg.activity_temp_threshold,
            fan_delta_threshold: cfg.activity_fan_threshold,
            stable_period: Duration::from_secs(cfg.activity_stable_period),
            max_idle_cycles: cfg.activity_max_idle_cycles,
        };

        {
            let mut guard = snapshot.lock().expect("snapshot mutex poisoned");
            guard.auto_mode = true;
            guard.target_temperature = cfg.target_temp;
        }

        Self {
            ec,
            control: ControlState {
                mode: Mode::Auto,
                target_temperature: cfg.target_temp,
                manual_duty: cfg.target_temp.clamp(1, 100),
                last_written_duty: None,
            },
            pid,
            adaptive: AdaptiveState::new(),
            adaptive_cfg,
            activity: ActivityDetector::new(now),
            activity_cfg,
            pid_enabled: cfg.pid_enabled,
            adaptive_enabled: cfg.adaptive_enabled,
            commands,
            snapshot,
            rate_limiter: RateLimiter::new(),
        }
    }

    /// Runs exactly one control-loop iteration: drain pending IPC
    /// mutations, sample, feed the activity detector, run auto or manual
    /// logic, then publish the resulting snapshot. Never panics on a
    /// recoverable EC failure; logs and leaves state unchanged instead.
    pub fn tick(&mut self, now: Instant) {
        self.apply_pending_commands();

        let sample = match self.read_sample() {
            Ok(s) => s,
            Err(e) => {
                self.rate_limiter.warn_once_per_minute(&e);
                return;
            }
        };

        self.activity
            .observe(&self.activity_cfg, sample.cpu_temp, sample.fan_duty, now);

        match self.control.mode {
            Mode::Auto => self.run_auto(&sample),
            Mode::Manual => self.run_manual(),
        }

        self.publish_snapshot(&sample);
    }

    fn read_sample(&mut self) -> Result<Sample, crate::error::DaemonError> {
        let cpu_temp = sensors::read_cpu_temp(self.ec.as_mut())?;
        let gpu_temp = sensors::read_gpu_temp(self.ec.as_mut())?;
        let fan_duty = sensors::read_fan_duty(self.ec.as_mut())?;
        let fan_rpm = sensors::read_fan_rpm(self.ec.as_mut())?;
        Ok(Sample { cpu_temp, gpu_temp, fan_duty, fan_rpm })
    }

    fn run_auto(&mut self, sample: &Sample) {
        let max_temp = sample.cpu_temp.max(sample.gpu_temp);
        let error = max_temp as f64 - self.control.target_temperature as f64;

        if self.pid_enabled {
            self.adaptive.observe_temperature(max_temp);
            self.adaptive.tick();
            if self.adaptive_enabled
                && self.adaptive.due(&self.adaptive_cfg)
                && !self.activity.learning_inhibited()
            {
                self.adaptive.tune(
                    &mut self.pid,
                    &self.adaptive_cfg,
                    max_temp,
                    self.control.target_temperature,
                    sample.fan_duty,
                    error,
                );
            }
        }

        let new_duty = self.pid.update(error);
        self.apply_duty(new_duty);
    }

    fn run_manual(&mut self) {
        let duty = self.control.manual_duty;
        self.apply_duty(duty);
    }

    /// Writes `new_duty` through the EC only if it differs from the last
    /// value actually written (write coalescing). A duty of 0 is recorded
    /// for coalescing purposes but never sent to the EC: the write
    /// protocol only accepts `[1, 100]`.
    fn apply_duty(&mut self, new_duty: u8) {
        if self.control.last_written_duty == Some(new_duty) {
            return;
        }
        if new_duty == 0 {
            self.control.last_written_duty = Some(0);
            return;
        }
        match sensors::write_fan_duty(self.ec.as_mut(), new_duty) {
            Ok(()) => self.control.last_written_duty = Some(new_duty),
            Err(e) => self.rate_limiter.warn_once_per_minute(&e),
        }
    }

    fn apply_pending_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::SetFan(n) => {
                    if self.control.mode != Mode::Manual {
                        self.control.mode = Mode::Manual;
                        self.reset_control_loop();
                    }
                    self.control.manual_duty = n;
                }
                Command::SetAuto => {
                    if self.control.mode != Mode::Auto {
                        self.control.mode = Mode::Auto;
                        self.reset_control_loop();
                    }
                    self.control.manual_duty = 0;
                }
                Command::SetTargetTemp(n) => {
                    if self.control.target_temperature != n {
                        self.control.target_temperature = n;
                        self.reset_control_loop();
                    }
                }
            }
        }
    }

    fn reset_control_loop(&mut self) {
        self.pid.reset();
        self.adaptive.reset();
        self.control.last_written_duty = None;
    }

    fn publish_snapshot(&self, sample: &Sample) {
        let mut guard = self.snapshot.lock().expect("snapshot mutex poisoned");
        guard.sample = *sample;
        guard.auto_mode = matches!(self.control.mode, Mode::Auto);
        guard.target_temperature = self.control.target_temperature;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::fake::FakeEcTransport;
    use crate::ec::{REG_CPU_TEMP, REG_FAN_DUTY, REG_GPU_TEMP};
    use std::sync::mpsc;

    fn controller_with(
        cfg: DaemonConfig,
        ec: FakeEcTransport,
    ) -> (Controller, mpsc::Sender<Command>, Arc<Mutex<Snapshot>>) {
        let (tx, rx) = mpsc::channel();
        let snapshot = Arc::new(Mutex::new(Snapshot {
            sample: Sample::default(),
            auto_mode: true,
            target_temperature: cfg.target_temp,
        }));
        let controller = Controller::new(Box::new(ec), &cfg, rx, snapshot.clone(), Instant::now());
        (controller, tx, snapshot)
    }

    #[test]
    fn steady_readings_converge_and_keep_publishing_snapshots() {
        let ec = FakeEcTransport::new()
            .with_register(REG_CPU_TEMP, 65)
            .with_register(REG_GPU_TEMP, 60)
            .with_register(REG_FAN_DUTY, 0);
        let mut cfg = DaemonConfig::default();
        cfg.adaptive_enabled = false;
        let (mut controller, _tx, snapshot) = controller_with(cfg, ec);

        // Error is zero every tick (cpu == target), so the PID output
        // should stabilize at the same duty and write coalescing should
        // make every tick after the first a no-op against the EC.
        for _ in 0..5 {
            controller.tick(Instant::now());
        }

        let guard = snapshot.lock().unwrap();
        assert_eq!(guard.sample.cpu_temp, 65);
        assert!(guard.auto_mode);
    }

    #[test]
    fn set_fan_switches_to_manual_and_resets_pid() {
        let ec = FakeEcTransport::new()
            .with_register(REG_CPU_TEMP, 70)
            .with_register(REG_GPU_TEMP, 65);
        let (mut controller, tx, snapshot) = controller_with(DaemonConfig::default(), ec);

        controller.tick(Instant::now());
        tx.send(Command::SetFan(80)).unwrap();
        controller.tick(Instant::now());

        let guard = snapshot.lock().unwrap();
        assert!(!guard.auto_mode);
    }

    #[test]
    fn set_auto_is_idempotent() {
        let ec = FakeEcTransport::new()
            .with_register(REG_CPU_TEMP, 70)
            .with_register(REG_GPU_TEMP, 65);
        let (mut controller, tx, snapshot) = controller_with(DaemonConfig::default(), ec);

        tx.send(Command::SetFan(80)).unwrap();
        controller.tick(Instant::now());
        tx.send(Command::SetAuto).unwrap();
        controller.tick(Instant::now());
        tx.send(Command::SetAuto).unwrap();
        controller.tick(Instant::now());

        let guard = snapshot.lock().unwrap();
        assert!(guard.auto_mode);
    }

    #[test]
    fn ec_failure_does_not_panic_and_skips_tick() {
        let mut ec = FakeEcTransport::new()
            .with_register(REG_CPU_TEMP, 70)
            .with_register(REG_GPU_TEMP, 65);
        ec.queue_timeout(REG_CPU_TEMP);
        let (mut controller, _tx, snapshot) = controller_with(DaemonConfig::default(), ec);

        controller.tick(Instant::now());
        // Snapshot retains its constructed defaults: the failed tick never
        // published a new sample.
        let guard = snapshot.lock().unwrap();
        assert_eq!(guard.sample.cpu_temp, 0);
    }

    #[test]
    fn target_temp_change_resets_pid_integral() {
        let ec = FakeEcTransport::new()
            .with_register(REG_CPU_TEMP, 90)
            .with_register(REG_GPU_TEMP, 80);
        let (mut controller, tx, _snapshot) = controller_with(DaemonConfig::default(), ec);

        for _ in 0..5 {
            controller.tick(Instant::now());
        }
        assert_ne!(controller.pid.integral, 0.0);

        tx.send(Command::SetTargetTemp(70)).unwrap();
        controller.tick(Instant::now());
        assert_eq!(controller.pid.previous_error, 90.0 - 70.0);
    }
}
