//! Layered configuration: compiled-in defaults, an optional TOML file,
//! `ECFAND_*` environment variables, then CLI flags, each step overriding
//! the last. Every field is range-validated once, immediately after the
//! layers are merged; an out-of-range value is a fatal startup error, never
//! silently clamped (clamping is reserved for values PID/adaptive compute
//! at runtime, not for operator-supplied configuration).

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::DaemonError;

/// Command-line flags. Anything not given here falls through to the TOML
/// file, then environment variables, then the compiled-in default.
#[derive(Parser, Debug, Default)]
#[command(name = "ecfand", version, about = "Closed-loop laptop fan control daemon")]
pub struct CliArgs {
    /// Path to a TOML config file.
    #[arg(long, default_value = "/etc/ecfand/config.toml")]
    pub config: PathBuf,

    /// Stay attached to the controlling terminal instead of daemonizing.
    #[arg(short, long)]
    pub foreground: bool,

    /// Enable per-tick tracing of controller and tuner decisions.
    #[arg(long)]
    pub debug: bool,

    /// Override the tick interval, in seconds.
    #[arg(long)]
    pub interval: Option<f64>,

    /// Override the target temperature, in degrees Celsius.
    #[arg(long)]
    pub target_temp: Option<u8>,
}

/// Everything that can appear in the TOML config file. All fields are
/// optional so a file may specify only what it wants to override.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileConfig {
    pub interval: Option<f64>,
    pub target_temp: Option<u8>,
    pub pid_enabled: Option<bool>,
    pub pid_kp: Option<f64>,
    pub pid_ki: Option<f64>,
    pub pid_kd: Option<f64>,
    pub pid_output_min: Option<f64>,
    pub pid_output_max: Option<f64>,
    pub adaptive_enabled: Option<bool>,
    pub adaptive_tuning_interval: Option<u32>,
    pub adaptive_target_performance: Option<f64>,
    pub adaptive_rapid_cycles: Option<u32>,
    pub adaptive_rapid_multiplier: Option<f64>,
    pub adaptive_steady_threshold: Option<f64>,
    pub adaptive_steady_cycles: Option<u32>,
    pub activity_temp_threshold: Option<u8>,
    pub activity_fan_threshold: Option<u8>,
    pub activity_stable_period: Option<u64>,
    pub activity_max_idle_cycles: Option<u32>,
    pub debug: Option<bool>,
    pub socket_path: Option<PathBuf>,
    pub lock_path: Option<PathBuf>,
}

/// Fully-resolved, validated configuration the rest of the daemon consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub interval: f64,
    pub target_temp: u8,
    pub pid_enabled: bool,
    pub pid_kp: f64,
    pub pid_ki: f64,
    pub pid_kd: f64,
    pub pid_output_min: f64,
    pub pid_output_max: f64,
    pub adaptive_enabled: bool,
    pub adaptive_tuning_interval: u32,
    pub adaptive_target_performance: f64,
    pub adaptive_rapid_cycles: u32,
    pub adaptive_rapid_multiplier: f64,
    pub adaptive_steady_threshold: f64,
    pub adaptive_steady_cycles: u32,
    pub activity_temp_threshold: u8,
    pub activity_fan_threshold: u8,
    pub activity_stable_period: u64,
    pub activity_max_idle_cycles: u32,
    pub debug: bool,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub foreground: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: 2.0,
            target_temp: 65,
            pid_enabled: true,
            pid_kp: 2.0,
            pid_ki: 0.1,
            pid_kd: 0.5,
            pid_output_min: 0.0,
            pid_output_max: 100.0,
            adaptive_enabled: true,
            adaptive_tuning_interval: 30,
            adaptive_target_performance: 0.8,
            adaptive_rapid_cycles: 10,
            adaptive_rapid_multiplier: 3.0,
            adaptive_steady_threshold: 0.05,
            adaptive_steady_cycles: 5,
            activity_temp_threshold: 2,
            activity_fan_threshold: 5,
            activity_stable_period: 300,
            activity_max_idle_cycles: 5,
            debug: false,
            socket_path: PathBuf::from("/run/ecfand.sock"),
            lock_path: PathBuf::from("/run/ecfand.lock"),
            foreground: false,
        }
    }
}

macro_rules! env_override {
    ($cfg:expr, $field:ident, $name:literal, $parse:expr) => {
        if let Ok(raw) = std::env::var(concat!("ECFAND_", $name)) {
            match $parse(&raw) {
                Some(v) => $cfg.$field = v,
                None => {
                    return Err(DaemonError::InvalidArgument(format!(
                        "environment variable ECFAND_{} has invalid value {raw:?}",
                        $name
                    )))
                }
            }
        }
    };
}

impl DaemonConfig {
    /// Resolves the full layered configuration: defaults, then the TOML
    /// file at `cli.config` (if it exists), then `ECFAND_*` environment
    /// variables, then whatever CLI flags were actually passed.
    pub fn resolve(cli: &CliArgs) -> Result<Self, DaemonError> {
        let mut cfg = Self::default();

        if cli.config.is_file() {
            let file_cfg = Self::load_file(&cli.config)?;
            cfg.apply_file(file_cfg);
        }

        cfg.apply_env()?;

        if let Some(v) = cli.interval {
            cfg.interval = v;
        }
        if let Some(v) = cli.target_temp {
            cfg.target_temp = v;
        }
        cfg.debug = cfg.debug || cli.debug;
        cfg.foreground = cli.foreground;

        cfg.validate()?;
        Ok(cfg)
    }

    fn load_file(path: &Path) -> Result<FileConfig, DaemonError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::InvalidArgument(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| DaemonError::InvalidArgument(format!("parsing {}: {e}", path.display())))
    }

    fn apply_file(&mut self, f: FileConfig) {
        macro_rules! apply {
            ($field:ident) => {
                if let Some(v) = f.$field {
                    self.$field = v;
                }
            };
        }
        apply!(interval);
        apply!(target_temp);
        apply!(pid_enabled);
        apply!(pid_kp);
        apply!(pid_ki);
        apply!(pid_kd);
        apply!(pid_output_min);
        apply!(pid_output_max);
        apply!(adaptive_enabled);
        apply!(adaptive_tuning_interval);
        apply!(adaptive_target_performance);
        apply!(adaptive_rapid_cycles);
        apply!(adaptive_rapid_multiplier);
        apply!(adaptive_steady_threshold);
        apply!(adaptive_steady_cycles);
        apply!(activity_temp_threshold);
        apply!(activity_fan_threshold);
        apply!(activity_stable_period);
        apply!(activity_max_idle_cycles);
        apply!(debug);
        apply!(socket_path);
        apply!(lock_path);
    }

    fn apply_env(&mut self) -> Result<(), DaemonError> {
        env_override!(self, interval, "INTERVAL", |s: &str| s.parse::<f64>().ok());
        env_override!(self, target_temp, "TARGET_TEMP", |s: &str| s.parse::<u8>().ok());
        env_override!(self, pid_enabled, "PID_ENABLED", parse_bool);
        env_override!(self, pid_kp, "PID_KP", |s: &str| s.parse::<f64>().ok());
        env_override!(self, pid_ki, "PID_KI", |s: &str| s.parse::<f64>().ok());
        env_override!(self, pid_kd, "PID_KD", |s: &str| s.parse::<f64>().ok());
        env_override!(self, adaptive_enabled, "ADAPTIVE_ENABLED", parse_bool);
        env_override!(self, debug, "DEBUG", parse_bool);
        if let Ok(raw) = std::env::var("ECFAND_SOCKET_PATH") {
            self.socket_path = PathBuf::from(raw);
        }
        if let Ok(raw) = std::env::var("ECFAND_LOCK_PATH") {
            self.lock_path = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Validates every field against the ranges documented in the
    /// configuration surface. Returns the first violation found, naming
    /// the field, the offending value, and the valid range.
    pub fn validate(&self) -> Result<(), DaemonError> {
        fn in_range<T: PartialOrd + std::fmt::Display + Copy>(
            field: &str,
            value: T,
            lo: T,
            hi: T,
        ) -> Result<(), DaemonError> {
            if value < lo || value > hi {
                Err(DaemonError::InvalidArgument(format!(
                    "{field}={value} out of range [{lo}, {hi}]"
                )))
            } else {
                Ok(())
            }
        }

        in_range("interval", self.interval, 0.1, 60.0)?;
        in_range("target_temp", self.target_temp, 40, 100)?;
        in_range("pid_kp", self.pid_kp, 0.5, 5.0)?;
        in_range("pid_ki", self.pid_ki, 0.01, 0.5)?;
        in_range("pid_kd", self.pid_kd, 0.1, 2.0)?;
        if self.pid_output_min >= self.pid_output_max {
            return Err(DaemonError::InvalidArgument(format!(
                "pid_output_min={} must be less than pid_output_max={}",
                self.pid_output_min, self.pid_output_max
            )));
        }
        in_range("adaptive_tuning_interval", self.adaptive_tuning_interval, 10, 300)?;
        in_range(
            "adaptive_target_performance",
            self.adaptive_target_performance,
            0.1,
            1.0,
        )?;
        in_range("adaptive_rapid_cycles", self.adaptive_rapid_cycles, 1, 50)?;
        in_range(
            "adaptive_rapid_multiplier",
            self.adaptive_rapid_multiplier,
            1.0,
            10.0,
        )?;
        in_range(
            "adaptive_steady_threshold",
            self.adaptive_steady_threshold,
            0.01,
            0.20,
        )?;
        in_range("adaptive_steady_cycles", self.adaptive_steady_cycles, 1, 20)?;
        in_range("activity_temp_threshold", self.activity_temp_threshold, 1, 10)?;
        in_range("activity_fan_threshold", self.activity_fan_threshold, 1, 20)?;
        in_range("activity_stable_period", self.activity_stable_period, 60, 1800)?;
        in_range(
            "activity_max_idle_cycles",
            self.activity_max_idle_cycles,
            1,
            20,
        )?;
        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
