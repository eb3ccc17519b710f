//! The sensor/actuator layer: the only place raw EC register bytes are
//! interpreted. Everything above this module deals exclusively in
//! degrees Celsius, percent duty, and RPM.

use crate::ec::{
    EcTransport, CMD_WRITE_FAN, FAN_WRITE_PORT, REG_CPU_TEMP, REG_FAN_DUTY, REG_FAN_RPM_HI,
    REG_FAN_RPM_LO, REG_GPU_TEMP,
};
use crate::error::DaemonError;

/// RPM numerator from the EC's fan tachometer divisor relation.
const RPM_CONSTANT: u32 = 2_156_220;

pub fn read_cpu_temp(ec: &mut dyn EcTransport) -> Result<u8, DaemonError> {
    ec.read_register(REG_CPU_TEMP)
}

pub fn read_gpu_temp(ec: &mut dyn EcTransport) -> Result<u8, DaemonError> {
    ec.read_register(REG_GPU_TEMP)
}

/// Converts the raw 0-255 duty register into a 0-100 percentage.
pub fn fan_duty_from_raw(raw: u8) -> u8 {
    (raw as u32 * 100 / 255) as u8
}

pub fn read_fan_duty(ec: &mut dyn EcTransport) -> Result<u8, DaemonError> {
    Ok(fan_duty_from_raw(ec.read_register(REG_FAN_DUTY)?))
}

/// Converts a 16-bit tachometer divisor into an RPM figure; zero divisor
/// means the fan is stopped (or the reading isn't meaningful), not a
/// division fault.
pub fn fan_rpm_from_divisor(divisor: u32) -> u32 {
    if divisor == 0 {
        0
    } else {
        RPM_CONSTANT / divisor
    }
}

pub fn read_fan_rpm(ec: &mut dyn EcTransport) -> Result<u32, DaemonError> {
    let hi = ec.read_register(REG_FAN_RPM_HI)? as u32;
    let lo = ec.read_register(REG_FAN_RPM_LO)? as u32;
    Ok(fan_rpm_from_divisor((hi << 8) | lo))
}

/// Writes a fan duty percentage, rejecting anything outside `[1, 100]`.
pub fn write_fan_duty(ec: &mut dyn EcTransport, pct: u8) -> Result<(), DaemonError> {
    if !(1..=100).contains(&pct) {
        return Err(DaemonError::InvalidArgument(format!(
            "fan duty {pct}% out of range [1, 100]"
        )));
    }
    let raw = ((pct as u32 * 255 + 50) / 100) as u8;
    ec.write_register(CMD_WRITE_FAN, FAN_WRITE_PORT, raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::fake::FakeEcTransport;

    #[test]
    fn duty_from_raw_matches_floor_relation() {
        for raw in 0u32..=255 {
            assert_eq!(fan_duty_from_raw(raw as u8) as u32, raw * 100 / 255);
        }
        assert_eq!(fan_duty_from_raw(255), 100);
        assert_eq!(fan_duty_from_raw(0), 0);
    }

    #[test]
    fn rpm_zero_divisor_is_zero() {
        assert_eq!(fan_rpm_from_divisor(0), 0);
    }

    #[test]
    fn rpm_matches_known_value() {
        // 2_156_220 / 862 == 2501 (truncating division).
        assert_eq!(fan_rpm_from_divisor(862), 2501);
    }

    #[test]
    fn write_fan_duty_rejects_out_of_range() {
        let mut ec = FakeEcTransport::new();
        assert!(write_fan_duty(&mut ec, 0).is_err());
        assert!(write_fan_duty(&mut ec, 101).is_err());
        assert_eq!(ec.write_count, 0);
    }

    #[test]
    fn write_fan_duty_converts_percent_to_raw() {
        let mut ec = FakeEcTransport::new();
        write_fan_duty(&mut ec, 100).unwrap();
        assert_eq!(ec.last_write, Some((CMD_WRITE_FAN, FAN_WRITE_PORT, 255)));

        write_fan_duty(&mut ec, 50).unwrap();
        assert_eq!(ec.last_write, Some((CMD_WRITE_FAN, FAN_WRITE_PORT, 128)));
    }

    #[test]
    fn read_cpu_and_gpu_temp_are_straight_reads() {
        let mut ec = FakeEcTransport::new()
            .with_register(REG_CPU_TEMP, 55)
            .with_register(REG_GPU_TEMP, 60);
        assert_eq!(read_cpu_temp(&mut ec).unwrap(), 55);
        assert_eq!(read_gpu_temp(&mut ec).unwrap(), 60);
    }
}
