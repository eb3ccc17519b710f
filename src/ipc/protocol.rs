//! Pure request parsing and response formatting for the IPC command
//! grammar. Deliberately free of sockets so it can be tested directly.

use crate::control::Snapshot;

/// A parsed client request. Unknown commands and malformed/out-of-range
/// arguments never reach this type: [`parse_request`] rejects them first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    Status,
    GetTemp,
    GetFan,
    SetFan(u8),
    SetAuto,
    SetTargetTemp(u8),
}

/// Parses one request line. On success, every invariant the caller needs
/// (argument present, numeric, in range) already holds on the returned
/// value. On failure, the `String` is the message to embed in an
/// `ERROR: ...` reply.
pub fn parse_request(line: &str) -> Result<Request, String> {
    let mut parts = line.trim().split_whitespace();
    match parts.next() {
        Some("STATUS") => Ok(Request::Status),
        Some("GET_TEMP") => Ok(Request::GetTemp),
        Some("GET_FAN") => Ok(Request::GetFan),
        Some("SET_FAN") => {
            let arg = parts.next().ok_or_else(|| "SET_FAN requires an argument".to_string())?;
            let n: u8 = arg.parse().map_err(|_| format!("invalid fan duty {arg:?}"))?;
            if !(1..=100).contains(&n) {
                return Err(format!("fan duty {n} out of range [1, 100]"));
            }
            Ok(Request::SetFan(n))
        }
        Some("SET_AUTO") => Ok(Request::SetAuto),
        Some("SET_TARGET_TEMP") => {
            let arg = parts
                .next()
                .ok_or_else(|| "SET_TARGET_TEMP requires an argument".to_string())?;
            let n: u8 = arg.parse().map_err(|_| format!("invalid target temperature {arg:?}"))?;
            if !(40..=100).contains(&n) {
                return Err(format!("target temperature {n} out of range [40, 100]"));
            }
            Ok(Request::SetTargetTemp(n))
        }
        Some(other) => Err(format!("unknown command {other:?}")),
        None => Err("empty request".to_string()),
    }
}

pub fn format_status(s: &Snapshot) -> String {
    format!(
        "CPU:{} GPU:{} FAN_DUTY:{} FAN_RPM:{} AUTO:{}",
        s.sample.cpu_temp, s.sample.gpu_temp, s.sample.fan_duty, s.sample.fan_rpm, s.auto_mode as u8
    )
}

pub fn format_get_temp(s: &Snapshot) -> String {
    format!("CPU:{} GPU:{}", s.sample.cpu_temp, s.sample.gpu_temp)
}

pub fn format_get_fan(s: &Snapshot) -> String {
    format!("DUTY:{} RPM:{} AUTO:{}", s.sample.fan_duty, s.sample.fan_rpm, s.auto_mode as u8)
}
