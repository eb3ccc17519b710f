//! In-memory [`EcTransport`] used by every unit test above the transport
//! layer, so sensor, PID, activity, adaptive, and control-loop tests never
//! touch real hardware.

use std::collections::VecDeque;

use super::EcTransport;
use crate::error::{DaemonError, EcFlag};

/// A programmable fake EC: a 256-byte register file plus queues of
/// injected failures, so tests can simulate timeouts and short bulk reads
/// without any I/O.
#[derive(Debug, Clone)]
pub struct FakeEcTransport {
    pub registers: [u8; 256],
    pub last_write: Option<(u8, u8, u8)>,
    timeouts: VecDeque<u8>,
    pub write_count: u32,
}

impl FakeEcTransport {
    pub fn new() -> Self {
        Self {
            registers: [0; 256],
            last_write: None,
            timeouts: VecDeque::new(),
            write_count: 0,
        }
    }

    pub fn with_register(mut self, addr: u8, value: u8) -> Self {
        self.registers[addr as usize] = value;
        self
    }

    /// The next `read_register(addr)` (or `write_register`, matching on
    /// the `port` argument) will fail with `EcTimeout` instead of
    /// succeeding.
    pub fn queue_timeout(&mut self, addr: u8) {
        self.timeouts.push_back(addr);
    }
}

impl Default for FakeEcTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl EcTransport for FakeEcTransport {
    fn read_register(&mut self, addr: u8) -> Result<u8, DaemonError> {
        if self.timeouts.front() == Some(&addr) {
            self.timeouts.pop_front();
            return Err(DaemonError::EcTimeout { register: addr, flag: EcFlag::OutputBufferFull });
        }
        Ok(self.registers[addr as usize])
    }

    fn write_register(&mut self, cmd: u8, port: u8, value: u8) -> Result<(), DaemonError> {
        if self.timeouts.front() == Some(&port) {
            self.timeouts.pop_front();
            return Err(DaemonError::EcTimeout { register: port, flag: EcFlag::InputBufferFull });
        }
        self.last_write = Some((cmd, port, value));
        self.write_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_returns_programmed_value() {
        let mut ec = FakeEcTransport::new().with_register(0x07, 42);
        assert_eq!(ec.read_register(0x07).unwrap(), 42);
    }

    #[test]
    fn queued_timeout_fails_once_then_recovers() {
        let mut ec = FakeEcTransport::new().with_register(0x07, 42);
        ec.queue_timeout(0x07);
        assert!(ec.read_register(0x07).is_err());
        assert_eq!(ec.read_register(0x07).unwrap(), 42);
    }

    #[test]
    fn write_records_last_call() {
        let mut ec = FakeEcTransport::new();
        ec.write_register(0x99, 0x01, 0xCC).unwrap();
        assert_eq!(ec.last_write, Some((0x99, 0x01, 0xCC)));
        assert_eq!(ec.write_count, 1);
    }
}
