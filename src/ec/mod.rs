//! EC (Embedded Controller) transport: the only part of this daemon that
//! touches hardware. Everything above this layer talks to an
//! [`EcTransport`] trait object, never to a port or a register address
//! directly, so the sensor layer, PID core, and controller state machine
//! are testable with [`fake::FakeEcTransport`] off real hardware.

pub mod fake;
pub mod port;

use crate::error::DaemonError;

/// Status/command port. A command byte written here selects the kind of
/// transaction that follows.
pub const EC_SC_PORT: u16 = 0x66;
/// Data port. Addresses, read results, and write values travel here.
pub const EC_DATA_PORT: u16 = 0x62;

/// Command byte that initiates a register read.
pub const CMD_READ: u8 = 0x80;
/// Command byte that initiates the fan-duty write sequence.
pub const CMD_WRITE_FAN: u8 = 0x99;
/// The single port address accepted by [`CMD_WRITE_FAN`].
pub const FAN_WRITE_PORT: u8 = 0x01;

pub const REG_CPU_TEMP: u8 = 0x07;
pub const REG_GPU_TEMP: u8 = 0xCD;
pub const REG_FAN_DUTY: u8 = 0xCE;
pub const REG_FAN_RPM_HI: u8 = 0xD0;
pub const REG_FAN_RPM_LO: u8 = 0xD1;

/// Bounded spin: at most this many one-millisecond polls of a status flag
/// before a transaction fails with [`DaemonError::EcTimeout`].
pub const HANDSHAKE_MAX_POLLS: u32 = 100;

/// Size of the kernel-exposed EC memory image used by the bulk read path.
pub const BULK_IMAGE_SIZE: usize = 256;

/// The EC access boundary. Production code talks to [`port::PortEcTransport`];
/// tests talk to [`fake::FakeEcTransport`].
pub trait EcTransport {
    /// Reads a single register through the port-level handshake (or the
    /// bulk image path, if the implementation maintains one).
    fn read_register(&mut self, addr: u8) -> Result<u8, DaemonError>;

    /// Performs the fan-duty write sequence: command `cmd`, address `port`,
    /// value `value`.
    fn write_register(&mut self, cmd: u8, port: u8, value: u8) -> Result<(), DaemonError>;
}
