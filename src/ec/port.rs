//! Raw port-level EC transport for x86_64 Linux, plus the bulk
//! memory-image fast path.
//!
//! Port I/O on this architecture requires `CAP_SYS_RAWIO` (or root) and an
//! explicit grant via `ioperm(2)`; see [`acquire_raw_io_privilege`].

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use super::{
    EcTransport, BULK_IMAGE_SIZE, EC_DATA_PORT, EC_SC_PORT, HANDSHAKE_MAX_POLLS,
};
use crate::error::{DaemonError, EcFlag};

/// Default path to the kernel-exposed EC register image (debugfs on most
/// distros). Overridable for tests, though production always uses this.
pub const DEFAULT_BULK_IMAGE_PATH: &str = "/sys/kernel/debug/ec/ec0/io";

/// Requests raw I/O privilege for the two EC ports. Must succeed exactly
/// once, before the first transaction; the transport never re-requests it.
///
/// On failure this returns [`DaemonError::PrivilegeDenied`] with operator
/// instructions; the daemon treats that as fatal at startup.
pub fn acquire_raw_io_privilege() -> Result<(), DaemonError> {
    let denied = |port: u16| {
        DaemonError::PrivilegeDenied(format!(
            "ioperm(0x{port:02x}) failed: run ecfand as root or grant it CAP_SYS_RAWIO \
             (e.g. `sudo setcap cap_sys_rawio+ep /path/to/ecfand`)"
        ))
    };

    // SAFETY: ioperm only changes this process's I/O permission bitmap; it
    // does not read or write memory we don't own.
    let sc = unsafe { libc::ioperm(EC_SC_PORT as libc::c_ulong, 1, 1) };
    if sc != 0 {
        return Err(denied(EC_SC_PORT));
    }
    let data = unsafe { libc::ioperm(EC_DATA_PORT as libc::c_ulong, 1, 1) };
    if data != 0 {
        return Err(denied(EC_DATA_PORT));
    }
    Ok(())
}

/// Reads a byte from `port`.
///
/// # Safety
/// The caller must have already obtained I/O privilege for `port` via
/// [`acquire_raw_io_privilege`].
#[inline]
unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    std::arch::asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
    value
}

/// Writes a byte to `port`.
///
/// # Safety
/// The caller must have already obtained I/O privilege for `port` via
/// [`acquire_raw_io_privilege`].
#[inline]
unsafe fn outb(port: u16, value: u8) {
    std::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
}

/// Raw ISA-style EC transport, with a latched preference for the faster
/// bulk memory-image read path.
pub struct PortEcTransport {
    bulk_image_path: PathBuf,
    use_bulk: bool,
}

impl PortEcTransport {
    /// Creates the transport and probes the bulk image path once; if the
    /// probe fails, falls back to the port-level path for the rest of the
    /// process.
    pub fn new() -> Self {
        Self::with_bulk_path(PathBuf::from(DEFAULT_BULK_IMAGE_PATH))
    }

    pub fn with_bulk_path(bulk_image_path: PathBuf) -> Self {
        let mut t = Self {
            bulk_image_path,
            use_bulk: false,
        };
        t.use_bulk = t.bulk_read().is_ok();
        t
    }

    fn bulk_read(&self) -> Result<[u8; BULK_IMAGE_SIZE], DaemonError> {
        let mut file = File::open(&self.bulk_image_path)
            .map_err(|_| DaemonError::EcShortRead { expected: BULK_IMAGE_SIZE, got: 0 })?;
        let mut buf = [0u8; BULK_IMAGE_SIZE];
        let got = file
            .read(&mut buf)
            .map_err(|_| DaemonError::EcShortRead { expected: BULK_IMAGE_SIZE, got: 0 })?;
        if got != BULK_IMAGE_SIZE {
            return Err(DaemonError::EcShortRead { expected: BULK_IMAGE_SIZE, got });
        }
        Ok(buf)
    }

    fn wait_for_flag(&self, flag: EcFlag, register: u8) -> Result<(), DaemonError> {
        for _ in 0..HANDSHAKE_MAX_POLLS {
            let status = unsafe { inb(EC_SC_PORT) };
            let satisfied = match flag {
                EcFlag::InputBufferFull => status & 0b10 == 0,
                EcFlag::OutputBufferFull => status & 0b01 != 0,
            };
            if satisfied {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(1));
        }
        Err(DaemonError::EcTimeout { register, flag })
    }

    fn port_read_register(&self, addr: u8) -> Result<u8, DaemonError> {
        self.wait_for_flag(EcFlag::InputBufferFull, addr)?;
        unsafe { outb(EC_SC_PORT, super::CMD_READ) };
        self.wait_for_flag(EcFlag::InputBufferFull, addr)?;
        unsafe { outb(EC_DATA_PORT, addr) };
        self.wait_for_flag(EcFlag::OutputBufferFull, addr)?;
        Ok(unsafe { inb(EC_DATA_PORT) })
    }

    fn port_write_register(&self, cmd: u8, port: u8, value: u8) -> Result<(), DaemonError> {
        self.wait_for_flag(EcFlag::InputBufferFull, port)?;
        unsafe { outb(EC_SC_PORT, cmd) };
        self.wait_for_flag(EcFlag::InputBufferFull, port)?;
        unsafe { outb(EC_DATA_PORT, port) };
        self.wait_for_flag(EcFlag::InputBufferFull, port)?;
        unsafe { outb(EC_DATA_PORT, value) };
        self.wait_for_flag(EcFlag::InputBufferFull, port)
    }
}

impl Default for PortEcTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl EcTransport for PortEcTransport {
    fn read_register(&mut self, addr: u8) -> Result<u8, DaemonError> {
        if self.use_bulk {
            match self.bulk_read() {
                Ok(buf) => return Ok(buf[addr as usize]),
                Err(_) => {
                    // Latch the downgrade: the image path stays unavailable
                    // for the remainder of the process.
                    self.use_bulk = false;
                }
            }
        }
        self.port_read_register(addr)
    }

    fn write_register(&mut self, cmd: u8, port: u8, value: u8) -> Result<(), DaemonError> {
        self.port_write_register(cmd, port, value)
    }
}
