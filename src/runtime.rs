//! The runtime shell: single-instance enforcement and signal-driven
//! shutdown. Everything here is process-wide setup invoked once from
//! `main`, not part of the steady-state control loop.

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};

use crate::error::DaemonError;

/// Holds the lock file open for the process lifetime; dropping it releases
/// the advisory lock.
pub struct InstanceLock {
    _file: std::fs::File,
}

/// Acquires an exclusive, non-blocking `flock` on `lock_path`, creating it
/// if necessary. Returns [`DaemonError::AlreadyRunning`] if another
/// instance already holds it.
pub fn acquire_instance_lock(lock_path: &Path) -> Result<InstanceLock, DaemonError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(lock_path)
        .map_err(|e| DaemonError::AlreadyRunning(format!("opening {}: {e}", lock_path.display())))?;

    // SAFETY: flock only affects this fd's advisory lock state.
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret != 0 {
        return Err(DaemonError::AlreadyRunning(format!(
            "could not lock {} (another ecfand instance is running)",
            lock_path.display()
        )));
    }

    Ok(InstanceLock { _file: file })
}

/// Registers SIGTERM/SIGINT/SIGQUIT to flip a shared flag rather than
/// terminate the process outright, so both the control loop and the IPC
/// accept loop can observe shutdown and exit in an orderly fashion.
pub fn install_shutdown_handler() -> Result<Arc<AtomicBool>, DaemonError> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGTERM, SIGINT, SIGQUIT] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .map_err(|e| DaemonError::Internal(format!("registering signal {signal}: {e}")))?;
    }
    Ok(shutdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_lock_attempt_on_same_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ecfand.lock");
        let _held = acquire_instance_lock(&path).unwrap();
        assert!(acquire_instance_lock(&path).is_err());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ecfand.lock");
        {
            let _held = acquire_instance_lock(&path).unwrap();
        }
        assert!(acquire_instance_lock(&path).is_ok());
    }
}
