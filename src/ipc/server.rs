//! The blocking Unix-domain-socket accept loop. One thread, inline
//! per-connection handling, no per-client fan-out.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::protocol::{self, Request};
use crate::control::{Command, Snapshot};
use crate::error::DaemonError;

/// Request frames larger than this are truncated by `BufRead::take`,
/// which then fails to find a newline and yields a malformed line.
const MAX_FRAME_BYTES: u64 = 1024;
/// How long `accept` blocks before re-checking the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Binds `socket_path` (removing any stale file first) and sets it
/// world-read/writeable. Called from `main` before the IPC thread is
/// spawned, so a bind failure is observed and turned into a nonzero exit
/// at startup rather than surfacing later from inside the thread.
pub fn bind(socket_path: &Path) -> Result<UnixListener, DaemonError> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)
        .map_err(|e| DaemonError::IpcError(format!("bind {}: {e}", socket_path.display())))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| DaemonError::IpcError(format!("set_nonblocking: {e}")))?;

    let mut perms = std::fs::metadata(socket_path)
        .map_err(|e| DaemonError::IpcError(format!("stat {}: {e}", socket_path.display())))?
        .permissions();
    perms.set_mode(0o666);
    std::fs::set_permissions(socket_path, perms)
        .map_err(|e| DaemonError::IpcError(format!("chmod {}: {e}", socket_path.display())))?;

    Ok(listener)
}

/// Serves requests on an already-[`bind`]-ed listener until `shutdown` is
/// set, then removes the socket file before returning.
pub fn serve(
    socket_path: &Path,
    listener: UnixListener,
    snapshot: Arc<Mutex<Snapshot>>,
    commands: Sender<Command>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), DaemonError> {
    tracing::info!(path = %socket_path.display(), "ipc server listening");

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => handle_connection(stream, &snapshot, &commands),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(%e, "ipc accept error");
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    tracing::info!("ipc server shut down");
    Ok(())
}

fn handle_connection(stream: UnixStream, snapshot: &Arc<Mutex<Snapshot>>, commands: &Sender<Command>) {
    let _ = stream.set_read_timeout(Some(CONNECTION_READ_TIMEOUT));
    let mut line = String::new();
    let mut limited = BufReader::new(&stream).take(MAX_FRAME_BYTES);
    match limited.read_line(&mut line) {
        Ok(0) => return,
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(%e, "ipc read error");
            return;
        }
    }

    let response = dispatch(&line, snapshot, commands);
    let mut stream = stream;
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(b"\n");
}

fn dispatch(line: &str, snapshot: &Arc<Mutex<Snapshot>>, commands: &Sender<Command>) -> String {
    match protocol::parse_request(line) {
        Ok(Request::Status) => protocol::format_status(&snapshot.lock().expect("snapshot mutex poisoned")),
        Ok(Request::GetTemp) => protocol::format_get_temp(&snapshot.lock().expect("snapshot mutex poisoned")),
        Ok(Request::GetFan) => protocol::format_get_fan(&snapshot.lock().expect("snapshot mutex poisoned")),
        Ok(Request::SetFan(n)) => {
            let _ = commands.send(Command::SetFan(n));
            format!("OK: Fan set to {n}%")
        }
        Ok(Request::SetAuto) => {
            let _ = commands.send(Command::SetAuto);
            "OK: Auto mode enabled".to_string()
        }
        Ok(Request::SetTargetTemp(n)) => {
            let _ = commands.send(Command::SetTargetTemp(n));
            format!("OK: Target temperature set to {n}\u{00b0}C")
        }
        Err(msg) => format!("ERROR: {msg}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Sample;
    use std::sync::mpsc;

    fn snapshot() -> Arc<Mutex<Snapshot>> {
        Arc::new(Mutex::new(Snapshot {
            sample: Sample { cpu_temp: 50, gpu_temp: 45, fan_duty: 30, fan_rpm: 2800 },
            auto_mode: true,
            target_temperature: 65,
        }))
    }

    #[test]
    fn dispatch_status_reads_snapshot_without_mutating() {
        let (tx, rx) = mpsc::channel();
        let snap = snapshot();
        let resp = dispatch("STATUS", &snap, &tx);
        assert_eq!(resp, "CPU:50 GPU:45 FAN_DUTY:30 FAN_RPM:2800 AUTO:1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_set_fan_sends_command_and_replies_ok() {
        let (tx, rx) = mpsc::channel();
        let snap = snapshot();
        let resp = dispatch("SET_FAN 55", &snap, &tx);
        assert_eq!(resp, "OK: Fan set to 55%");
        assert!(matches!(rx.try_recv(), Ok(Command::SetFan(55))));
    }

    #[test]
    fn dispatch_invalid_command_sends_nothing() {
        let (tx, rx) = mpsc::channel();
        let snap = snapshot();
        let resp = dispatch("SET_FAN 0", &snap, &tx);
        assert!(resp.starts_with("ERROR:"));
        assert!(rx.try_recv().is_err());
    }
}
