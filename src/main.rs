//! ecfand: closed-loop laptop fan control daemon.
//!
//! Resolves configuration, acquires EC and single-instance privileges,
//! then runs exactly two threads for the rest of the process lifetime:
//! the control loop (owns all EC access) and the IPC accept loop.

use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;

use ecfand::config::{CliArgs, DaemonConfig};
use ecfand::control::{Controller, Sample, Snapshot};
use ecfand::ec::port::{acquire_raw_io_privilege, PortEcTransport};
use ecfand::ec::{EcTransport, REG_CPU_TEMP};
use ecfand::{ipc, logging, runtime};

fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();
    let cfg = DaemonConfig::resolve(&cli).context("resolving configuration")?;

    // Daemonize (if requested) before initializing logging: `Daemonize`
    // redirects stdout/stderr to `/dev/null` by default, and logging must
    // be set up against whatever stderr ends up as, not the terminal we're
    // about to detach from. `stderr` is explicitly kept open so the
    // rate-limited failure logs required by spec stay observable.
    if !cfg.foreground {
        daemonize::Daemonize::new()
            .working_directory("/")
            .stderr(daemonize::Stdio::keep())
            .start()
            .context("daemonizing")?;
    }

    logging::init(cfg.debug);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        socket_path = %cfg.socket_path.display(),
        target_temp = cfg.target_temp,
        interval = cfg.interval,
        "starting ecfand"
    );

    let _instance_lock = runtime::acquire_instance_lock(&cfg.lock_path).context("single-instance check")?;

    acquire_raw_io_privilege().context("acquiring raw I/O privilege")?;

    let shutdown = runtime::install_shutdown_handler().context("installing signal handlers")?;

    let mut ec: Box<dyn EcTransport + Send> = Box::new(PortEcTransport::new());
    // A single probe read before the control loop starts, so a dead or
    // missing EC fails the process at startup with its own exit code
    // rather than silently producing a tick full of rate-limited warnings.
    ec.read_register(REG_CPU_TEMP).context("probing EC at startup")?;

    // Bind the IPC socket here, not inside the spawned thread: a bind
    // failure must be fatal at startup (spec §6/§7), and a `Result`
    // returned from inside a detached thread can only ever become a log
    // line, never a process exit code.
    let listener = ipc::server::bind(&cfg.socket_path).context("binding IPC socket")?;

    let (command_tx, command_rx) = mpsc::channel();
    let snapshot = Arc::new(Mutex::new(Snapshot {
        sample: Sample::default(),
        auto_mode: true,
        target_temperature: cfg.target_temp,
    }));

    let mut controller = Controller::new(ec, &cfg, command_rx, snapshot.clone(), Instant::now());
    let tick_interval = Duration::from_secs_f64(cfg.interval);

    let control_shutdown = Arc::clone(&shutdown);
    let control_thread = thread::spawn(move || {
        while !control_shutdown.load(Ordering::Relaxed) {
            controller.tick(Instant::now());
            thread::sleep(tick_interval);
        }
        tracing::info!("control thread exiting");
    });

    let ipc_shutdown = Arc::clone(&shutdown);
    let socket_path = cfg.socket_path.clone();
    let ipc_thread = thread::spawn(move || {
        if let Err(e) = ipc::server::serve(&socket_path, listener, snapshot, command_tx, ipc_shutdown) {
            tracing::error!(%e, "ipc server exited with an error");
        }
    });

    control_thread.join().expect("control thread panicked");
    ipc_thread.join().expect("ipc thread panicked");

    tracing::info!("ecfand shut down");
    Ok(())
}
