//! Child process ownership: spawning a command in its own process group
//! and escalating termination signals to that group.
//!
//! The shell invocation (`bash -lc`) and the `exec 2>&1` prefix that
//! merges stderr into the combined output stream are taken directly from
//! the reference implementation's `subprocess.Popen(["bash", "-lc", cmd],
//! stdout=PIPE, stderr=STDOUT, start_new_session=True)`.

use std::os::unix::process::CommandExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

pub struct Spawned {
    pub child: Child,
    pub pgid: i32,
}

pub fn spawn(command: &str) -> std::io::Result<Spawned> {
    let mut cmd = Command::new("bash");
    cmd.arg("-lc")
        .arg(format!("exec 2>&1; {command}"))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(false);

    // SAFETY: setsid() is async-signal-safe and is the only thing done in
    // the child between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }

    let mut child = cmd.spawn()?;
    let pgid = child
        .id()
        .ok_or_else(|| std::io::Error::other("child exited before id() could be read"))? as i32;
    let _ = child.stderr.take();
    Ok(Spawned { child, pgid })
}

/// `true` if the group still has at least one live process.
fn group_alive(pgid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // Signal 0 performs no-op existence/permission checking only.
    kill(Pid::from_raw(pgid), None).is_ok()
}

fn killpg(pgid: i32, signal: nix::sys::signal::Signal) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;
    killpg(Pid::from_raw(pgid), signal).is_ok()
}

/// Three-step graceful escalation delivered to the process group:
/// SIGINT (wait up to 1.5s), SIGTERM (wait up to 2.0s), SIGKILL (no wait).
/// Returns as soon as the group is confirmed gone at any step. Does not
/// touch the `Child` handle — the runner's reader task owns that and
/// reaps the exit status once stdout closes.
pub async fn stop_gracefully(pgid: i32) {
    use nix::sys::signal::Signal;

    if !group_alive(pgid) {
        return;
    }

    const STEPS: &[(Signal, Duration)] = &[
        (Signal::SIGINT, Duration::from_millis(1500)),
        (Signal::SIGTERM, Duration::from_millis(2000)),
        (Signal::SIGKILL, Duration::from_millis(0)),
    ];

    for (signal, wait) in STEPS {
        if !killpg(pgid, *signal) {
            return;
        }
        if wait.is_zero() {
            return;
        }
        if wait_until_gone(pgid, *wait).await {
            return;
        }
    }
}

async fn wait_until_gone(pgid: i32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !group_alive(pgid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    !group_alive(pgid)
}
