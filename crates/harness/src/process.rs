//! Process-tree spawning and termination
//!
//! The backing service is started as the leader of a new process group so
//! that everything it forks (package manager, bundler, preview server) can be
//! signalled together. Platforms without process groups fall back to killing
//! the tracked child directly.

use std::process::{Child, Command};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Make `cmd` start a new process group when spawned
pub fn new_process_group(cmd: &mut Command) -> &mut Command {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    cmd
}

/// Terminate `child` and every descendant in its process group, then reap it.
///
/// Sends a polite signal first and escalates after `grace`. Never fails for a
/// process that has already exited. Blocks for up to `grace`, so async callers
/// go through `SessionHandle::shutdown`.
pub fn terminate_process_tree(child: &mut Child, grace: Duration) {
    let pid = child.id();
    debug!(pid, "Terminating process tree");

    #[cfg(unix)]
    unix::terminate(child, grace);

    #[cfg(windows)]
    windows::terminate(child);

    #[cfg(not(any(unix, windows)))]
    {
        let _ = grace;
        if let Err(e) = child.kill() {
            debug!(pid, error = %e, "kill failed (already exited?)");
        }
    }

    match child.wait() {
        Ok(status) => debug!(pid, %status, "Process reaped"),
        Err(e) => warn!(pid, error = %e, "Failed to reap process"),
    }
}

/// Forcefully kill every process in the group led by `pid`.
///
/// For children not tracked by a std `Child` (e.g. tokio processes).
pub fn kill_process_group(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(pid, error = %e, "killpg failed (already exited?)");
        }
    }

    #[cfg(windows)]
    {
        let _ = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }

    #[cfg(not(any(unix, windows)))]
    let _ = pid;
}

/// Poll until the child exits or `limit` elapses. Returns whether it exited.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> bool {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if start.elapsed() >= limit => return false,
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(_) => return false,
        }
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    pub(super) fn terminate(child: &mut Child, grace: Duration) {
        let pgid = Pid::from_raw(child.id() as i32);

        match killpg(pgid, Signal::SIGTERM) {
            Ok(()) => {
                wait_with_deadline(child, grace);
            }
            Err(Errno::ESRCH) => {}
            Err(e) => {
                warn!(pgid = %pgid, error = %e, "killpg failed, signalling process directly");
                let _ = child.kill();
                return;
            }
        }

        // Descendants may outlive the leader; sweep whatever is left
        if killpg(pgid, None).is_ok() {
            debug!(pgid = %pgid, "Process group still alive after grace period, sending SIGKILL");
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                if e != Errno::ESRCH {
                    warn!(pgid = %pgid, error = %e, "SIGKILL to process group failed");
                }
            }
        }

        let _ = child.kill();
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::process::Stdio;

    pub(super) fn terminate(child: &mut Child) {
        let pid = child.id().to_string();
        let status = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        if !matches!(status, Ok(s) if s.success()) {
            debug!(pid = %pid, "taskkill did not succeed, killing process directly");
            let _ = child.kill();
        }
    }
}
