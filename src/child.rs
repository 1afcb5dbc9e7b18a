// SPDX-License-Identifier: MIT
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Starts the child in a process group of its own. A terminal Ctrl-C then reaches only
/// us, and the session decides how the child is stopped.
pub fn own_process_group(cmd: &mut Command) -> &mut Command {
    cmd.process_group(0)
}

/// Sends SIGTERM, waits up to `grace` for the child to exit, then kills it.
pub fn terminate(child: &mut Child, label: &str, grace: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(label, %status, "child already exited");
        return;
    }

    if let Ok(raw) = i32::try_from(child.id()) {
        let _ = signal::kill(Pid::from_raw(raw), Signal::SIGTERM);
    }
    wait_or_kill(child, label, grace);
}

/// Waits up to `grace` for a child that was asked to exit, then kills it.
pub fn wait_or_kill(child: &mut Child, label: &str, grace: Duration) {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(label, %status, "child exited");
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
            _ => {
                debug!(label, "child did not exit in time, killing");
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;

    use nix::unistd;

    use super::*;

    #[test]
    fn terminates_a_sleeping_child() {
        let Ok(mut child) = Command::new("sleep").arg("30").stdin(Stdio::null()).spawn() else {
            return;
        };
        let start = Instant::now();
        terminate(&mut child, "sleep", Duration::from_secs(2));
        assert!(child.try_wait().unwrap().is_some());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn child_leads_its_own_process_group() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30").stdin(Stdio::null());
        own_process_group(&mut cmd);
        let Ok(mut child) = cmd.spawn() else {
            return;
        };

        let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
        let child_group = unistd::getpgid(Some(pid)).unwrap();
        let our_group = unistd::getpgid(None).unwrap();
        terminate(&mut child, "sleep", Duration::from_secs(2));

        assert_eq!(child_group, pid);
        assert_ne!(child_group, our_group);
    }
}
