use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

pub const CANCEL_GRACE: Duration = Duration::from_secs(2);

#[cfg(unix)]
pub fn default_shell() -> (String, Vec<String>) {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
}

#[cfg(windows)]
pub fn default_shell() -> (String, Vec<String>) {
    ("cmd".to_string(), vec!["/C".to_string()])
}

/// Builds `<program> <args..> <command>` with stdin closed and both output
/// pipes captured. The child gets its own process group so cancellation can
/// reach anything it forks.
pub fn shell_command(program: &str, args: &[String], command: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args).arg(command);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    apply_process_group(&mut cmd);
    cmd
}

#[cfg(unix)]
pub fn apply_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn apply_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(pgid: Option<u32>, signal: libc::c_int) {
    if let Some(pgid) = pgid {
        unsafe {
            libc::kill(-(pgid as i32), signal);
        }
    }
}

#[cfg(unix)]
fn interrupt_group(pgid: Option<u32>) {
    signal_group(pgid, libc::SIGINT);
}

#[cfg(unix)]
fn kill_group(pgid: Option<u32>) {
    signal_group(pgid, libc::SIGKILL);
}

#[cfg(not(unix))]
fn interrupt_group(_pgid: Option<u32>) {}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) {}

/// SIGINT to the group, wait up to [`CANCEL_GRACE`], then SIGKILL and reap.
///
/// The group is swept with SIGKILL once the leader is gone, since members
/// that ignore SIGINT (background jobs of a non-interactive shell) outlive it.
pub async fn terminate_child(child: &mut Child) -> Option<ExitStatus> {
    let pgid = child.id();
    interrupt_group(pgid);
    let status = match tokio::time::timeout(CANCEL_GRACE, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            kill_group(pgid);
            let _ = child.kill().await;
            match tokio::time::timeout(CANCEL_GRACE, child.wait()).await {
                Ok(status) => status.ok(),
                Err(_) => None,
            }
        }
    };
    kill_group(pgid);
    status
}
