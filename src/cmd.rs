use std::ffi::OsStr;
use std::process::{Command, Stdio};

/// Command with piped output and no stdin, detached from the caller's
/// console so the whole tree can be signalled on cancel.
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    // Prevent console windows from stealing focus on Windows while running tools.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(unix)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // Own process group, so ffmpeg helpers die with yt-dlp.
    cmd.process_group(0);
}

#[cfg(not(any(unix, windows)))]
fn configure_for_background(_cmd: &mut Command) {}

/// Asks the child (and its group) to exit.
#[cfg(unix)]
pub fn request_terminate(child: &std::process::Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: signalling a process group we created; failure is harmless.
    unsafe {
        libc::kill(-pid, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
pub fn request_terminate(_child: &std::process::Child) {}

/// Forcibly kills the child and its helpers, then reaps it.
pub fn kill_child_process_tree(child: &mut std::process::Child) {
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        let _ = command("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .status();
    }

    #[cfg(unix)]
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: see request_terminate.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}
