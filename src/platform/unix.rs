//! Unix process signalling (Linux and macOS)

use anyhow::Result;

fn send_signal(pid: u32, signal: libc::c_int, action: &str) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| anyhow::anyhow!("PID {} out of range", pid))?;
    if pid <= 0 {
        anyhow::bail!("Refusing to {} process group {}", action, pid);
    }

    let result = unsafe { libc::kill(pid, signal) };
    if result == 0 {
        Ok(())
    } else {
        anyhow::bail!(
            "Failed to {} process: {}",
            action,
            std::io::Error::last_os_error()
        )
    }
}

/// Force kill a process (SIGKILL)
pub fn kill_process(pid: u32) -> Result<()> {
    send_signal(pid, libc::SIGKILL, "kill")
}

/// Suspend a process (SIGSTOP)
pub fn suspend_process(pid: u32) -> Result<()> {
    send_signal(pid, libc::SIGSTOP, "suspend")
}

/// Resume a suspended process (SIGCONT)
pub fn resume_process(pid: u32) -> Result<()> {
    send_signal(pid, libc::SIGCONT, "resume")
}

/// Check if a process is running
pub fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // Signal 0 checks existence without delivering anything. EPERM still
    // means the process exists, it just belongs to someone else.
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
