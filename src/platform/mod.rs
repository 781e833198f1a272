//! Platform-specific process signalling for Unix and Windows

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

use anyhow::Result;

/// Force kill a process
pub fn kill_process(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        unix::kill_process(pid)
    }
    #[cfg(windows)]
    {
        windows::kill_process(pid)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        anyhow::bail!("Unsupported platform")
    }
}

/// Suspend a process
pub fn suspend_process(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        unix::suspend_process(pid)
    }
    #[cfg(windows)]
    {
        windows::suspend_process(pid)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        anyhow::bail!("Unsupported platform")
    }
}

/// Resume a suspended process
pub fn resume_process(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        unix::resume_process(pid)
    }
    #[cfg(windows)]
    {
        windows::resume_process(pid)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        anyhow::bail!("Unsupported platform")
    }
}

/// Check if a process is running
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unix::is_process_running(pid)
    }
    #[cfg(windows)]
    {
        windows::is_process_running(pid)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        false
    }
}
