//! Windows process signalling

use anyhow::{Context, Result};
use std::mem;

use windows::Win32::Foundation::{CloseHandle, FALSE, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use windows::Win32::System::Threading::*;

/// STILL_ACTIVE exit code
const STILL_ACTIVE: u32 = 259;

/// Force kill a process
pub fn kill_process(pid: u32) -> Result<()> {
    unsafe {
        let handle =
            OpenProcess(PROCESS_TERMINATE, FALSE, pid).context("Failed to open process")?;

        let result = TerminateProcess(handle, 1);
        CloseHandle(handle)?;

        result.context("Failed to kill process")
    }
}

/// Outcome of one suspend or resume pass over a process's threads
#[derive(Debug, Default, PartialEq, Eq)]
struct ThreadTally {
    touched: usize,
    failed: usize,
    last_error: Option<String>,
}

impl ThreadTally {
    /// Record a `SuspendThread`/`ResumeThread` return value. Both return the
    /// previous suspend count, or `u32::MAX` on failure.
    fn record(&mut self, previous: u32) {
        if previous == u32::MAX {
            self.failed += 1;
            self.last_error = Some(std::io::Error::last_os_error().to_string());
        } else {
            self.touched += 1;
        }
    }

    fn into_result(self, pid: u32, action: &str) -> Result<()> {
        match (self.touched, self.failed) {
            (0, 0) => anyhow::bail!("No threads found for PID {}", pid),
            (_, 0) => Ok(()),
            (touched, failed) => anyhow::bail!(
                "Failed to {} {} of {} threads of PID {}: {}",
                action,
                failed,
                touched + failed,
                pid,
                self.last_error.unwrap_or_default()
            ),
        }
    }
}

/// Apply `action` to every thread owned by `pid`
unsafe fn for_each_thread(pid: u32, action: impl Fn(HANDLE) -> u32) -> Result<ThreadTally> {
    let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0)?;

    let mut entry = THREADENTRY32 {
        dwSize: mem::size_of::<THREADENTRY32>() as u32,
        ..Default::default()
    };

    let mut tally = ThreadTally::default();
    if Thread32First(snapshot, &mut entry).is_ok() {
        loop {
            if entry.th32OwnerProcessID == pid {
                // Threads that exited since the snapshot fail to open; skip them
                if let Ok(thread_handle) =
                    OpenThread(THREAD_SUSPEND_RESUME, FALSE, entry.th32ThreadID)
                {
                    tally.record(action(thread_handle));
                    CloseHandle(thread_handle)?;
                }
            }
            if Thread32Next(snapshot, &mut entry).is_err() {
                break;
            }
        }
    }

    CloseHandle(snapshot)?;
    Ok(tally)
}

/// Suspend all threads in a process
pub fn suspend_process(pid: u32) -> Result<()> {
    unsafe {
        let handle =
            OpenProcess(PROCESS_SUSPEND_RESUME, FALSE, pid).context("Failed to open process")?;
        let tally = for_each_thread(pid, |thread| SuspendThread(thread));
        CloseHandle(handle)?;

        tally?.into_result(pid, "suspend")
    }
}

/// Resume all threads in a process
pub fn resume_process(pid: u32) -> Result<()> {
    unsafe {
        let handle =
            OpenProcess(PROCESS_SUSPEND_RESUME, FALSE, pid).context("Failed to open process")?;
        let tally = for_each_thread(pid, |thread| ResumeThread(thread));
        CloseHandle(handle)?;

        tally?.into_result(pid, "resume")
    }
}

/// Check if a process is running
pub fn is_process_running(pid: u32) -> bool {
    unsafe {
        let handle = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) {
            Ok(h) => h,
            Err(_) => return false,
        };

        let mut exit_code: u32 = 0;
        let result = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle).ok();

        result.is_ok() && exit_code == STILL_ACTIVE
    }
}
