//! Process management - The privileged OS capability and name resolution

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use anyhow::{Context, Result};
use sysinfo::{
    MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System,
    UpdateKind,
};
use tracing::{debug, info, trace, warn};

use super::entry::TargetList;
use crate::platform;

/// Point-in-time view of one live process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

/// Narrow capability over the live process table and the privileged calls
/// the engine needs. Injected at startup so engine logic can run against a
/// fake in tests.
pub trait ProcessControl: Send + Sync {
    /// Snapshot of every live process
    fn processes(&self) -> Vec<ProcessInfo>;
    /// Force-terminate a process
    fn terminate(&self, pid: u32) -> Result<()>;
    /// Pause a process without terminating it
    fn suspend(&self, pid: u32) -> Result<()>;
    /// Continue a paused process
    fn resume(&self, pid: u32) -> Result<()>;
    fn is_alive(&self, pid: u32) -> bool;
    fn exe_path(&self, pid: u32) -> Option<PathBuf>;
    /// Launch a new detached instance, returning its pid
    fn spawn(&self, path: &Path) -> Result<u32>;
    /// System-wide used memory in MB
    fn used_memory_mb(&self) -> u64;
}

/// Find every live process whose name matches any of `targets`.
///
/// An empty result is not an error. The result is a snapshot; callers
/// re-validate liveness before acting on a pid later.
pub fn resolve(control: &dyn ProcessControl, targets: &TargetList) -> Vec<ProcessInfo> {
    let matches: Vec<ProcessInfo> = control
        .processes()
        .into_iter()
        .filter(|p| targets.matches(&p.name))
        .collect();
    trace!("Resolved '{}' to {} processes", targets, matches.len());
    matches
}

/// Compare a live executable path to the one recorded for an entry
pub fn same_executable(live: &Path, recorded: &Path) -> bool {
    live.to_string_lossy()
        .eq_ignore_ascii_case(&recorded.to_string_lossy())
}

/// `ProcessControl` backed by sysinfo for the process table and the
/// platform module for signals
pub struct SystemProcessControl {
    system: Mutex<System>,
    /// Instances we launched, held until they exit so they can be reaped
    children: Mutex<Vec<Child>>,
}

impl SystemProcessControl {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Collect the exit status of launched instances that have finished
    fn reap_children(&self) {
        let mut children = self
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Launched PID {} exited with {}", child.id(), status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Failed to check launched PID {}: {}", child.id(), e);
                false
            }
        });
    }

    fn with_system<T>(&self, f: impl FnOnce(&mut System) -> T) -> T {
        // A poisoned lock only means another reader panicked mid-refresh;
        // the next refresh overwrites whatever it left behind.
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut system)
    }
}

impl Default for SystemProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for SystemProcessControl {
    fn processes(&self) -> Vec<ProcessInfo> {
        self.reap_children();

        self.with_system(|system| {
            system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::new().with_cpu().with_memory(),
            );

            system
                .processes()
                .iter()
                .filter(|(_, p)| p.status() != ProcessStatus::Zombie)
                .map(|(pid, p)| ProcessInfo {
                    pid: pid.as_u32(),
                    name: p.name().to_string_lossy().to_string(),
                    cpu_percent: p.cpu_usage(),
                    memory_bytes: p.memory(),
                })
                .collect()
        })
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        debug!("Terminating PID {}", pid);
        platform::kill_process(pid)
    }

    fn suspend(&self, pid: u32) -> Result<()> {
        debug!("Suspending PID {}", pid);
        platform::suspend_process(pid)
    }

    fn resume(&self, pid: u32) -> Result<()> {
        debug!("Resuming PID {}", pid);
        platform::resume_process(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.reap_children();

        if !platform::is_process_running(pid) {
            return false;
        }

        self.with_system(|system| {
            let target = [Pid::from_u32(pid)];
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&target),
                true,
                ProcessRefreshKind::new(),
            );
            system
                .process(Pid::from_u32(pid))
                .map(|p| p.status() != ProcessStatus::Zombie)
                .unwrap_or(false)
        })
    }

    fn exe_path(&self, pid: u32) -> Option<PathBuf> {
        self.with_system(|system| {
            let target = [Pid::from_u32(pid)];
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&target),
                true,
                ProcessRefreshKind::new().with_exe(UpdateKind::Always),
            );
            system
                .process(Pid::from_u32(pid))
                .and_then(|p| p.exe().map(Path::to_path_buf))
        })
    }

    fn spawn(&self, path: &Path) -> Result<u32> {
        info!("Launching {:?}", path);

        if !path.exists() {
            anyhow::bail!("Executable not found: {}", path.display());
        }

        let mut cmd = Command::new(path);
        if let Some(parent) = path.parent() {
            cmd.current_dir(parent);
        }

        // Detach from our process group so the instance outlives SceneShift
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(0x00000008); // DETACHED_PROCESS
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn process")?;

        let pid = child.id();
        info!("Spawned process with PID {}", pid);

        self.reap_children();
        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(child);
        Ok(pid)
    }

    fn used_memory_mb(&self) -> u64 {
        self.with_system(|system| {
            system.refresh_memory_specifics(MemoryRefreshKind::new().with_ram());
            system.used_memory() / 1024 / 1024
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeProcessControl;

    #[test]
    fn test_resolve_matches_every_target_case_insensitively() {
        let fake = FakeProcessControl::new()
            .with_process(10, "Steam.exe", None)
            .with_process(11, "steamwebhelper.exe", None)
            .with_process(12, "steamwebhelper.exe", None)
            .with_process(13, "notepad.exe", None);

        let found = resolve(&fake, &TargetList::parse("steam.exe, SteamWebHelper.exe"));
        let mut pids: Vec<_> = found.iter().map(|p| p.pid).collect();
        pids.sort();
        assert_eq!(pids, vec![10, 11, 12]);
    }

    #[test]
    fn test_resolve_without_matches_is_empty() {
        let fake = FakeProcessControl::new().with_process(1, "init", None);
        assert!(resolve(&fake, &TargetList::parse("Foo.exe")).is_empty());
    }

    #[test]
    fn test_same_executable_ignores_case() {
        assert!(same_executable(
            Path::new("C:\\Apps\\Foo.exe"),
            Path::new("c:\\apps\\foo.EXE")
        ));
        assert!(!same_executable(
            Path::new("/usr/bin/foo"),
            Path::new("/usr/bin/bar")
        ));
    }

    #[test]
    fn test_system_control_sees_current_process() {
        let control = SystemProcessControl::new();
        let me = std::process::id();
        assert!(control.is_alive(me));
        assert!(control.processes().iter().any(|p| p.pid == me));
    }

    #[cfg(unix)]
    #[test]
    fn test_launched_instance_is_reaped_after_exit() {
        use std::time::{Duration, Instant};

        let control = SystemProcessControl::new();
        // sh exits at once on a null stdin
        let pid = control.spawn(Path::new("/bin/sh")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while control.is_alive(pid) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }

        assert!(!control.is_alive(pid));
        // A zombie would still answer signal 0
        assert!(!platform::is_process_running(pid));
        assert!(control.children.lock().unwrap().is_empty());
    }
}
