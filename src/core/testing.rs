//! In-memory `ProcessControl` used by unit tests

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;

use super::process::{ProcessControl, ProcessInfo};

/// A privileged call made against the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Terminate(u32),
    Suspend(u32),
    Resume(u32),
    Spawn(PathBuf),
}

#[derive(Debug, Clone)]
struct FakeProcess {
    name: String,
    exe: Option<PathBuf>,
    cpu_percent: f32,
    memory_bytes: u64,
    suspended: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    processes: BTreeMap<u32, FakeProcess>,
    calls: Vec<Call>,
    failing: HashSet<u32>,
    spawn_fails: bool,
    next_pid: u32,
    used_memory_mb: u64,
    table_queries: usize,
}

/// Process table held in memory. Every privileged call is recorded.
#[derive(Debug)]
pub struct FakeProcessControl {
    state: Mutex<FakeState>,
}

impl FakeProcessControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_pid: 50_000,
                ..Default::default()
            }),
        }
    }

    pub fn with_process(self, pid: u32, name: &str, exe: Option<&str>) -> Self {
        self.add_process(pid, name, exe);
        self
    }

    pub fn with_stats(self, pid: u32, cpu_percent: f32, memory_mb: u64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let process = state.processes.get_mut(&pid).expect("unknown pid");
            process.cpu_percent = cpu_percent;
            process.memory_bytes = memory_mb * 1024 * 1024;
        }
        self
    }

    pub fn add_process(&self, pid: u32, name: &str, exe: Option<&str>) {
        self.state.lock().unwrap().processes.insert(
            pid,
            FakeProcess {
                name: name.to_string(),
                exe: exe.map(PathBuf::from),
                cpu_percent: 0.0,
                memory_bytes: 0,
                suspended: false,
            },
        );
    }

    pub fn remove_process(&self, pid: u32) {
        self.state.lock().unwrap().processes.remove(&pid);
    }

    /// Make every privileged call against `pid` fail
    pub fn fail_calls_for(&self, pid: u32) {
        self.state.lock().unwrap().failing.insert(pid);
    }

    pub fn fail_spawns(&self) {
        self.state.lock().unwrap().spawn_fails = true;
    }

    pub fn set_used_memory_mb(&self, mb: u64) {
        self.state.lock().unwrap().used_memory_mb = mb;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn is_suspended(&self, pid: u32) -> bool {
        self.state
            .lock()
            .unwrap()
            .processes
            .get(&pid)
            .map(|p| p.suspended)
            .unwrap_or(false)
    }

    /// How many times the full process table was read
    pub fn table_queries(&self) -> usize {
        self.state.lock().unwrap().table_queries
    }

    fn privileged(&self, call: Call, pid: u32, apply: impl FnOnce(&mut FakeState)) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failing.contains(&pid) {
            anyhow::bail!("Access is denied (PID {})", pid);
        }
        if !state.processes.contains_key(&pid) {
            anyhow::bail!("No such process (PID {})", pid);
        }
        apply(&mut state);
        Ok(())
    }
}

impl ProcessControl for FakeProcessControl {
    fn processes(&self) -> Vec<ProcessInfo> {
        let mut state = self.state.lock().unwrap();
        state.table_queries += 1;
        state
            .processes
            .iter()
            .map(|(pid, p)| ProcessInfo {
                pid: *pid,
                name: p.name.clone(),
                cpu_percent: p.cpu_percent,
                memory_bytes: p.memory_bytes,
            })
            .collect()
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        self.privileged(Call::Terminate(pid), pid, |state| {
            state.processes.remove(&pid);
        })
    }

    fn suspend(&self, pid: u32) -> Result<()> {
        self.privileged(Call::Suspend(pid), pid, |state| {
            if let Some(p) = state.processes.get_mut(&pid) {
                p.suspended = true;
            }
        })
    }

    fn resume(&self, pid: u32) -> Result<()> {
        self.privileged(Call::Resume(pid), pid, |state| {
            if let Some(p) = state.processes.get_mut(&pid) {
                p.suspended = false;
            }
        })
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.state.lock().unwrap().processes.contains_key(&pid)
    }

    fn exe_path(&self, pid: u32) -> Option<PathBuf> {
        self.state
            .lock()
            .unwrap()
            .processes
            .get(&pid)
            .and_then(|p| p.exe.clone())
    }

    fn spawn(&self, path: &Path) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Spawn(path.to_path_buf()));
        if state.spawn_fails {
            anyhow::bail!("The system cannot find the file specified");
        }

        let pid = state.next_pid;
        state.next_pid += 1;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        state.processes.insert(
            pid,
            FakeProcess {
                name,
                exe: Some(path.to_path_buf()),
                cpu_percent: 0.0,
                memory_bytes: 0,
                suspended: false,
            },
        );
        Ok(pid)
    }

    fn used_memory_mb(&self) -> u64 {
        self.state.lock().unwrap().used_memory_mb
    }
}
