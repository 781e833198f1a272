//! Kill, suspend, resume, and restore controllers

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::entry::{ApplicationEntry, EntryStatus, TargetList};
use super::error::OperationError;
use super::guard::ProtectionGuard;
use super::operation::{OperationKind, StepOutcome};
use super::process::{resolve, same_executable, ProcessControl};

/// Tally of one resume pass over a tracked-id set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub resumed: usize,
    /// Ids discarded because they exited or were reassigned
    pub invalid: usize,
    /// Text of the last failed resume call
    pub last_error: Option<String>,
}

impl ResumeReport {
    pub fn is_partial(&self) -> bool {
        self.resumed > 0 && self.invalid > 0
    }

    /// Mixed result as an error value, for callers that only report failures
    pub fn partial_failure(&self) -> Option<OperationError> {
        self.is_partial().then_some(OperationError::PartialFailure {
            resumed: self.resumed,
            invalid: self.invalid,
        })
    }

    pub fn into_outcome(self) -> StepOutcome {
        if self.resumed > 0 {
            return StepOutcome::Resumed {
                resumed: self.resumed,
                invalid: self.invalid,
            };
        }

        let err = match (self.last_error, self.invalid) {
            (Some(text), _) => OperationError::Os(text),
            (None, 0) => OperationError::NotFound,
            (None, count) => OperationError::StaleReference { count },
        };
        StepOutcome::Failed(err)
    }
}

/// The per-kind controllers, sharing one process capability and guard
pub struct Controllers {
    control: Arc<dyn ProcessControl>,
    guard: ProtectionGuard,
}

impl Controllers {
    pub fn new(control: Arc<dyn ProcessControl>, guard: ProtectionGuard) -> Self {
        Self { control, guard }
    }

    pub fn control(&self) -> &dyn ProcessControl {
        self.control.as_ref()
    }

    pub fn guard(&self) -> &ProtectionGuard {
        &self.guard
    }

    /// Terminate every process matching `targets`.
    ///
    /// Succeeds if at least one was terminated. Zero matches is `NotFound`;
    /// matches that all failed return the last OS error.
    pub fn kill(&self, targets: &TargetList) -> Result<usize, OperationError> {
        let matches = resolve(self.control(), targets);
        if matches.is_empty() {
            return Err(OperationError::NotFound);
        }

        let mut killed = 0;
        let mut last_error = None;
        for process in &matches {
            match self.control.terminate(process.pid) {
                Ok(()) => killed += 1,
                Err(e) => {
                    warn!("Failed to terminate {} ({}): {}", process.name, process.pid, e);
                    last_error = Some(e);
                }
            }
        }

        match (killed, last_error) {
            (0, Some(e)) => Err(OperationError::os(e)),
            (0, None) => Err(OperationError::NotFound),
            (n, _) => Ok(n),
        }
    }

    /// Pause every process matching `targets`, adding each paused id to `tracked`
    pub fn suspend(
        &self,
        targets: &TargetList,
        tracked: &mut BTreeSet<u32>,
    ) -> Result<usize, OperationError> {
        let matches = resolve(self.control(), targets);
        if matches.is_empty() {
            return Err(OperationError::NotFound);
        }

        let mut suspended = 0;
        let mut last_error = None;
        for process in &matches {
            match self.control.suspend(process.pid) {
                Ok(()) => {
                    tracked.insert(process.pid);
                    suspended += 1;
                }
                Err(e) => {
                    warn!("Failed to suspend {} ({}): {}", process.name, process.pid, e);
                    last_error = Some(e);
                }
            }
        }

        match (suspended, last_error) {
            (0, Some(e)) => Err(OperationError::os(e)),
            (0, None) => Err(OperationError::NotFound),
            (n, _) => Ok(n),
        }
    }

    /// Resume the ids in `tracked`.
    ///
    /// Works from the tracked ids rather than a fresh name scan. Each id must
    /// still be alive and, when `exec_path` is known, still run that
    /// executable; otherwise it is discarded without a resume call. Resumed
    /// and discarded ids leave the set; ids whose resume call failed stay.
    pub fn resume(&self, tracked: &mut BTreeSet<u32>, exec_path: Option<&Path>) -> ResumeReport {
        let mut report = ResumeReport::default();

        let pids: Vec<u32> = tracked.iter().copied().collect();
        for pid in pids {
            if !self.control.is_alive(pid) {
                debug!("Tracked PID {} has exited", pid);
                tracked.remove(&pid);
                report.invalid += 1;
                continue;
            }

            if let Some(expected) = exec_path {
                if let Some(live) = self.control.exe_path(pid) {
                    if !same_executable(&live, expected) {
                        warn!(
                            "PID {} now runs {:?}, expected {:?}; discarding",
                            pid, live, expected
                        );
                        tracked.remove(&pid);
                        report.invalid += 1;
                        continue;
                    }
                }
            }

            match self.control.resume(pid) {
                Ok(()) => {
                    tracked.remove(&pid);
                    report.resumed += 1;
                }
                Err(e) => {
                    warn!("Failed to resume PID {}: {}", pid, e);
                    report.last_error = Some(e.to_string());
                }
            }
        }

        report
    }

    /// Launch a new instance. `Ok(None)` means there was no path to launch.
    pub fn restore(&self, exec_path: Option<&Path>) -> Result<Option<u32>, OperationError> {
        let Some(path) = exec_path else {
            return Ok(None);
        };

        self.control
            .spawn(path)
            .map(Some)
            .map_err(|e| OperationError::Spawn(format!("{:#}", e)))
    }

    /// Run one kind against one entry: guard first, then the controller
    pub fn execute(&self, kind: OperationKind, entry: &mut ApplicationEntry) -> StepOutcome {
        if let Err(e) = self.guard.check(kind, &entry.targets) {
            info!("{} blocked for '{}': {}", kind, entry.name, e);
            return StepOutcome::Protected;
        }

        let outcome = match kind {
            OperationKind::Kill => match self.kill(&entry.targets) {
                Ok(count) => StepOutcome::Terminated { count },
                Err(e) => StepOutcome::Failed(e),
            },
            OperationKind::Suspend => {
                let targets = entry.targets.clone();
                match self.suspend(&targets, entry.tracked_pids_mut()) {
                    Ok(count) => StepOutcome::Suspended { count },
                    Err(e) => StepOutcome::Failed(e),
                }
            }
            OperationKind::Resume => {
                let exec_path = entry.exec_path.clone();
                let report = self.resume(entry.tracked_pids_mut(), exec_path.as_deref());
                if let Some(e) = report.partial_failure() {
                    warn!("Resume '{}': {}", entry.name, e);
                }
                report.into_outcome()
            }
            OperationKind::Restore => match self.restore(entry.exec_path()) {
                Ok(Some(pid)) => StepOutcome::Launched { pid },
                Ok(None) => StepOutcome::NoExecutable,
                Err(e) => StepOutcome::Failed(e),
            },
        };

        info!("{} '{}': {:?}", kind, entry.name, outcome);
        outcome
    }

    /// Suspended if any tracked id is alive, running if a target matches
    pub fn status(&self, entry: &ApplicationEntry) -> EntryStatus {
        if entry.is_suspended() {
            return if entry
                .tracked_pids()
                .iter()
                .any(|pid| self.control.is_alive(*pid))
            {
                EntryStatus::Suspended
            } else {
                EntryStatus::NotFound
            };
        }

        if resolve(self.control(), &entry.targets).is_empty() {
            EntryStatus::NotFound
        } else {
            EntryStatus::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{Call, FakeProcessControl};

    fn controllers(fake: &Arc<FakeProcessControl>, excluded: &[&str]) -> Controllers {
        Controllers::new(fake.clone(), ProtectionGuard::new(excluded.iter().copied()))
    }

    #[test]
    fn test_kill_without_matches_is_not_found() {
        let fake = Arc::new(FakeProcessControl::new().with_process(1, "init", None));
        let ctl = controllers(&fake, &[]);

        assert_eq!(
            ctl.kill(&TargetList::parse("Foo.exe")),
            Err(OperationError::NotFound)
        );
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_kill_succeeds_despite_partial_failure() {
        let fake = Arc::new(
            FakeProcessControl::new()
                .with_process(10, "chrome.exe", None)
                .with_process(11, "chrome.exe", None),
        );
        fake.fail_calls_for(10);
        let ctl = controllers(&fake, &[]);

        assert_eq!(ctl.kill(&TargetList::parse("chrome.exe")), Ok(1));
        assert!(fake.is_alive(10));
        assert!(!fake.is_alive(11));
    }

    #[test]
    fn test_kill_all_failing_returns_last_os_error() {
        let fake = Arc::new(FakeProcessControl::new().with_process(10, "chrome.exe", None));
        fake.fail_calls_for(10);
        let ctl = controllers(&fake, &[]);

        match ctl.kill(&TargetList::parse("chrome.exe")) {
            Err(OperationError::Os(text)) => assert!(text.contains("Access is denied")),
            other => panic!("expected OS error, got {:?}", other),
        }
    }

    #[test]
    fn test_suspend_tracks_every_paused_id() {
        let fake = Arc::new(
            FakeProcessControl::new()
                .with_process(20, "Discord.exe", None)
                .with_process(21, "discord.exe", None)
                .with_process(22, "other.exe", None),
        );
        let ctl = controllers(&fake, &[]);
        let mut tracked = BTreeSet::from([7]);

        assert_eq!(ctl.suspend(&TargetList::parse("Discord.exe"), &mut tracked), Ok(2));
        assert_eq!(tracked, BTreeSet::from([7, 20, 21]));
        assert!(fake.is_suspended(20));
        assert!(!fake.is_suspended(22));
    }

    #[test]
    fn test_suspend_failure_leaves_set_untouched() {
        let fake = Arc::new(FakeProcessControl::new().with_process(20, "Discord.exe", None));
        fake.fail_calls_for(20);
        let ctl = controllers(&fake, &[]);
        let mut tracked = BTreeSet::new();

        assert!(matches!(
            ctl.suspend(&TargetList::parse("Discord.exe"), &mut tracked),
            Err(OperationError::Os(_))
        ));
        assert!(tracked.is_empty());
    }

    #[test]
    fn test_suspend_resume_round_trip() {
        let fake = Arc::new(FakeProcessControl::new().with_process(
            4321,
            "Foo.exe",
            Some("C:\\Apps\\Foo.exe"),
        ));
        let ctl = controllers(&fake, &[]);
        let mut entry = ApplicationEntry::new("Foo", "Foo.exe").with_exec_path("C:\\Apps\\Foo.exe");

        assert_eq!(
            ctl.execute(OperationKind::Suspend, &mut entry),
            StepOutcome::Suspended { count: 1 }
        );
        assert_eq!(entry.tracked_pids(), &BTreeSet::from([4321]));

        let report = ctl.resume(entry.tracked_pids_mut(), Some(Path::new("C:\\Apps\\Foo.exe")));
        assert_eq!(report.resumed, 1);
        assert_eq!(report.invalid, 0);
        assert_eq!(report.partial_failure(), None);
        assert!(entry.tracked_pids().is_empty());
        assert!(!fake.is_suspended(4321));
    }

    #[test]
    fn test_resume_discards_reused_id_without_calling_os() {
        let fake = Arc::new(FakeProcessControl::new().with_process(
            4321,
            "Foo.exe",
            Some("C:\\Apps\\Foo.exe"),
        ));
        let ctl = controllers(&fake, &[]);
        let mut entry = ApplicationEntry::new("Foo", "Foo.exe").with_exec_path("C:\\Apps\\Foo.exe");
        ctl.execute(OperationKind::Suspend, &mut entry);

        // Original exits; the id is handed to an unrelated program
        fake.remove_process(4321);
        fake.add_process(4321, "Other.exe", Some("C:\\Other\\Other.exe"));

        let outcome = ctl.execute(OperationKind::Resume, &mut entry);
        assert_eq!(
            outcome,
            StepOutcome::Failed(OperationError::StaleReference { count: 1 })
        );
        assert!(entry.tracked_pids().is_empty());
        assert!(!fake.calls().contains(&Call::Resume(4321)));
    }

    #[test]
    fn test_resume_partial_success() {
        let fake = Arc::new(
            FakeProcessControl::new()
                .with_process(1, "a.exe", None)
                .with_process(2, "a.exe", None),
        );
        let ctl = controllers(&fake, &[]);
        let mut tracked = BTreeSet::from([1, 2, 3]);

        let report = ctl.resume(&mut tracked, None);
        assert_eq!(report.resumed, 2);
        assert_eq!(report.invalid, 1);
        assert!(report.is_partial());
        assert_eq!(
            report.partial_failure(),
            Some(OperationError::PartialFailure {
                resumed: 2,
                invalid: 1
            })
        );
        assert!(tracked.is_empty());
    }

    #[test]
    fn test_resume_with_nothing_tracked_is_not_found() {
        let fake = Arc::new(FakeProcessControl::new());
        let ctl = controllers(&fake, &[]);
        let mut entry = ApplicationEntry::new("Foo", "Foo.exe");

        assert_eq!(
            ctl.execute(OperationKind::Resume, &mut entry),
            StepOutcome::Failed(OperationError::NotFound)
        );
    }

    #[test]
    fn test_failed_resume_keeps_id_tracked() {
        let fake = Arc::new(FakeProcessControl::new().with_process(5, "a.exe", None));
        fake.fail_calls_for(5);
        let ctl = controllers(&fake, &[]);
        let mut tracked = BTreeSet::from([5]);

        let outcome = ctl.resume(&mut tracked, None).into_outcome();
        assert!(matches!(outcome, StepOutcome::Failed(OperationError::Os(_))));
        assert_eq!(tracked, BTreeSet::from([5]));
    }

    #[test]
    fn test_restore_without_path_is_a_skip() {
        let fake = Arc::new(FakeProcessControl::new());
        let ctl = controllers(&fake, &[]);
        let mut entry = ApplicationEntry::new("Foo", "Foo.exe");

        assert_eq!(
            ctl.execute(OperationKind::Restore, &mut entry),
            StepOutcome::NoExecutable
        );
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_restore_leaves_tracked_ids_alone() {
        let fake = Arc::new(FakeProcessControl::new());
        let ctl = controllers(&fake, &[]);
        let mut entry = ApplicationEntry::new("Foo", "Foo.exe").with_exec_path("/opt/foo/Foo.exe");
        entry.tracked_pids_mut().insert(99);

        let outcome = ctl.execute(OperationKind::Restore, &mut entry);
        assert!(matches!(outcome, StepOutcome::Launched { .. }));
        assert_eq!(entry.tracked_pids(), &BTreeSet::from([99]));
    }

    #[test]
    fn test_restore_spawn_failure_is_reported() {
        let fake = Arc::new(FakeProcessControl::new());
        fake.fail_spawns();
        let ctl = controllers(&fake, &[]);
        let mut entry = ApplicationEntry::new("Foo", "Foo.exe").with_exec_path("/missing/Foo");

        assert!(matches!(
            ctl.execute(OperationKind::Restore, &mut entry),
            StepOutcome::Failed(OperationError::Spawn(_))
        ));
    }

    #[test]
    fn test_protected_entry_never_reaches_os() {
        let fake = Arc::new(FakeProcessControl::new().with_process(4, "explorer.exe", None));
        let ctl = controllers(&fake, &["Explorer.exe"]);
        let mut entry = ApplicationEntry::new("Shell", "EXPLORER.EXE");

        assert_eq!(ctl.execute(OperationKind::Kill, &mut entry), StepOutcome::Protected);
        assert_eq!(ctl.execute(OperationKind::Suspend, &mut entry), StepOutcome::Protected);
        assert!(fake.calls().is_empty());
        assert!(fake.is_alive(4));
    }

    #[test]
    fn test_guard_does_not_apply_to_revival() {
        let fake = Arc::new(FakeProcessControl::new().with_process(4, "explorer.exe", None));
        let ctl = controllers(&fake, &["explorer.exe"]);
        let mut entry = ApplicationEntry::new("Shell", "explorer.exe");
        entry.tracked_pids_mut().insert(4);

        assert_eq!(
            ctl.execute(OperationKind::Resume, &mut entry),
            StepOutcome::Resumed {
                resumed: 1,
                invalid: 0
            }
        );
    }

    #[test]
    fn test_status() {
        let fake = Arc::new(FakeProcessControl::new().with_process(8, "Spotify.exe", None));
        let ctl = controllers(&fake, &[]);
        let mut entry = ApplicationEntry::new("Spotify", "spotify.exe");

        assert_eq!(ctl.status(&entry), EntryStatus::Running);
        entry.tracked_pids_mut().insert(8);
        assert_eq!(ctl.status(&entry), EntryStatus::Suspended);
        fake.remove_process(8);
        assert_eq!(ctl.status(&entry), EntryStatus::NotFound);
    }
}
