//! Application state - Owns the workspace between operations and dispatches work

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use super::controllers::Controllers;
use super::entry::{EntryStatus, TargetList};
use super::guard::ProtectionGuard;
use super::monitor::{ProcessStats, StatsCache};
use super::operation::OperationKind;
use super::process::{ProcessControl, SystemProcessControl};
use super::registry::Workspace;
use super::runner::{self, OperationHandle, RunnerEvent, Timing};
use super::sequencer::{BatchSummary, Sequencer, SequencerError, SequencerState};
use super::settings::Settings;
use super::undo::UndoReport;

/// Front-end view of a runner event
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    CountdownTick(u32),
    Step { line: Option<String>, progress: f32 },
    Finished(BatchSummary),
    Cancelled,
    UndoFinished(UndoReport),
    Aborted(String),
}

/// Workspace and sequencer while no operation holds them
struct Ready {
    sequencer: Sequencer,
    workspace: Workspace,
}

/// Central application state
pub struct AppState {
    settings: Settings,
    settings_path: PathBuf,
    controllers: Arc<Controllers>,
    stats: StatsCache,
    ready: Option<Ready>,
    running: Option<OperationHandle>,
    /// Log of the last finished batch, kept until the next one starts
    last_log: Vec<String>,
}

impl AppState {
    /// Load settings from `settings_path` and wire up the live process table
    pub fn load(settings_path: &Path) -> Result<Self> {
        let settings = Settings::load_or_create(settings_path)
            .with_context(|| format!("Failed to load settings from {:?}", settings_path))?;
        Ok(Self::new(
            settings,
            settings_path.to_path_buf(),
            Arc::new(SystemProcessControl::new()),
        ))
    }

    pub fn new(settings: Settings, settings_path: PathBuf, control: Arc<dyn ProcessControl>) -> Self {
        let guard = ProtectionGuard::new(&settings.exclusion_list);
        let stats = StatsCache::new(
            control.clone(),
            Duration::from_millis(settings.stats_ttl_ms),
        );
        let controllers = Arc::new(Controllers::new(control, guard));
        let ready = Ready {
            sequencer: Sequencer::new(settings.countdown_secs),
            workspace: Workspace::from_settings(&settings),
        };

        info!(
            "Tracking {} apps, {} protected names",
            ready.workspace.registry.len(),
            controllers.guard().len()
        );

        Self {
            settings,
            settings_path,
            controllers,
            stats,
            ready: Some(ready),
            running: None,
            last_log: Vec::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub fn is_busy(&self) -> bool {
        self.running.is_some()
    }

    /// The workspace, unless an operation currently holds it
    pub fn workspace(&self) -> Option<&Workspace> {
        self.ready.as_ref().map(|r| &r.workspace)
    }

    pub fn workspace_mut(&mut self) -> Option<&mut Workspace> {
        self.ready.as_mut().map(|r| &mut r.workspace)
    }

    /// Log lines of the last finished batch
    pub fn last_log(&self) -> &[String] {
        &self.last_log
    }

    /// Select the entries named by the preset with `key`
    pub fn apply_preset(&mut self, key: &str) -> Result<usize> {
        let preset = self
            .settings
            .presets
            .iter()
            .find(|p| p.key.eq_ignore_ascii_case(key) || p.name.eq_ignore_ascii_case(key))
            .cloned()
            .with_context(|| format!("No preset '{}'", key))?;
        let workspace = self.workspace_mut().context(SequencerError::Busy)?;
        Ok(workspace.registry.apply_preset(&preset))
    }

    /// Begin the countdown for a batch of `kind`
    pub fn start(&mut self, kind: OperationKind) -> Result<()> {
        if self.running.is_some() {
            return Err(SequencerError::Busy.into());
        }
        let Some(Ready {
            mut sequencer,
            workspace,
        }) = self.ready.take()
        else {
            return Err(SequencerError::Busy.into());
        };

        // A finished batch must be acknowledged before the next one
        let begun = match sequencer.state() {
            SequencerState::Done { .. } => sequencer
                .acknowledge()
                .and_then(|()| sequencer.begin(kind)),
            _ => sequencer.begin(kind),
        };
        if let Err(e) = begun {
            self.ready = Some(Ready {
                sequencer,
                workspace,
            });
            return Err(e.into());
        }

        self.last_log.clear();
        self.running = Some(runner::spawn_batch(
            sequencer,
            workspace,
            self.controllers.clone(),
            Timing::new(self.settings.step_delay_ms),
        ));
        Ok(())
    }

    /// Cancel a batch still in its countdown. False once processing has
    /// started or when nothing is running.
    pub fn cancel(&self) -> bool {
        self.running
            .as_ref()
            .map(OperationHandle::cancel)
            .unwrap_or(false)
    }

    /// Invert the most recent batch
    pub fn undo(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(SequencerError::Busy.into());
        }
        let Some(Ready { workspace, .. }) = self.ready.take() else {
            return Err(SequencerError::Busy.into());
        };

        self.last_log.clear();
        self.running = Some(runner::spawn_undo(workspace, self.controllers.clone()));
        Ok(())
    }

    /// Wait for the next event of the running operation.
    ///
    /// Returns `None` when nothing is running. The final event puts the
    /// workspace back.
    pub async fn next_update(&mut self) -> Option<Update> {
        let handle = self.running.as_mut()?;
        let Some(event) = handle.events.recv().await else {
            self.recover("worker exited without reporting");
            return Some(Update::Aborted("worker exited without reporting".to_string()));
        };

        let update = match event {
            RunnerEvent::CountdownTick(n) => Update::CountdownTick(n),
            RunnerEvent::Step(report) => Update::Step {
                line: report.line.map(|l| l.to_string()),
                progress: report.progress,
            },
            RunnerEvent::BatchFinished {
                workspace,
                sequencer,
                summary,
            } => {
                self.last_log = sequencer.log().to_vec();
                self.finish(sequencer, workspace);
                Update::Finished(summary)
            }
            RunnerEvent::Cancelled {
                workspace,
                sequencer,
            } => {
                self.finish(sequencer, workspace);
                Update::Cancelled
            }
            RunnerEvent::UndoFinished { workspace, report } => {
                self.finish(Sequencer::new(self.settings.countdown_secs), workspace);
                Update::UndoFinished(report)
            }
            RunnerEvent::Aborted { reason, workspace } => {
                match workspace {
                    Some(workspace) => {
                        self.finish(Sequencer::new(self.settings.countdown_secs), workspace)
                    }
                    None => self.recover(&reason),
                }
                Update::Aborted(reason)
            }
        };
        Some(update)
    }

    /// Live status of the entry at `index`
    pub fn status(&self, index: usize) -> Option<EntryStatus> {
        let entry = self.workspace()?.registry.get(index)?;
        Some(self.controllers.status(entry))
    }

    pub fn stats(&self, targets: &TargetList) -> ProcessStats {
        self.stats.get(targets)
    }

    /// Write the registry (selection included) back to the settings file
    pub fn save(&mut self) -> Result<()> {
        if let Some(workspace) = self.workspace() {
            self.settings.apps = workspace.registry.entries().to_vec();
        } else {
            warn!("Saving while an operation holds the registry; apps keep their last saved state");
        }
        self.settings
            .save(&self.settings_path)
            .with_context(|| format!("Failed to save settings to {:?}", self.settings_path))
    }

    fn finish(&mut self, sequencer: Sequencer, workspace: Workspace) {
        self.running = None;
        self.ready = Some(Ready {
            sequencer,
            workspace,
        });
    }

    /// Rebuild the workspace from settings after its holder died
    fn recover(&mut self, reason: &str) {
        error!("Operation lost the workspace ({}); reloading from settings", reason);
        self.finish(
            Sequencer::new(self.settings.countdown_secs),
            Workspace::from_settings(&self.settings),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entry::ApplicationEntry;
    use crate::core::registry::Preset;
    use crate::core::testing::FakeProcessControl;

    fn state(fake: &Arc<FakeProcessControl>, dir: &Path) -> AppState {
        let mut settings = Settings::default();
        settings.countdown_secs = 2;
        settings.apps = vec![
            ApplicationEntry::new("Discord", "Discord.exe").with_selected(true),
            ApplicationEntry::new("Shell", "explorer.exe").with_selected(true),
        ];
        settings.presets = vec![Preset {
            name: "Gaming".to_string(),
            key: "g".to_string(),
            apps: vec!["shell".to_string()],
        }];
        AppState::new(settings, dir.join("settings.json"), fake.clone())
    }

    async fn run_to_end(state: &mut AppState) -> Vec<Update> {
        let mut updates = Vec::new();
        while let Some(update) = state.next_update().await {
            updates.push(update);
        }
        updates
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_then_undo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeProcessControl::new().with_process(
            12,
            "Discord.exe",
            Some("/opt/discord/Discord.exe"),
        ));
        let mut state = state(&fake, dir.path());
        state.workspace_mut().unwrap().registry.get_mut(0).unwrap().exec_path =
            Some("/opt/discord/Discord.exe".into());

        state.start(OperationKind::Kill).unwrap();
        assert!(state.workspace().is_none());
        assert!(state.start(OperationKind::Kill).is_err());

        let updates = run_to_end(&mut state).await;
        assert_eq!(updates[0], Update::CountdownTick(2));
        assert!(matches!(updates.last(), Some(Update::Finished(s)) if s.succeeded == 1));
        assert!(!fake.is_alive(12));
        assert_eq!(state.last_log()[1], "[PROTECTED] Shell cannot be modified");
        assert_eq!(state.workspace().unwrap().ledger.len(), 1);

        state.undo().unwrap();
        let updates = run_to_end(&mut state).await;
        match updates.as_slice() {
            [Update::UndoFinished(report)] => {
                assert_eq!(report.summary(), "Undo complete: 1 succeeded, 0 failed")
            }
            other => panic!("unexpected updates {:?}", other),
        }
        assert!(state.workspace().unwrap().ledger.is_empty());
        assert!(fake
            .processes()
            .iter()
            .any(|p| p.name == "Discord.exe" && p.pid >= 50_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_workspace_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeProcessControl::new().with_process(12, "Discord.exe", None));
        let mut state = state(&fake, dir.path());

        state.start(OperationKind::Suspend).unwrap();
        assert_eq!(state.next_update().await, Some(Update::CountdownTick(2)));
        assert!(state.cancel());
        assert_eq!(state.next_update().await, Some(Update::Cancelled));
        assert_eq!(state.next_update().await, None);

        assert!(fake.calls().is_empty());
        assert!(state.workspace().unwrap().ledger.is_empty());
        assert!(!state.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_is_not_cancellable() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeProcessControl::new().with_process(12, "Discord.exe", None));
        let mut state = state(&fake, dir.path());

        state.start(OperationKind::Kill).unwrap();
        loop {
            match state.next_update().await {
                Some(Update::CountdownTick(_)) => {}
                Some(Update::Step { .. }) => break,
                other => panic!("expected a step, got {:?}", other),
            }
        }
        assert!(!state.cancel());

        let updates = run_to_end(&mut state).await;
        assert!(matches!(updates.last(), Some(Update::Finished(s)) if s.succeeded == 1));
        assert!(!fake.is_alive(12));
        assert_eq!(state.workspace().unwrap().ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_finished_batch() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeProcessControl::new().with_process(12, "Discord.exe", None));
        let mut state = state(&fake, dir.path());

        state.start(OperationKind::Suspend).unwrap();
        run_to_end(&mut state).await;
        assert!(!state.last_log().is_empty());

        // The finished sequencer is acknowledged on the way into the next batch
        state.start(OperationKind::Resume).unwrap();
        assert!(state.last_log().is_empty());
        let updates = run_to_end(&mut state).await;
        assert!(matches!(updates.last(), Some(Update::Finished(s)) if s.succeeded == 1));
        assert_eq!(state.workspace().unwrap().ledger.len(), 2);
        assert!(!fake.is_suspended(12));
    }

    #[test]
    fn test_preset_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeProcessControl::new());
        let mut state = state(&fake, dir.path());

        assert_eq!(state.apply_preset("G").unwrap(), 1);
        assert!(state.apply_preset("missing").is_err());
        state.save().unwrap();

        let reloaded = Settings::load_or_create(&dir.path().join("settings.json")).unwrap();
        let selected: Vec<_> = reloaded
            .apps
            .iter()
            .filter(|a| a.selected)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(selected, vec!["Shell"]);
    }

    #[test]
    fn test_status_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(
            FakeProcessControl::new()
                .with_process(12, "Discord.exe", None)
                .with_stats(12, 3.0, 256),
        );
        let state = state(&fake, dir.path());

        assert_eq!(state.status(0), Some(EntryStatus::Running));
        assert_eq!(state.status(1), Some(EntryStatus::NotFound));
        assert_eq!(state.status(9), None);
        assert_eq!(state.stats(&TargetList::parse("Discord.exe")).ram_mb, 256);
    }
}
