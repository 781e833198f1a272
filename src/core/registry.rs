//! Application registry - The ordered set of tracked entries and their selection

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::{ApplicationEntry, EntryId, SafetyLevel};
use super::history::HistoryLedger;
use super::settings::Settings;

/// A named selection of entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    /// Shortcut typed by the operator
    pub key: String,
    /// Entry names selected by this preset
    pub apps: Vec<String>,
}

/// Tracked entries in display order
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<ApplicationEntry>,
}

impl Registry {
    pub fn new(entries: Vec<ApplicationEntry>) -> Self {
        Self { entries }
    }

    /// Build from settings, classifying entries that have no safety level yet
    pub fn from_settings(settings: &Settings) -> Self {
        let entries = settings
            .apps
            .iter()
            .cloned()
            .map(|mut entry| {
                if entry.safety_level.is_none() {
                    entry.safety_level = Some(SafetyLevel::detect(&entry.targets, settings));
                }
                entry
            })
            .collect();
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ApplicationEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ApplicationEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ApplicationEntry> {
        self.entries.get_mut(index)
    }

    pub fn find_mut(&mut self, id: EntryId) -> Option<&mut ApplicationEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ApplicationEntry> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Flip selection of the entry at `index`, returning the new state
    pub fn toggle(&mut self, index: usize) -> Option<bool> {
        let entry = self.entries.get_mut(index)?;
        entry.selected = !entry.selected;
        Some(entry.selected)
    }

    pub fn select_all(&mut self) {
        self.entries.iter_mut().for_each(|e| e.selected = true);
    }

    pub fn deselect_all(&mut self) {
        self.entries.iter_mut().for_each(|e| e.selected = false);
    }

    pub fn selected(&self) -> impl Iterator<Item = &ApplicationEntry> {
        self.entries.iter().filter(|e| e.selected)
    }

    pub fn selected_count(&self) -> usize {
        self.selected().count()
    }

    /// Select exactly the entries named by `preset`. Returns how many matched.
    pub fn apply_preset(&mut self, preset: &Preset) -> usize {
        for name in &preset.apps {
            if self.find_by_name(name).is_none() {
                warn!("Preset '{}' names unknown app '{}'", preset.name, name);
            }
        }

        let mut matched = 0;
        for entry in &mut self.entries {
            entry.selected = preset
                .apps
                .iter()
                .any(|name| name.eq_ignore_ascii_case(&entry.name));
            if entry.selected {
                matched += 1;
            }
        }
        debug!("Preset '{}' selected {} entries", preset.name, matched);
        matched
    }
}

/// Registry and ledger, moved as one value into whichever batch or undo is active
#[derive(Debug)]
pub struct Workspace {
    pub registry: Registry,
    pub ledger: HistoryLedger,
}

impl Workspace {
    pub fn new(registry: Registry, ledger: HistoryLedger) -> Self {
        Self { registry, ledger }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Registry::from_settings(settings),
            HistoryLedger::new(settings.history_max),
        )
    }
}
