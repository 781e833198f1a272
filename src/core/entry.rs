//! Application entries - A tracked application and the processes it maps to

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::settings::Settings;

/// Unique identifier for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered list of OS process names an entry maps to.
///
/// Parsed once from the comma-joined form used in configuration files.
/// Serializes back to that same form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TargetList(Vec<String>);

impl TargetList {
    /// Split on commas, trim, and drop empty names
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Case-insensitive exact match against any target
    pub fn matches(&self, process_name: &str) -> bool {
        self.0.iter().any(|t| t.eq_ignore_ascii_case(process_name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

}

impl From<String> for TargetList {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for TargetList {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<TargetList> for String {
    fn from(list: TargetList) -> Self {
        list.to_string()
    }
}

impl std::fmt::Display for TargetList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}

/// How risky it is to act on an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    /// On the exclusion list; kill and suspend are refused
    Protected,
    /// Known to be harmless to terminate
    Safe,
    /// Unknown or system-adjacent
    Caution,
}

impl SafetyLevel {
    /// Classify a set of targets against the configured lists
    pub fn detect(targets: &TargetList, settings: &Settings) -> Self {
        if targets.iter().any(|t| {
            settings
                .exclusion_list
                .iter()
                .any(|p| p.eq_ignore_ascii_case(t))
        }) {
            return Self::Protected;
        }

        if targets
            .iter()
            .any(|t| settings.safe_to_kill.all().any(|s| s.eq_ignore_ascii_case(t)))
        {
            return Self::Safe;
        }

        Self::Caution
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Protected => "protected",
            Self::Safe => "safe",
            Self::Caution => "caution",
        }
    }
}

/// Live state of an entry as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Running,
    Suspended,
    NotFound,
}

impl EntryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::NotFound => "not found",
        }
    }
}

/// A user-configured application tracked by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationEntry {
    #[serde(skip)]
    pub id: EntryId,
    /// Display name
    pub name: String,
    /// Process names this entry maps to
    #[serde(rename = "process_name")]
    pub targets: TargetList,
    /// Executable used for restore and for id-reuse checks on resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_path: Option<PathBuf>,
    #[serde(default)]
    pub selected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_level: Option<SafetyLevel>,
    /// Process ids suspended by the engine and not yet resumed
    #[serde(skip)]
    tracked_pids: BTreeSet<u32>,
}

impl ApplicationEntry {
    pub fn exec_path(&self) -> Option<&Path> {
        self.exec_path.as_deref()
    }

    /// The engine considers this entry suspended while it tracks any id
    pub fn is_suspended(&self) -> bool {
        !self.tracked_pids.is_empty()
    }

    pub fn tracked_pids(&self) -> &BTreeSet<u32> {
        &self.tracked_pids
    }

    pub fn tracked_pids_mut(&mut self) -> &mut BTreeSet<u32> {
        &mut self.tracked_pids
    }

    /// Safety level, falling back to caution when unclassified
    pub fn safety(&self) -> SafetyLevel {
        self.safety_level.unwrap_or(SafetyLevel::Caution)
    }
}

#[cfg(test)]
impl ApplicationEntry {
    pub fn new(name: impl Into<String>, targets: impl Into<TargetList>) -> Self {
        Self {
            id: EntryId::new(),
            name: name.into(),
            targets: targets.into(),
            exec_path: None,
            selected: false,
            safety_level: None,
            tracked_pids: BTreeSet::new(),
        }
    }

    pub fn with_exec_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.exec_path = Some(path.into());
        self
    }

    pub fn with_selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }
}
