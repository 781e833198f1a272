//! Application settings management

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::entry::ApplicationEntry;
use super::registry::Preset;

/// Processes the engine refuses to kill or suspend unless the user edits the list
pub const DEFAULT_EXCLUSION_LIST: &[&str] = &[
    // Critical Windows processes
    "System",
    "Registry",
    "smss.exe",
    "csrss.exe",
    "wininit.exe",
    "services.exe",
    "lsass.exe",
    "svchost.exe",
    "winlogon.exe",
    "dwm.exe",
    "explorer.exe",
    "sihost.exe",
    "taskhostw.exe",
    "RuntimeBroker.exe",
    "StartMenuExperienceHost.exe",
    // Security & system
    "MsMpEng.exe",
    "SecurityHealthService.exe",
    "SgrmBroker.exe",
    "audiodg.exe",
    "fontdrvhost.exe",
    "spoolsv.exe",
    "SearchIndexer.exe",
    "dllhost.exe",
    "conhost.exe",
    "ctfmon.exe",
    "taskmgr.exe",
    "SystemSettings.exe",
    // Unix
    "init",
    "systemd",
    "launchd",
    "kernel_task",
    "WindowServer",
];

/// Lists of processes known to be harmless to terminate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeToKill {
    pub bloatware: Vec<String>,
    pub chat_apps: Vec<String>,
    pub game_launchers: Vec<String>,
    pub utilities: Vec<String>,
}

impl SafeToKill {
    /// Every name across all categories
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.bloatware
            .iter()
            .chain(&self.chat_apps)
            .chain(&self.game_launchers)
            .chain(&self.utilities)
    }

    pub fn is_empty(&self) -> bool {
        self.all().next().is_none()
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl Default for SafeToKill {
    fn default() -> Self {
        Self {
            bloatware: owned(&[
                "OneDrive.exe",
                "OneDriveSetup.exe",
                "msedge.exe",
                "MicrosoftEdgeUpdate.exe",
                "WidgetService.exe",
                "GameBarPresenceWriter.exe",
                "YourPhone.exe",
                "PhoneExperienceHost.exe",
                "cortana.exe",
                "SearchApp.exe",
                "TextInputHost.exe",
            ]),
            chat_apps: owned(&[
                "Discord.exe",
                "Slack.exe",
                "Teams.exe",
                "Zoom.exe",
                "Skype.exe",
                "WhatsApp.exe",
                "Telegram.exe",
                "msteams.exe",
            ]),
            game_launchers: owned(&[
                "Steam.exe",
                "EpicGamesLauncher.exe",
                "Battle.net.exe",
                "RiotClientServices.exe",
                "upc.exe",
                "Origin.exe",
                "GalaxyClient.exe",
                "Rockstar Games Launcher.exe",
            ]),
            utilities: owned(&[
                "Spotify.exe",
                "SpotifyWebHelper.exe",
                "iTunes.exe",
                "AppleMobileDeviceService.exe",
                "CCXProcess.exe",
                "Creative Cloud.exe",
                "AdobeNotificationClient.exe",
                "NVIDIA Share.exe",
                "nvcontainer.exe",
                "GeForceExperience.exe",
                "RadeonSoftware.exe",
                "LightingService.exe",
                "iCUE.exe",
                "RzSDKService.exe",
            ]),
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Sequencing
    /// Countdown ticks (seconds) before a batch starts processing
    pub countdown_secs: u32,
    /// Delay between two entries of a batch (ms)
    pub step_delay_ms: u64,

    // Caching & history
    /// Stats cache time-to-live (ms)
    pub stats_ttl_ms: u64,
    /// Maximum number of operations kept for undo
    pub history_max: usize,

    // Protection
    /// Process names that are never killed or suspended
    pub exclusion_list: Vec<String>,
    /// Known-safe processes, used for safety classification
    pub safe_to_kill: SafeToKill,

    // Tracked applications
    pub apps: Vec<ApplicationEntry>,
    pub presets: Vec<Preset>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            countdown_secs: 5,
            step_delay_ms: 300,

            stats_ttl_ms: 2000,
            history_max: 50,

            exclusion_list: owned(DEFAULT_EXCLUSION_LIST),
            safe_to_kill: SafeToKill::default(),

            apps: Vec::new(),
            presets: Vec::new(),
        }
    }
}

impl Settings {
    /// Default location of the settings file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("SceneShift")
            .join("settings.json")
    }

    /// Load settings from `path`, writing defaults there if the file is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No settings at {:?}, writing defaults", path);
            let settings = Self::default();
            settings.save(path)?;
            return Ok(settings);
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        let mut settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings at {:?}", path))?;

        if settings.migrate() {
            info!("Migrated settings at {:?}", path);
            if let Err(e) = settings.save(path) {
                warn!("Failed to write migrated settings: {}", e);
            }
        }
        settings.validate();

        info!(
            "Loaded {} apps and {} presets from {:?}",
            settings.apps.len(),
            settings.presets.len(),
            path
        );
        Ok(settings)
    }

    /// Write settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Fill in lists and classifications missing from older settings files.
    /// Returns true if anything changed.
    pub fn migrate(&mut self) -> bool {
        let mut migrated = false;

        if self.exclusion_list.is_empty() {
            self.exclusion_list = owned(DEFAULT_EXCLUSION_LIST);
            migrated = true;
        }

        if self.safe_to_kill.is_empty() {
            self.safe_to_kill = SafeToKill::default();
            migrated = true;
        }

        let detected: Vec<_> = self
            .apps
            .iter()
            .map(|app| {
                app.safety_level
                    .is_none()
                    .then(|| super::entry::SafetyLevel::detect(&app.targets, self))
            })
            .collect();
        for (app, level) in self.apps.iter_mut().zip(detected) {
            if let Some(level) = level {
                app.safety_level = Some(level);
                migrated = true;
            }
        }

        migrated
    }

    /// Validate settings and fix any invalid values
    pub fn validate(&mut self) {
        self.countdown_secs = self.countdown_secs.min(60);
        self.step_delay_ms = self.step_delay_ms.min(10_000);
        self.stats_ttl_ms = self.stats_ttl_ms.max(100);
        self.history_max = self.history_max.max(1);
    }
}
