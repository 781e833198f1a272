//! Stats cache - TTL-bounded per-entry CPU and RAM readings

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::trace;

use super::entry::TargetList;
use super::process::{resolve, ProcessControl};

/// Aggregate usage of every process matching one entry
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessStats {
    pub cpu_percent: f32,
    pub ram_mb: u64,
    pub is_running: bool,
}

#[derive(Debug, Clone, Copy)]
struct CachedStat {
    stats: ProcessStats,
    fetched_at: Instant,
}

/// Cache of `ProcessStats` keyed by target list.
///
/// Reads come from the rendering path; a miss or stale entry triggers one
/// process-table query whose aggregate replaces the entry in a single write.
pub struct StatsCache {
    control: Arc<dyn ProcessControl>,
    entries: RwLock<HashMap<String, CachedStat>>,
    ttl: Duration,
}

impl StatsCache {
    pub fn new(control: Arc<dyn ProcessControl>, ttl: Duration) -> Self {
        Self {
            control,
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, targets: &TargetList) -> ProcessStats {
        self.get_at(targets, Instant::now())
    }

    /// `get` with an explicit clock reading
    pub fn get_at(&self, targets: &TargetList, now: Instant) -> ProcessStats {
        let key = targets.to_string();

        if let Some(hit) = self.cached(&key, now) {
            return hit;
        }

        let stats = self.aggregate(targets);
        let fresh = CachedStat {
            stats,
            fetched_at: now,
        };
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(key, fresh);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, fresh);
            }
        }
        stats
    }

    fn cached(&self, key: &str, now: Instant) -> Option<ProcessStats> {
        let entries = self.entries.read().ok()?;
        let hit = entries.get(key)?;
        (now.saturating_duration_since(hit.fetched_at) < self.ttl).then_some(hit.stats)
    }

    fn aggregate(&self, targets: &TargetList) -> ProcessStats {
        let matches = resolve(self.control.as_ref(), targets);

        let stats = ProcessStats {
            cpu_percent: matches.iter().map(|p| p.cpu_percent).sum(),
            ram_mb: matches.iter().map(|p| p.memory_bytes).sum::<u64>() / 1024 / 1024,
            is_running: !matches.is_empty(),
        };
        trace!("Refreshed stats for '{}': {:?}", targets, stats);
        stats
    }
}
