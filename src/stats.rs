//! File-based visit/download counters at ~/.visitor-beacon/stats.json.
//!
//! Keys are camelCase to stay readable next to the `adminStats` blob the web
//! page kept in localStorage. Missing fields default, so older files load.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::visitor::types::is_known;

/// What happened on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Visit,
    Download,
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("cannot write stats file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot encode stats: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persisted counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    pub total_visits: u64,
    pub total_downloads: u64,
    pub unique_visitors: u64,
    pub today_visits: u64,
    /// UTC day `today_visits` counts for.
    pub day: Option<NaiveDate>,
    pub seen_visitors: BTreeSet<String>,
}

/// The stats store.
pub struct StatsStore {
    path: PathBuf,
    stats: Stats,
}

impl StatsStore {
    /// Load stats from the default location (~/.visitor-beacon/stats.json).
    pub fn load() -> Self {
        Self::load_from(Self::default_path())
    }

    /// Load stats from a specific path. A missing or unreadable file starts from zero.
    pub fn load_from(path: PathBuf) -> Self {
        let stats = Self::read_file(&path).unwrap_or_default();
        Self { path, stats }
    }

    pub fn default_path() -> PathBuf {
        crate::config::state_dir().join("stats.json")
    }

    fn read_file(path: &Path) -> Option<Stats> {
        let data = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(stats) => Some(stats),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring unreadable stats file");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> Stats {
        self.stats.clone()
    }

    /// Count one event and persist.
    pub fn increment(&mut self, kind: EventKind) -> Result<(), StatsError> {
        self.increment_on(kind, Utc::now().date_naive())
    }

    fn increment_on(&mut self, kind: EventKind, today: NaiveDate) -> Result<(), StatsError> {
        match kind {
            EventKind::Visit => {
                match self.stats.day {
                    Some(day) if day == today => {}
                    // Files without a day keep their count and adopt today
                    None => self.stats.day = Some(today),
                    Some(_) => {
                        self.stats.day = Some(today);
                        self.stats.today_visits = 0;
                    }
                }
                self.stats.total_visits += 1;
                self.stats.today_visits += 1;
            }
            EventKind::Download => self.stats.total_downloads += 1,
        }
        self.save()
    }

    /// Remember a visitor IP; returns true the first time it is seen.
    ///
    /// The "unknown" sentinel is never counted.
    pub fn record_visitor(&mut self, ip: &str) -> Result<bool, StatsError> {
        if !is_known(ip) || !self.stats.seen_visitors.insert(ip.to_string()) {
            return Ok(false);
        }
        self.stats.unique_visitors += 1;
        self.save()?;
        Ok(true)
    }

    /// Zero every counter and persist.
    pub fn reset(&mut self) -> Result<(), StatsError> {
        self.stats = Stats::default();
        self.save()
    }

    pub fn save(&self) -> Result<(), StatsError> {
        let io_err = |source| StatsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&self.stats)?;
        fs::write(&self.path, json).map_err(io_err)
    }
}
