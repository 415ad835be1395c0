//! Configuration sections.
//!
//! ```toml
//! [library]
//! root = "/srv/books"                 # Library files, only ever read
//!
//! [cache]
//! artifacts = "/var/cache/vellum"     # Materialized virtual books
//! database = "/var/lib/vellum/vellum.db"
//!
//! [detect]
//! min_works = 2                       # Fewest works for an omnibus
//! toc_depth = 1                       # Navigation depth at which works start
//!
//! [extract]
//! max_reference_depth = 16
//!
//! [content]
//! workers = 2                         # Extractions running at once
//! timeout_secs = 60
//! eviction_age_secs = 86400
//! sweep_interval_secs = 3600
//!
//! [scan]
//! concurrency = 4
//! timeout_secs = 120
//! prewarm = false
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> = LazyLock::new(|| ProjectDirs::from("", "", "vellum"));

fn data_dir(name: &str) -> PathBuf {
    match &*PROJECT_DIRS {
        Some(dirs) => dirs.data_dir().join(name),
        None => PathBuf::from(name),
    }
}

fn cache_dir(name: &str) -> PathBuf {
    match &*PROJECT_DIRS {
        Some(dirs) => dirs.cache_dir().join(name),
        None => PathBuf::from(name),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySection {
    pub root: PathBuf,
}
impl Default for LibrarySection {
    fn default() -> Self {
        Self { root: data_dir("library") }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub artifacts: PathBuf,
    pub database: PathBuf,
}
impl Default for CacheSection {
    fn default() -> Self {
        Self { artifacts: cache_dir("artifacts"), database: data_dir("vellum.db") }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectSection {
    pub min_works: usize,
    pub toc_depth: usize,
}
impl Default for DetectSection {
    fn default() -> Self {
        Self { min_works: 2, toc_depth: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractSection {
    pub max_reference_depth: usize,
}
impl Default for ExtractSection {
    fn default() -> Self {
        Self { max_reference_depth: 16 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSection {
    pub workers: usize,
    pub timeout_secs: u64,
    pub eviction_age_secs: u64,
    pub sweep_interval_secs: u64,
}
impl Default for ContentSection {
    fn default() -> Self {
        Self { workers: 2, timeout_secs: 60, eviction_age_secs: 24 * 60 * 60, sweep_interval_secs: 60 * 60 }
    }
}
impl ContentSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn eviction_age(&self) -> Duration {
        Duration::from_secs(self.eviction_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub prewarm: bool,
}
impl Default for ScanSection {
    fn default() -> Self {
        Self { concurrency: 4, timeout_secs: 120, prewarm: false }
    }
}
impl ScanSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
