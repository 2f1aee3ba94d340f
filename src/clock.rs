//! Time and file-system probes.
//!
//! Session expiry reads the time through [`Clock`]; staleness decisions
//! read modification times through [`FileStat`]. Both are injected so the
//! scheduling logic can be driven without touching the real clock or disk.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

/// Source of "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Modification-time probe, in integer epoch seconds.
pub trait FileStat: Send + Sync {
    /// `Err` when the file does not exist or cannot be stat()ed.
    fn modified(&self, path: &Path) -> io::Result<i64>;
}

/// Reads modification times from the real file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskStat;

impl FileStat for DiskStat {
    fn modified(&self, path: &Path) -> io::Result<i64> {
        let modified = fs::metadata(path)?.modified()?;
        let secs = match modified.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        };
        Ok(secs)
    }
}

/// In-memory modification times. Unknown paths report `NotFound`.
#[derive(Debug, Default)]
pub struct StatMap {
    times: Mutex<HashMap<PathBuf, i64>>,
}

impl StatMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: impl Into<PathBuf>, mtime: i64) {
        if let Ok(mut times) = self.times.lock() {
            times.insert(path.into(), mtime);
        }
    }

    pub fn remove(&self, path: &Path) {
        if let Ok(mut times) = self.times.lock() {
            times.remove(path);
        }
    }
}

impl FileStat for StatMap {
    fn modified(&self, path: &Path) -> io::Result<i64> {
        let times = self
            .times
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "stat map poisoned"))?;
        times
            .get(path)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::hours(3));
        assert_eq!(clock.now(), start + chrono::Duration::hours(3));
    }

    #[test]
    fn test_stat_map_missing_is_not_found() {
        let stat = StatMap::new();
        stat.set("/p/a.h", 10);
        assert_eq!(stat.modified(Path::new("/p/a.h")).unwrap(), 10);
        let err = stat.modified(Path::new("/p/b.h")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_disk_stat_reads_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.c");
        fs::write(&path, "int x;").unwrap();
        assert!(DiskStat.modified(&path).unwrap() > 0);
        assert!(DiskStat.modified(&dir.path().join("missing.c")).is_err());
    }
}
