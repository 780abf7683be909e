//! Time-indexed memory cache on the local filesystem
//!
//! Snapshots live at `{root}/{job}/{name}/{YYYY-MM-DD_HH-MM-SS}.json`. Writers are
//! not coordinated; two runs storing the same name within one second overwrite
//! each other.

use crate::core::error::{StepError, StepResult};
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File stem format of cache entries
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone)]
pub struct MemoryCache {
    root: PathBuf,
}

impl MemoryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir(&self, job: &str, name: &str) -> PathBuf {
        self.root.join(job).join(name)
    }

    /// Entries for a job/name pair, newest first
    pub async fn entries(&self, job: &str, name: &str) -> StepResult<Vec<(NaiveDateTime, PathBuf)>> {
        let dir = self.dir(job, name);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StepError::CacheMiss(format!("{}/{}", job, name)))
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stamp = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok());
            match stamp {
                Some(stamp) => entries.push((stamp, path)),
                None => debug!("Ignoring foreign file in memory cache: {}", path.display()),
            }
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries)
    }

    /// The `use_last`-th newest snapshot (1 = most recent)
    pub async fn read_last(&self, job: &str, name: &str, use_last: usize) -> StepResult<Value> {
        let entries = self.entries(job, name).await?;
        let path = use_last
            .checked_sub(1)
            .and_then(|idx| entries.get(idx))
            .map(|(_, path)| path)
            .ok_or_else(|| {
                StepError::CacheMiss(format!("{}/{} (entry {} of {})", job, name, use_last, entries.len()))
            })?;
        read_json(path).await
    }

    /// The snapshot closest to `now - days`
    pub async fn read_closest(
        &self,
        job: &str,
        name: &str,
        days: f64,
        now: DateTime<Local>,
    ) -> StepResult<Value> {
        let target = offset_target(now, days)?;
        let entries = self.entries(job, name).await?;
        let (_, path) = entries
            .iter()
            .min_by_key(|(stamp, _)| (*stamp - target).num_seconds().abs())
            .ok_or_else(|| StepError::CacheMiss(format!("{}/{}", job, name)))?;
        read_json(path).await
    }

    /// Write a snapshot stamped with `at`
    pub async fn store<Tz: TimeZone>(
        &self,
        job: &str,
        name: &str,
        value: &Value,
        at: DateTime<Tz>,
    ) -> StepResult<PathBuf>
    where
        Tz::Offset: std::fmt::Display,
    {
        let dir = self.dir(job, name);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", at.format(TIMESTAMP_FORMAT)));
        tokio::fs::write(&path, serde_json::to_vec_pretty(value)?).await?;
        debug!("Stored memory snapshot {}", path.display());
        Ok(path)
    }
}

/// `now - days`, rejecting offsets outside the calendar range
fn offset_target(now: DateTime<Local>, days: f64) -> StepResult<NaiveDateTime> {
    let out_of_range = || StepError::invalid_value("timedelta", format!("{} days is out of range", days));
    let seconds = days * 86_400.0;
    if !seconds.is_finite() || seconds.abs() >= i64::MAX as f64 {
        return Err(out_of_range());
    }
    Duration::try_seconds(seconds.round() as i64)
        .and_then(|offset| now.naive_local().checked_sub_signed(offset))
        .ok_or_else(out_of_range)
}

async fn read_json(path: &Path) -> StepResult<Value> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}
