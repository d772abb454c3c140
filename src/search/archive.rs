//! Append/update log of distinct search queries.
//!
//! The only shared mutable state on the query path. `record` reads the last
//! entry and then appends or bumps it under one lock, persistence included,
//! so concurrent requests cannot both decide to append the same repeat.
//! A file-backed archive also holds an flock on `<archive>.lock` and re-reads
//! the CSV first, so the CLI and the daemon can share one file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lock::FileLock;

const CSV_HEADERS: [&str; 4] = ["id", "query", "timestamp", "summary"];

/// Separator between match titles in an entry summary.
pub const SUMMARY_SEPARATOR: &str = " | ";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed archive: {0}")]
    Malformed(#[from] anyhow::Error),

    #[error("archive lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub id: u64,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

/// What `record` did to the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// New entry with this id
    Appended(u64),
    /// Timestamp of the most recent entry (this id) was refreshed
    Bumped(u64),
}

pub struct SearchArchive {
    entries: Mutex<Vec<ArchiveEntry>>,
    path: Option<PathBuf>,
}

fn same_query(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

impl SearchArchive {
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(vec![]),
            path: None,
        }
    }

    /// Load the archive CSV, creating it if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ArchiveError> {
        if let Err(err) = std::fs::metadata(path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("Creating new search archive at {}", path.display());
                    let mut csv_wrt = csv::Writer::from_path(path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let entries = read_entries(path)?;

        Ok(Self {
            entries: Mutex::new(entries),
            path: Some(path.to_path_buf()),
        })
    }

    /// Record a query that produced matches, timestamped now.
    pub fn record<S: AsRef<str>>(
        &self,
        query: &str,
        titles: &[S],
    ) -> Result<ArchiveOutcome, ArchiveError> {
        self.record_at(query, titles, Utc::now())
    }

    /// Bump the last entry if it holds the same query (case-insensitive),
    /// otherwise append a new one.
    pub fn record_at<S: AsRef<str>>(
        &self,
        query: &str,
        titles: &[S],
        now: DateTime<Utc>,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let mut entries = self.entries.lock().map_err(|_| ArchiveError::Poisoned)?;

        // another process may have written since we last looked
        let _file_lock = match &self.path {
            Some(path) => {
                let lock = FileLock::acquire_blocking(&path.with_extension("lock"))?;
                *entries = read_entries(path)?;
                Some(lock)
            }
            None => None,
        };

        let repeat = entries
            .last()
            .filter(|last| same_query(&last.query, query))
            .map(|last| (last.id, last.timestamp));

        let outcome = match repeat {
            Some((id, previous)) => {
                if let Some(last) = entries.last_mut() {
                    last.timestamp = now;
                }
                if let Err(err) = self.persist(&entries) {
                    if let Some(last) = entries.last_mut() {
                        last.timestamp = previous;
                    }
                    return Err(err);
                }
                ArchiveOutcome::Bumped(id)
            }
            None => {
                let id = entries.iter().map(|e| e.id).max().map_or(1, |max| max + 1);
                entries.push(ArchiveEntry {
                    id,
                    query: query.to_string(),
                    timestamp: now,
                    summary: titles
                        .iter()
                        .map(|t| t.as_ref())
                        .collect::<Vec<&str>>()
                        .join(SUMMARY_SEPARATOR),
                });
                if let Err(err) = self.persist(&entries) {
                    entries.pop();
                    return Err(err);
                }
                ArchiveOutcome::Appended(id)
            }
        };

        Ok(outcome)
    }

    /// Snapshot of all entries, oldest first, including those recorded by
    /// other processes sharing the file.
    pub fn entries(&self) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let mut entries = self.entries.lock().map_err(|_| ArchiveError::Poisoned)?;
        if let Some(path) = &self.path {
            *entries = read_entries(path)?;
        }
        Ok(entries.clone())
    }

    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &[ArchiveEntry]) -> Result<(), ArchiveError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let temp_path = path.with_extension("csv-tmp");
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for entry in entries {
            csv_wrt.write_record([
                entry.id.to_string(),
                entry.query.clone(),
                entry.timestamp.to_rfc3339(),
                entry.summary.clone(),
            ])?;
        }
        csv_wrt.flush()?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let now = Instant::now();
    let mut csv_reader = csv::Reader::from_path(path)?;

    let mut entries = vec![];
    for record in csv_reader.records() {
        let record = record?;
        let field = |idx: usize, name: &str| {
            record
                .get(idx)
                .map(str::to_string)
                .ok_or(anyhow!("couldnt get record {name}"))
        };

        let id = field(0, "id")?
            .parse::<u64>()
            .map_err(|e| anyhow!("bad id: {e}"))?;
        let timestamp = DateTime::parse_from_rfc3339(&field(2, "timestamp")?)
            .map_err(|e| anyhow!("bad timestamp for entry {id}: {e}"))?
            .with_timezone(&Utc);

        entries.push(ArchiveEntry {
            id,
            query: field(1, "query")?,
            timestamp,
            summary: field(3, "summary")?,
        });
    }

    log::debug!(
        "took {}ms to read search archive",
        now.elapsed().as_micros() as f64 / 1000.0
    );

    Ok(entries)
}
