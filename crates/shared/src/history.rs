use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{HistoryRecord, SelectedArticle};

/// The articles delivered in the most recent runs, shown to the selection
/// step so it can skip repeats of the same topic.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    depth: usize,
}

impl HistoryStore {
    /// `depth` is the number of past runs kept, at least one.
    pub fn new(path: impl Into<PathBuf>, depth: usize) -> Self {
        Self {
            path: path.into(),
            depth: depth.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records from the last `depth` runs. A missing file means no history.
    /// A corrupted file is logged and treated as empty.
    pub fn load(&self) -> Result<Vec<HistoryRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<HistoryRecord> = match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable history, starting fresh");
                return Ok(Vec::new());
            }
        };
        Ok(keep_recent_runs(records, self.depth))
    }

    /// Replace the file with this run's articles plus the runs before it,
    /// up to `depth` runs in total.
    pub fn save(&self, sent: &[SelectedArticle], sent_on: NaiveDate) -> Result<()> {
        let mut records: Vec<HistoryRecord> = self
            .load()?
            .into_iter()
            .filter(|r| r.sent_on != sent_on)
            .collect();
        records.extend(sent.iter().map(|a| HistoryRecord::from_selected(a, sent_on)));
        let records = keep_recent_runs(records, self.depth);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| Error::Parse(format!("failed to serialize history: {e}")))?;
        fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), records = records.len(), "history saved");
        Ok(())
    }
}

/// Records whose run date is among the `depth` most recent dates.
fn keep_recent_runs(records: Vec<HistoryRecord>, depth: usize) -> Vec<HistoryRecord> {
    let dates: BTreeSet<NaiveDate> = records.iter().map(|r| r.sent_on).collect();
    let Some(&cutoff) = dates.iter().rev().nth(depth.saturating_sub(1)) else {
        return records;
    };
    records.into_iter().filter(|r| r.sent_on >= cutoff).collect()
}
