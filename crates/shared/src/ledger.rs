use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Append-only record of every link that was ever delivered, one per line.
#[derive(Debug, Clone)]
pub struct SentLinkLedger {
    path: PathBuf,
}

impl SentLinkLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every recorded link. A ledger that does not exist yet is empty.
    pub fn load(&self) -> Result<HashSet<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(e.into()),
        };
        let links: HashSet<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        debug!(path = %self.path.display(), links = links.len(), "ledger loaded");
        Ok(links)
    }

    /// Record `links`. Existing lines are never touched.
    pub fn append(&self, links: &[String]) -> Result<()> {
        if links.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for link in links {
            writeln!(writer, "{}", link.trim())?;
        }
        writer.flush()?;
        debug!(path = %self.path.display(), added = links.len(), "ledger appended");
        Ok(())
    }
}
