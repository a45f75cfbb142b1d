//! Append-only snippet memory stored as JSON lines.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Memory;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    key: String,
    text: String,
    at: DateTime<Utc>,
}

/// Keyword search over `memory.jsonl`; more query-word hits rank higher, newer
/// entries win ties.
#[derive(Debug)]
pub struct JsonlMemory {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn entries(&self) -> Result<Vec<Entry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read memory {}", self.path.display()))?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("parse {} line {}", self.path.display(), i + 1))
            })
            .collect()
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

impl Memory for JsonlMemory {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let query = words(query);
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(usize, usize, String)> = self
            .entries()?
            .into_iter()
            .enumerate()
            .filter_map(|(pos, entry)| {
                let text_words = words(&entry.text);
                let hits = query.iter().filter(|q| text_words.contains(q)).count();
                (hits > 0).then_some((hits, pos, entry.text))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, _, text)| text)
            .collect())
    }

    fn add(&self, key: &str, text: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create memory dir {}", parent.display()))?;
        }
        let entry = Entry {
            key: key.to_string(),
            text: text.to_string(),
            at: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry).context("serialize memory entry")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open memory {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append memory {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_ranks_by_hits_then_recency() {
        let temp = tempfile::tempdir().expect("tempdir");
        let memory = JsonlMemory::new(temp.path().join("state/memory.jsonl"));
        memory.add("a", "notes api deployed").expect("add");
        memory.add("b", "weather dashboard").expect("add");
        memory.add("c", "notes service").expect("add");

        let hits = memory.search("tiny notes api", 3).expect("search");
        assert_eq!(hits, vec!["notes api deployed", "notes service"]);

        let top = memory.search("notes", 1).expect("search");
        assert_eq!(top, vec!["notes service"]);
    }

    #[test]
    fn empty_store_and_short_queries_return_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let memory = JsonlMemory::new(temp.path().join("memory.jsonl"));
        assert!(memory.search("anything", 3).expect("search").is_empty());
        memory.add("k", "an entry").expect("add");
        assert!(memory.search("an", 3).expect("search").is_empty());
    }
}
