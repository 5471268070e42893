//! Append-only record of `(query → keywords-used)` associations, plus a per-keyword usage
//! counter table (C2 *Pattern Journal*).
//!
//! Patterns are never mutated in place — learning the same `(query, script)` repeatedly appends
//! a new pattern line each time and increments counters via upsert. The counter table is what C3
//! tier 2 actually reads for `T_pred`-gated keyword prediction; the raw pattern log exists for
//! inspection, audit, and future similarity re-ranking.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// One learned association between a query and the keywords its successful script used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub query_text: String,
    pub keywords_used: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate usage stats for a single keyword, upserted on every pattern that references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordCounter {
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
}

/// Process-wide pattern journal. The append-only log lives at `patterns_path`; the counter table
/// is persisted as a single JSON map alongside it, keyed by keyword name.
pub struct PatternJournal {
    patterns_path: std::path::PathBuf,
    counters_path: std::path::PathBuf,
    counters: RwLock<HashMap<String, KeywordCounter>>,
    append_lock: std::sync::Mutex<()>,
}

impl PatternJournal {
    /// Bind to `patterns_path`; the sibling counters file is `<patterns_path>.counters.json`.
    pub fn new(patterns_path: impl AsRef<std::path::Path>) -> Self {
        let patterns_path = patterns_path.as_ref().to_path_buf();
        let mut counters_path = patterns_path.clone();
        let file_name = counters_path
            .file_name()
            .map(|n| format!("{}.counters.json", n.to_string_lossy()))
            .unwrap_or_else(|| "patterns.counters.json".to_string());
        counters_path.set_file_name(file_name);
        PatternJournal {
            patterns_path,
            counters_path,
            counters: RwLock::new(HashMap::new()),
            append_lock: std::sync::Mutex::new(()),
        }
    }

    /// Load the counter table from disk, if present. The raw pattern log does not need to be
    /// loaded into memory — it is append-only and read back on demand by [`Self::patterns`].
    pub fn load_or_init(&self) -> Result<(), PipelineError> {
        match std::fs::read_to_string(&self.counters_path) {
            Ok(text) => {
                *self.counters.write().unwrap() = serde_json::from_str(&text)?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Record a learned `(query, keywords)` pair: append the pattern, then upsert-increment every
    /// keyword's counter. Idempotent in structure — calling this N times with the same arguments
    /// increments counters by N without changing the set of known keywords.
    pub fn record(&self, query_text: &str, keywords_used: &[String]) -> Result<(), PipelineError> {
        let now = Utc::now();
        let pattern = Pattern {
            query_text: query_text.to_string(),
            keywords_used: keywords_used.to_vec(),
            timestamp: now,
        };
        self.append_pattern(&pattern)?;

        let snapshot = {
            let mut guard = self.counters.write().unwrap();
            for kw in keywords_used {
                let counter = guard.entry(kw.clone()).or_insert(KeywordCounter {
                    usage_count: 0,
                    last_used: now,
                });
                counter.usage_count += 1;
                counter.last_used = now;
            }
            guard.clone()
        };
        self.persist_counters(&snapshot)
    }

    /// Every pattern ever recorded, in append order. Reads the on-disk log directly.
    pub fn patterns(&self) -> Result<Vec<Pattern>, PipelineError> {
        let file = match std::fs::File::open(&self.patterns_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    /// Counter for a single keyword, if it has ever been recorded.
    pub fn counter_for(&self, keyword: &str) -> Option<KeywordCounter> {
        self.counters.read().unwrap().get(keyword).cloned()
    }

    fn append_pattern(&self, pattern: &Pattern) -> Result<(), PipelineError> {
        let _guard = self.append_lock.lock().unwrap();
        if let Some(parent) = self.patterns_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.patterns_path)?;
        writeln!(file, "{}", serde_json::to_string(pattern)?)?;
        Ok(())
    }

    fn persist_counters(&self, counters: &HashMap<String, KeywordCounter>) -> Result<(), PipelineError> {
        if let Some(parent) = self.counters_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.counters_path, serde_json::to_string(counters)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_appends_pattern_and_increments_counters() {
        let dir = tempdir().unwrap();
        let journal = PatternJournal::new(dir.path().join("patterns.jsonl"));

        journal
            .record("search google", &["Open Browser".to_string(), "Input Text".to_string()])
            .unwrap();
        journal
            .record("search google", &["Open Browser".to_string(), "Input Text".to_string()])
            .unwrap();

        let patterns = journal.patterns().unwrap();
        assert_eq!(patterns.len(), 2);
        assert_eq!(journal.counter_for("Open Browser").unwrap().usage_count, 2);
    }

    #[test]
    fn learning_is_idempotent_in_keyword_set() {
        let dir = tempdir().unwrap();
        let journal = PatternJournal::new(dir.path().join("patterns.jsonl"));
        for _ in 0..5 {
            journal.record("q", &["Click".to_string()]).unwrap();
        }
        assert_eq!(journal.counter_for("Click").unwrap().usage_count, 5);
        assert_eq!(journal.patterns().unwrap().len(), 5);
    }

    #[test]
    fn counters_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patterns.jsonl");
        {
            let journal = PatternJournal::new(&path);
            journal.record("q", &["Click".to_string()]).unwrap();
        }
        let reloaded = PatternJournal::new(&path);
        reloaded.load_or_init().unwrap();
        assert_eq!(reloaded.counter_for("Click").unwrap().usage_count, 1);
    }
}
