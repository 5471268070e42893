//! Append-only, line-delimited JSON merged metrics journal (C0c, §6 *Merged metrics journal*).
//!
//! One record per completed run, written by [`crate::orchestrator::Orchestrator`] after a
//! successful execution. Writes are append-only and serialized per process; reads stream the
//! whole file back for inspection/tests.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// One merged-metrics record, appended once per successfully executed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub workflow_id: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,

    pub total_llm_calls: u64,
    pub total_cost: f64,
    pub execution_time: f64,

    pub agent_llm_calls: u64,
    pub agent_cost: f64,
    pub agent_tokens: u64,
    pub agent_prompt_tokens: u64,
    pub agent_completion_tokens: u64,
    pub per_agent_tokens: HashMap<String, u64>,
    pub per_task_tokens: HashMap<String, u64>,

    pub browser_llm_calls: u64,
    pub browser_cost: f64,
    pub browser_tokens: u64,

    pub total_elements: u64,
    pub successful_elements: u64,
    pub failed_elements: u64,
    pub success_rate: f64,
    pub avg_llm_calls_per_element: f64,
    pub avg_cost_per_element: f64,
    pub custom_actions_enabled: bool,
    pub custom_action_usage_count: u64,
    pub session_id: Option<String>,
}

/// Append-only writer/reader over a single line-delimited JSON file.
///
/// Writes are serialized with an internal mutex; concurrent appends never interleave partial
/// lines. Construction never fails — the backing file is created lazily on first append.
pub struct MetricsJournal {
    path: std::path::PathBuf,
    write_lock: Mutex<()>,
}

impl MetricsJournal {
    /// Open (without creating) a journal at `path`. The file is created on first [`Self::append`].
    pub fn new(path: impl AsRef<Path>) -> Self {
        MetricsJournal {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Append one record as a single JSON line.
    pub fn append(&self, record: &MetricsRecord) -> Result<(), PipelineError> {
        let _guard = self.write_lock.lock().unwrap();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Read every record currently in the journal, in append order.
    ///
    /// A missing file reads as an empty journal rather than an error, consistent with "metric
    /// failures never fail a run."
    pub fn read_all(&self) -> Result<Vec<MetricsRecord>, PipelineError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

/// Compute the two derived per-element averages from browser-side totals.
///
/// Returns `(0.0, 0.0)` when `elements_processed == 0`, per §4.1's "else zero" rule — these
/// figures are never stored independently.
pub fn derived_per_element_averages(
    browser_llm_calls: u64,
    browser_cost: f64,
    elements_processed: u64,
) -> (f64, f64) {
    if elements_processed == 0 {
        (0.0, 0.0)
    } else {
        (
            browser_llm_calls as f64 / elements_processed as f64,
            browser_cost / elements_processed as f64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_record() -> MetricsRecord {
        MetricsRecord {
            workflow_id: "wf-1".to_string(),
            url: "https://example.com".to_string(),
            timestamp: Utc::now(),
            total_llm_calls: 10,
            total_cost: 0.05,
            execution_time: 3.2,
            agent_llm_calls: 6,
            agent_cost: 0.02,
            agent_tokens: 1000,
            agent_prompt_tokens: 700,
            agent_completion_tokens: 300,
            per_agent_tokens: HashMap::new(),
            per_task_tokens: HashMap::new(),
            browser_llm_calls: 4,
            browser_cost: 0.03,
            browser_tokens: 500,
            total_elements: 5,
            successful_elements: 5,
            failed_elements: 0,
            success_rate: 1.0,
            avg_llm_calls_per_element: 0.8,
            avg_cost_per_element: 0.006,
            custom_actions_enabled: true,
            custom_action_usage_count: 1,
            session_id: Some("sess-1".to_string()),
        }
    }

    #[test]
    fn appends_and_reads_back_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let journal = MetricsJournal::new(&path);

        journal.append(&sample_record()).unwrap();
        journal.append(&sample_record()).unwrap();

        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].workflow_id, "wf-1");
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does_not_exist.jsonl");
        let journal = MetricsJournal::new(&path);
        assert!(journal.read_all().unwrap().is_empty());
    }

    #[test]
    fn derived_averages_are_zero_with_no_elements() {
        assert_eq!(derived_per_element_averages(10, 1.0, 0), (0.0, 0.0));
    }

    #[test]
    fn derived_averages_divide_by_elements_processed() {
        let (calls, cost) = derived_per_element_averages(10, 2.0, 4);
        assert!((calls - 2.5).abs() < f64::EPSILON);
        assert!((cost - 0.5).abs() < f64::EPSILON);
    }
}
