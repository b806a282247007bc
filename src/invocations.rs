//! Append-only invocation log.
//!
//! One line of JSON per assistant call, written to `invocations.ndjson`.
//! The core only appends; the aggregate reads exist for the external
//! dashboard and the `usage` command.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::client::InvokeResponse;
use crate::types::{InvocationRecord, Tier};

/// Build a record from a normalized assistant response.
///
/// `wall_ms` is the caller-observed duration, used when the payload carried
/// no `duration_ms` of its own.
pub fn record_from_response(
    chat_id: &str,
    tier: Tier,
    response: &InvokeResponse,
    wall_ms: u64,
) -> InvocationRecord {
    InvocationRecord {
        timestamp: Utc::now().to_rfc3339(),
        chat_id: chat_id.to_string(),
        tier,
        duration_ms: response.duration_ms.unwrap_or(wall_ms),
        duration_api_ms: response.duration_api_ms.unwrap_or(0),
        cost_usd: response.cost_usd.unwrap_or(0.0),
        num_turns: response.num_turns.unwrap_or(0),
        stop_reason: response.stop_reason.clone(),
        is_error: response.is_error,
        model_usage: response.model_usage.clone(),
    }
}

/// Lifetime (or per-day) totals over the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct UsageTotals {
    pub invocations: u64,
    pub errors: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageTotals {
    fn add(&mut self, record: &InvocationRecord) {
        self.invocations += 1;
        if record.is_error {
            self.errors += 1;
        }
        self.cost_usd += record.cost_usd;
        self.duration_ms += record.duration_ms;
        for tokens in record.model_usage.values() {
            self.input_tokens += tokens.input_tokens;
            self.output_tokens += tokens.output_tokens;
        }
    }
}

/// NDJSON-backed invocation sink with serialized writes.
pub struct InvocationLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl InvocationLog {
    pub fn new(path: PathBuf) -> Self {
        InvocationLog {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn append(&self, record: &InvocationRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialize record")?;
        let _guard = self.write_lock.lock().expect("log lock poisoned");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        writeln!(file, "{line}").context("Failed to append record")?;
        Ok(())
    }

    fn read_records(&self) -> Result<Vec<InvocationRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut records = Vec::new();
        for line in std::io::BufReader::new(file).lines() {
            let line = line.context("Failed to read log line")?;
            if line.trim().is_empty() {
                continue;
            }
            // Tolerate corrupt lines: a crashed append should not poison reads.
            if let Ok(record) = serde_json::from_str::<InvocationRecord>(&line) {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn totals(&self) -> Result<UsageTotals> {
        let mut totals = UsageTotals::default();
        for record in self.read_records()? {
            totals.add(&record);
        }
        Ok(totals)
    }

    /// Per-UTC-day rollups for the most recent `days` days, oldest first.
    pub fn daily(&self, days: usize) -> Result<Vec<(NaiveDate, UsageTotals)>> {
        let mut buckets: BTreeMap<NaiveDate, UsageTotals> = BTreeMap::new();
        for record in self.read_records()? {
            let Ok(ts) = DateTime::parse_from_rfc3339(&record.timestamp) else {
                continue;
            };
            buckets
                .entry(ts.with_timezone(&Utc).date_naive())
                .or_default()
                .add(&record);
        }
        let skip = buckets.len().saturating_sub(days);
        Ok(buckets.into_iter().skip(skip).collect())
    }
}
