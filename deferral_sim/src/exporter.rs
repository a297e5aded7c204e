//! JSON exporter for run results.
//!
//! The file is written to a temporary sibling and renamed into place, so a
//! reader never sees a partial result.

use crate::config::SimConfig;
use crate::runner::{RunError, RunOutcome};

use deferral_core::{OpKind, RunSummary, Transaction, TxnStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One transaction as it appears in the export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: u64,
    pub key: u64,
    pub partition: u32,
    pub op: OpKind,
    pub status: TxnStatus,
    pub arrival_secs: f64,
    pub execution_secs: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_secs: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_secs: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped_secs: Option<f64>,

    pub defer_secs: f64,
    pub conflicted: bool,
    pub lost_update: bool,

    /// Value read (gets) or written over (writes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_value: Option<i64>,

    /// What a get reads in the serial replay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_read: Option<i64>,
}

impl From<&Transaction> for TransactionRecord {
    fn from(txn: &Transaction) -> Self {
        Self {
            id: txn.id.as_u64(),
            key: txn.key,
            partition: txn.partition.0,
            op: txn.op,
            status: txn.status,
            arrival_secs: txn.arrival_time.as_secs_f64(),
            execution_secs: txn.execution_time.as_secs_f64(),
            start_secs: txn.start_time.map(|t| t.as_secs_f64()),
            completion_secs: txn.completion_time.map(|t| t.as_secs_f64()),
            dropped_secs: txn.dropped_time.map(|t| t.as_secs_f64()),
            defer_secs: txn.accumulated_defer.as_secs_f64(),
            conflicted: txn.conflicted,
            lost_update: txn.lost_update,
            read_value: txn.read_value,
            reference_read: txn.reference_read,
        }
    }
}

/// Final value of one key next to its serial-replay value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub value: i64,
    pub reference: i64,
}

impl KeyRecord {
    pub fn diverged(&self) -> bool {
        self.value != self.reference
    }
}

/// Every key written by either execution. Unwritten keys hold 0.
fn key_records(outcome: &RunOutcome) -> BTreeMap<u64, KeyRecord> {
    let value = |map: &BTreeMap<u64, i64>, key: &u64| map.get(key).copied().unwrap_or(0);
    outcome
        .key_values
        .keys()
        .chain(outcome.reference_values.keys())
        .map(|key| {
            let record = KeyRecord {
                value: value(&outcome.key_values, key),
                reference: value(&outcome.reference_values, key),
            };
            (*key, record)
        })
        .collect()
}

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Configuration as it ran, seed included
    pub config: SimConfig,

    pub summary: RunSummary,

    /// Time of the last dispatched event
    pub end_time_secs: f64,

    pub events_dispatched: u64,
    pub retries_scheduled: u64,

    /// Per-transaction records, on request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<TransactionRecord>>,

    /// Final key values against the serial replay, alongside the transactions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_values: Option<BTreeMap<u64, KeyRecord>>,
}

impl SimExport {
    /// Builds the export of a finished run.
    pub fn from_outcome(outcome: &RunOutcome, include_transactions: bool) -> Self {
        let (transactions, key_values) = if include_transactions {
            (
                Some(outcome.transactions.iter().map(TransactionRecord::from).collect()),
                Some(key_records(outcome)),
            )
        } else {
            (None, None)
        };

        Self {
            config: outcome.config.clone(),
            summary: outcome.summary.clone(),
            end_time_secs: outcome.end_time.as_secs_f64(),
            events_dispatched: outcome.events_dispatched,
            retries_scheduled: outcome.retries_scheduled,
            transactions,
            key_values,
        }
    }

    /// Pretty JSON text of the export.
    pub fn to_json(&self) -> Result<String, RunError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes to a JSON file via temp file + rename.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), RunError> {
        let path = path.as_ref();
        let json = self.to_json()?;

        let tmp = temp_path(path);
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
