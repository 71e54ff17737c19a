//! Transaction history
//!
//! Every write that reaches broadcast is recorded here, newest first, capped at
//! [`MAX_TRANSACTION_HISTORY`] entries. The history can be persisted as
//! JSON between runs.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use splitpool_common::constants::limits::MAX_TRANSACTION_HISTORY;
use splitpool_common::{Address, IntentKind, TxHash};

use crate::error::ClientResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRecord {
    /// `None` when the broadcast itself failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<TxHash>,
    pub kind: IntentKind,
    pub status: TxStatus,
    pub from: Address,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TxRecord {
    pub fn pending(hash: TxHash, kind: IntentKind, from: Address) -> Self {
        Self {
            hash: Some(hash),
            kind,
            status: TxStatus::Pending,
            from,
            timestamp: unix_now(),
            error: None,
        }
    }

    /// A write the node refused, so it never got a hash
    pub fn not_broadcast(kind: IntentKind, from: Address, error: String) -> Self {
        Self {
            hash: None,
            kind,
            status: TxStatus::Failed,
            from,
            timestamp: unix_now(),
            error: Some(error),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct TransactionHistory {
    records: Mutex<VecDeque<TxRecord>>,
    capacity: usize,
}

impl TransactionHistory {
    pub fn new() -> Self {
        Self::with_capacity(MAX_TRANSACTION_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Adds a record at the front, dropping the oldest beyond capacity
    pub fn record(&self, record: TxRecord) {
        let mut records = self.records.lock();
        records.push_front(record);
        records.truncate(self.capacity);
    }

    /// Returns false when the hash is not in the history
    pub fn update_status(&self, hash: &TxHash, status: TxStatus, error: Option<String>) -> bool {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.hash.as_ref() == Some(hash)) {
            Some(record) => {
                record.status = status;
                record.error = error;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, hash: &TxHash) -> Option<TxRecord> {
        self.records.lock().iter().find(|r| r.hash.as_ref() == Some(hash)).cloned()
    }

    /// Up to `limit` records, newest first
    pub fn recent(&self, limit: usize) -> Vec<TxRecord> {
        self.records.lock().iter().take(limit).cloned().collect()
    }

    pub fn pending(&self) -> Vec<TxRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.status == TxStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub fn save(&self, path: &Path) -> ClientResult<()> {
        let records: Vec<TxRecord> = self.records.lock().iter().cloned().collect();
        let encoded = serde_json::to_string_pretty(&records)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn load(path: &Path) -> ClientResult<Self> {
        let content = fs::read_to_string(path)?;
        let records: Vec<TxRecord> = serde_json::from_str(&content)?;
        let history = Self::new();
        {
            let mut stored = history.records.lock();
            stored.extend(records);
            stored.truncate(history.capacity);
        }
        Ok(history)
    }
}

impl Default for TransactionHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(b: u8) -> TxHash {
        TxHash([b; 32])
    }

    fn sender() -> Address {
        Address::repeat_byte(1)
    }

    #[test]
    fn newest_first_and_bounded() {
        let history = TransactionHistory::with_capacity(3);
        for b in 1..=5 {
            history.record(TxRecord::pending(hash(b), IntentKind::PayShare, sender()));
        }

        assert_eq!(history.len(), 3);
        let recent = history.recent(10);
        assert_eq!(recent[0].hash, Some(hash(5)));
        assert_eq!(recent[2].hash, Some(hash(3)));
        assert!(history.get(&hash(1)).is_none());
    }

    #[test]
    fn default_capacity_is_fifty() {
        let history = TransactionHistory::new();
        for b in 0..60u8 {
            history.record(TxRecord::pending(hash(b), IntentKind::SettleDebt, sender()));
        }
        assert_eq!(history.len(), 50);
    }

    #[test]
    fn status_updates() {
        let history = TransactionHistory::new();
        history.record(TxRecord::pending(hash(1), IntentKind::AddExpense, sender()));
        history.record(TxRecord::pending(hash(2), IntentKind::AddExpense, sender()));

        assert!(history.update_status(&hash(1), TxStatus::Failed, Some("reverted".into())));
        assert!(!history.update_status(&hash(9), TxStatus::Confirmed, None));

        assert_eq!(history.pending().len(), 1);
        assert_eq!(history.get(&hash(1)).unwrap().error.as_deref(), Some("reverted"));
    }

    #[test]
    fn refused_broadcast_is_kept_without_hash() {
        let history = TransactionHistory::new();
        history.record(TxRecord::pending(hash(1), IntentKind::PayShare, sender()));
        history.record(TxRecord::not_broadcast(
            IntentKind::PayShare,
            sender(),
            "connection refused".into(),
        ));

        let latest = &history.recent(1)[0];
        assert_eq!(latest.hash, None);
        assert_eq!(latest.status, TxStatus::Failed);
        assert!(history.pending().len() == 1);
        assert!(history.get(&hash(1)).is_some());
    }

    #[test]
    fn persists_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let history = TransactionHistory::new();
        history.record(TxRecord::pending(hash(1), IntentKind::CreateGroup, sender()));
        history.update_status(&hash(1), TxStatus::Confirmed, None);
        history.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"createGroup\""));
        assert!(raw.contains("\"confirmed\""));

        let loaded = TransactionHistory::load(&path).unwrap();
        assert_eq!(loaded.recent(1), history.recent(1));
    }
}
