//! A bounded, in-memory record of top-level `invoke_artifact` calls,
//! queryable by artifact or invoker (§4.7's `invocations` query). Not part
//! of the checkpoint: it is an observability log, not settlement state,
//! and a fresh process starts it empty.

use std::collections::VecDeque;

use agency_shared::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub artifact_id: String,
    pub invoker: String,
    pub method: String,
    pub success: bool,
    pub at: Timestamp,
}

#[derive(Debug)]
pub struct InvocationLog {
    records: VecDeque<InvocationRecord>,
    max_entries: usize,
}

impl InvocationLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_entries,
        }
    }

    pub fn record(&mut self, artifact_id: &str, invoker: &str, method: &str, success: bool) {
        self.records.push_back(InvocationRecord {
            artifact_id: artifact_id.to_string(),
            invoker: invoker.to_string(),
            method: method.to_string(),
            success,
            at: Timestamp::now(),
        });
        while self.records.len() > self.max_entries {
            self.records.pop_front();
        }
    }

    /// Most recent first, newest-to-oldest, like `EventLog::read_recent`.
    pub fn by_artifact(&self, artifact_id: &str, limit: usize) -> Vec<&InvocationRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.artifact_id == artifact_id)
            .take(limit)
            .collect()
    }

    pub fn by_invoker(&self, invoker: &str, limit: usize) -> Vec<&InvocationRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.invoker == invoker)
            .take(limit)
            .collect()
    }

    pub fn recent(&self, limit: usize) -> Vec<&InvocationRecord> {
        self.records.iter().rev().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_by_artifact_and_invoker_independently() {
        let mut log = InvocationLog::new(10);
        log.record("x1", "alice", "run", true);
        log.record("x2", "alice", "run", true);
        log.record("x1", "bob", "run", false);

        assert_eq!(log.by_artifact("x1", 10).len(), 2);
        assert_eq!(log.by_invoker("alice", 10).len(), 2);
        assert_eq!(log.by_invoker("bob", 10).len(), 1);
        assert!(!log.by_invoker("bob", 10)[0].success);
    }

    #[test]
    fn oldest_entries_are_evicted_past_the_cap() {
        let mut log = InvocationLog::new(2);
        log.record("x1", "alice", "run", true);
        log.record("x2", "alice", "run", true);
        log.record("x3", "alice", "run", true);

        let all = log.by_invoker("alice", 10);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].artifact_id, "x3");
        assert_eq!(all[1].artifact_id, "x2");
    }

    #[test]
    fn recent_ignores_filters_and_returns_newest_first() {
        let mut log = InvocationLog::new(10);
        log.record("x1", "alice", "run", true);
        log.record("x2", "bob", "run", false);

        let all = log.recent(10);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].artifact_id, "x2");
        assert_eq!(all[1].artifact_id, "x1");
    }

    #[test]
    fn limit_caps_the_returned_count() {
        let mut log = InvocationLog::new(10);
        for i in 0..5 {
            log.record(&format!("x{i}"), "alice", "run", true);
        }
        assert_eq!(log.by_invoker("alice", 2).len(), 2);
    }
}
