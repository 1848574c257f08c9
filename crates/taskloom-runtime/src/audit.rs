//! Hash-chained audit trail of run mutations.
//!
//! Every run-store call appends exactly one entry. Each entry stores the
//! SHA-256 of its own fields concatenated with the previous entry's hash, so
//! edits or deletions anywhere in the log break the chain.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use taskloom_types::run::{AuditContext, RunId};

/// Kind of run mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Start,
    Complete,
    Fail,
    Block,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One entry in the audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// 0-indexed sequence number.
    pub seq: u64,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub run_id: RunId,
    pub actor: String,
    pub correlation_id: Option<String>,
    pub action: AuditAction,
    /// Resulting status and retry count.
    pub detail: String,
    pub prev_hash: String,
    pub hash: String,
}

#[allow(clippy::too_many_arguments)]
fn compute_entry_hash(
    seq: u64,
    timestamp: &str,
    run_id: &RunId,
    actor: &str,
    correlation_id: Option<&str>,
    action: AuditAction,
    detail: &str,
    prev_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_string().as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(run_id.to_string().as_bytes());
    hasher.update(actor.as_bytes());
    hasher.update(correlation_id.unwrap_or("").as_bytes());
    hasher.update(action.to_string().as_bytes());
    hasher.update(detail.as_bytes());
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

fn genesis() -> String {
    "0".repeat(64)
}

#[derive(Default)]
struct Chain {
    entries: Vec<AuditEntry>,
    tip: String,
}

/// Append-only audit log. All access goes through one mutex.
pub struct AuditLog {
    chain: Mutex<Chain>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            chain: Mutex::new(Chain {
                entries: Vec::new(),
                tip: genesis(),
            }),
        }
    }

    /// Append an entry and return its hash.
    pub fn record(
        &self,
        run_id: RunId,
        audit: &AuditContext,
        action: AuditAction,
        detail: impl Into<String>,
    ) -> String {
        let detail = detail.into();
        let timestamp = Utc::now().to_rfc3339();
        let mut chain = self.chain.lock().unwrap_or_else(|e| e.into_inner());

        let seq = chain.entries.len() as u64;
        let prev_hash = chain.tip.clone();
        let hash = compute_entry_hash(
            seq,
            &timestamp,
            &run_id,
            &audit.actor,
            audit.correlation_id.as_deref(),
            action,
            &detail,
            &prev_hash,
        );

        chain.entries.push(AuditEntry {
            seq,
            timestamp,
            run_id,
            actor: audit.actor.clone(),
            correlation_id: audit.correlation_id.clone(),
            action,
            detail,
            prev_hash,
            hash: hash.clone(),
        });
        chain.tip = hash.clone();
        hash
    }

    /// Recompute every hash. Returns the first inconsistency found.
    pub fn verify_integrity(&self) -> Result<(), String> {
        let chain = self.chain.lock().unwrap_or_else(|e| e.into_inner());
        let mut expected_prev = genesis();

        for entry in &chain.entries {
            if entry.prev_hash != expected_prev {
                return Err(format!("chain break at seq {}", entry.seq));
            }
            let recomputed = compute_entry_hash(
                entry.seq,
                &entry.timestamp,
                &entry.run_id,
                &entry.actor,
                entry.correlation_id.as_deref(),
                entry.action,
                &entry.detail,
                &entry.prev_hash,
            );
            if recomputed != entry.hash {
                return Err(format!("hash mismatch at seq {}", entry.seq));
            }
            expected_prev = entry.hash.clone();
        }
        Ok(())
    }

    /// Entries for one run, oldest first.
    pub fn entries_for(&self, run_id: RunId) -> Vec<AuditEntry> {
        let chain = self.chain.lock().unwrap_or_else(|e| e.into_inner());
        chain
            .entries
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chain.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn tamper(&self, seq: usize, detail: &str) {
        let mut chain = self.chain.lock().unwrap();
        chain.entries[seq].detail = detail.to_string();
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_links_entries() {
        let log = AuditLog::new();
        let run_id = RunId::new();
        let audit = AuditContext::new("tester").with_correlation("wf-1");
        let first = log.record(run_id, &audit, AuditAction::Create, "pending");
        log.record(run_id, &audit, AuditAction::Start, "running");

        let entries = log.entries_for(run_id);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].prev_hash, genesis());
        assert_eq!(entries[1].prev_hash, first);
        assert_eq!(entries[1].correlation_id.as_deref(), Some("wf-1"));
        assert!(log.verify_integrity().is_ok());
    }

    #[test]
    fn test_tampering_detected() {
        let log = AuditLog::new();
        let run_id = RunId::new();
        let audit = AuditContext::new("tester");
        log.record(run_id, &audit, AuditAction::Create, "pending");
        log.record(run_id, &audit, AuditAction::Complete, "completed");
        log.tamper(0, "completed");
        let err = log.verify_integrity().unwrap_err();
        assert!(err.contains("seq 0"));
    }
}
