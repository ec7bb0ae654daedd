//! Append-only audit trail for workflow transitions.
//!
//! Writes JSON Lines (one event per line) with an optional sha256 hash chain:
//! each event carries `hash_prev` + `hash_self`, so any mutation or removal
//! of a past entry is detectable by [`verify_hash_chain`]. One event is
//! appended per successful state transition.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Namespace for deterministic event-id derivation.
const EVENT_ID_NS: Uuid = Uuid::from_bytes([
    0x6c, 0x61, 0x6e, 0x64, 0x2d, 0x61, 0x75, 0x64, 0x69, 0x74, 0x2d, 0x65, 0x76, 0x65, 0x6e,
    0x74,
]);

/// Append-only audit writer.
pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Monotonic sequence counter used in `event_id` derivation. When
    /// resuming an existing log after restart, restore with `set_seq`
    /// alongside `set_last_hash`.
    seq: u64,
}

impl AuditWriter {
    /// Creates the audit writer and ensures parent dirs exist.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Set last hash explicitly (e.g., after reading the last line on restart).
    pub fn set_last_hash(&mut self, last_hash: Option<String>) {
        self.last_hash = last_hash;
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    /// Restore the sequence counter when resuming an existing log. Pass the
    /// number of events already written.
    pub fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one event for the given buy request.
    pub fn append(
        &mut self,
        request_id: Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<AuditEvent> {
        let ts_utc = Utc::now();
        // event_id derived deterministically from chain state + payload + seq.
        // No RNG, so replaying the same log yields the same ids.
        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.seq)?;
        self.seq += 1;

        let mut ev = AuditEvent {
            event_id,
            request_id,
            ts_utc,
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            ev.hash_prev = self.last_hash.clone();
            let self_hash = compute_event_hash(&ev)?;
            ev.hash_self = Some(self_hash.clone());
            self.last_hash = Some(self_hash);
        }

        let line = canonical_json_line(&ev)?;
        append_line(&self.path, &line)?;

        Ok(ev)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub request_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

fn derive_event_id(last_hash: Option<&str>, payload: &Value, seq: u64) -> Result<Uuid> {
    let payload_str =
        serde_json::to_string(&sort_keys(payload)).context("serialize payload for event id")?;
    let material = format!("{}|{}|{}", last_hash.unwrap_or(""), seq, payload_str);
    Ok(Uuid::new_v5(&EVENT_ID_NS, material.as_bytes()))
}

/// Write a single line to file (with trailing newline).
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
/// One event == one JSON line.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash is computed from canonical JSON of the event WITHOUT hash_self (to
/// avoid self-reference).
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Verify the hash chain integrity of an audit log file.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Same logic as [`verify_hash_chain`] but over in-memory JSONL content.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;

        line_count += 1;

        // 1. hash_prev must match the previous event's hash_self.
        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            });
        }

        // 2. hash_self must be correct for this event's content.
        if let Some(ref claimed_hash) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed_hash != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!(
                        "hash_self mismatch: claimed {}, recomputed {}",
                        claimed_hash, recomputed
                    ),
                });
            }
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chain_of_transitions_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut w = AuditWriter::new(&path, true).unwrap();

        let rid = Uuid::new_v4();
        w.append(rid, "CREATED", json!({"price": 500000})).unwrap();
        w.append(rid, "SELLER_CONFIRMED", json!({})).unwrap();
        w.append(rid, "ADMIN_APPROVED", json!({"reviewer": "a"}))
            .unwrap();

        assert_eq!(w.seq(), 3);
        let res = verify_hash_chain(&path).unwrap();
        assert_eq!(res, VerifyResult::Valid { lines: 3 });
    }

    #[test]
    fn tampered_line_breaks_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut w = AuditWriter::new(&path, true).unwrap();

        let rid = Uuid::new_v4();
        w.append(rid, "CREATED", json!({"price": 500000})).unwrap();
        w.append(rid, "SELLER_CONFIRMED", json!({})).unwrap();

        // Tamper with the recorded price on line 1.
        let content = fs::read_to_string(&path).unwrap();
        let tampered = content.replace("500000", "1"); // line 1 payload edit
        match verify_hash_chain_str(&tampered).unwrap() {
            VerifyResult::Broken { line, .. } => assert_eq!(line, 1),
            other => panic!("expected broken chain, got {other:?}"),
        }
    }

    #[test]
    fn event_ids_are_deterministic_per_chain_state() {
        let a = derive_event_id(None, &json!({"x": 1}), 0).unwrap();
        let b = derive_event_id(None, &json!({"x": 1}), 0).unwrap();
        let c = derive_event_id(None, &json!({"x": 1}), 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn no_chain_mode_still_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut w = AuditWriter::new(&path, false).unwrap();
        w.append(Uuid::new_v4(), "CREATED", json!({})).unwrap();
        let res = verify_hash_chain(&path).unwrap();
        assert_eq!(res, VerifyResult::Valid { lines: 1 });
    }
}
