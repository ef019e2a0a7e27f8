use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::UserId;

/// Fields supplied by the caller when appending to the audit log — the
/// chain linkage (`previousHash`, `hash`) is computed by the store, never
/// by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntryDraft {
    pub user_id: UserId,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub details: Option<serde_json::Value>,
}

/// Immutable, hash-chained audit record. Ordered per-user chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub details: Option<serde_json::Value>,
    pub previous_hash: String,
    pub hash: String,
}

/// Recursively sorts object keys so the same logical document always
/// serializes to the same bytes regardless of field insertion order.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// `hash = SHA-256(canonical({timestamp, userId, action, resourceType,
/// resourceId, previousHash}))`, matching the fixed-order field set the
/// chain is defined over. Absent `resourceId`/`previousHash` canonicalize
/// to the empty string.
pub fn compute_hash(
    timestamp: &DateTime<Utc>,
    user_id: &UserId,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    previous_hash: Option<&str>,
) -> String {
    let fields = serde_json::json!({
        "timestamp": timestamp.to_rfc3339(),
        "userId": user_id.as_str(),
        "action": action,
        "resourceType": resource_type,
        "resourceId": resource_id.unwrap_or(""),
        "previousHash": previous_hash.unwrap_or(""),
    });
    let canonical = canonicalize(&fields);
    let bytes = serde_json::to_vec(&canonical).expect("canonical audit fields always serialize");
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}

impl AuditEntry {
    /// Builds the next entry in a per-user chain given the previous entry's
    /// hash (`None` for the first entry for that user, or when the chain
    /// could not be located — the break is then detectable by a later
    /// verification pass since `previous_hash` is empty).
    pub fn next(draft: AuditEntryDraft, previous_hash: Option<String>, now: DateTime<Utc>) -> Self {
        let hash = compute_hash(
            &now,
            &draft.user_id,
            &draft.action,
            &draft.resource_type,
            draft.resource_id.as_deref(),
            previous_hash.as_deref(),
        );
        AuditEntry {
            timestamp: now,
            user_id: draft.user_id,
            action: draft.action,
            resource_type: draft.resource_type,
            resource_id: draft.resource_id,
            previous_state: draft.previous_state,
            new_state: draft.new_state,
            details: draft.details,
            previous_hash: previous_hash.unwrap_or_default(),
            hash,
        }
    }

    /// Recomputes this entry's hash from its own fields and compares it to
    /// the stored `hash` — used by the chain-verification tool.
    pub fn verify(&self) -> bool {
        let expected = compute_hash(
            &self.timestamp,
            &self.user_id,
            &self.action,
            &self.resource_type,
            self.resource_id.as_deref(),
            Some(self.previous_hash.as_str()),
        );
        expected == self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(action: &str) -> AuditEntryDraft {
        AuditEntryDraft {
            user_id: UserId::new("u1"),
            action: action.into(),
            resource_type: "deployment".into(),
            resource_id: Some("d1".into()),
            previous_state: None,
            new_state: None,
            details: None,
        }
    }

    #[test]
    fn first_entry_has_empty_previous_hash() {
        let e = AuditEntry::next(draft("create"), None, Utc::now());
        assert_eq!(e.previous_hash, "");
        assert!(e.verify());
    }

    #[test]
    fn chain_links_hashes_in_order() {
        let e1 = AuditEntry::next(draft("create"), None, Utc::now());
        let e2 = AuditEntry::next(draft("approve"), Some(e1.hash.clone()), Utc::now());
        assert_eq!(e2.previous_hash, e1.hash);
        assert!(e1.verify());
        assert!(e2.verify());
    }

    #[test]
    fn tampering_breaks_verification() {
        let mut e = AuditEntry::next(draft("create"), None, Utc::now());
        e.action = "delete".into();
        assert!(!e.verify());
    }

    #[test]
    fn hash_is_stable_for_identical_inputs() {
        let ts = Utc::now();
        let a = compute_hash(&ts, &UserId::new("u1"), "create", "deployment", Some("d1"), None);
        let b = compute_hash(&ts, &UserId::new("u1"), "create", "deployment", Some("d1"), None);
        assert_eq!(a, b);
    }
}
