pub mod error;

use std::sync::Arc;
use std::time::Duration;

use depctl_domain::{AuditEntry, AuditEntryDraft};
use depctl_store::{AuditFilter, AuditRepository};

pub use error::AuditError;

/// C1: the tamper-evident audit trail.
///
/// Exposes exactly one write operation, `append`, which computes the
/// per-user hash chain link and persists through `repo`. Bounded by
/// `timeout` so a slow backing store never stalls the caller — callers are
/// expected to treat a timed-out append as logged-and-continue per the
/// propagation policy, not as a reason to abort the deployment in flight.
#[derive(Clone)]
pub struct AuditLog {
    repo: Arc<dyn AuditRepository>,
    timeout: Duration,
}

impl AuditLog {
    pub fn new(repo: Arc<dyn AuditRepository>, timeout: Duration) -> Self {
        AuditLog { repo, timeout }
    }

    pub async fn append(&self, draft: AuditEntryDraft) -> Result<AuditEntry, AuditError> {
        match tokio::time::timeout(self.timeout, self.repo.append(draft)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "audit append timed out");
                Err(AuditError::Timeout(self.timeout))
            }
        }
    }

    pub async fn find(&self, filter: &AuditFilter, page: u32, page_size: u32) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.repo.find(filter, page, page_size).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depctl_domain::ids::UserId;
    use depctl_store::InMemoryStore;

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

    #[tokio::test]
    async fn append_then_find_roundtrips() {
        let store = Arc::new(InMemoryStore::new());
        let log = AuditLog::new(store, Duration::from_secs(2));

        log.append(draft("create")).await.unwrap();
        log.append(draft("approve")).await.unwrap();

        let entries = log.find(&AuditFilter::default(), 0, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        // newest first
        assert_eq!(entries[0].action, "approve");
    }

    #[tokio::test]
    async fn chained_hashes_survive_the_service_layer() {
        let store = Arc::new(InMemoryStore::new());
        let log = AuditLog::new(store, Duration::from_secs(2));

        let e1 = log.append(draft("create")).await.unwrap();
        let e2 = log.append(draft("approve")).await.unwrap();
        assert_eq!(e2.previous_hash, e1.hash);
        assert!(e1.verify());
        assert!(e2.verify());
    }
}
