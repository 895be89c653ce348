//! Execution auditor: append-only record of every decision.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::executions::model::{AgentExecution, ExecutionResult};
use crate::store::ExecutionLog;

/// Writes execution records. Never fails the caller: the audit trail is for
/// observability, so write errors are logged and dropped.
pub struct ExecutionAuditor {
    log: Arc<dyn ExecutionLog>,
}

impl ExecutionAuditor {
    pub fn new(log: Arc<dyn ExecutionLog>) -> Self {
        Self { log }
    }

    /// Append a record for `result`. Returns whether it was written.
    pub async fn record(&self, result: &ExecutionResult) -> bool {
        let record = AgentExecution::from(result);
        match self.log.append(&record).await {
            Ok(()) => {
                debug!(
                    execution_id = %record.id,
                    message_id = %record.message_id,
                    status = record.status.as_str(),
                    "Execution recorded"
                );
                true
            }
            Err(e) => {
                warn!(
                    execution_id = %record.id,
                    message_id = %record.message_id,
                    error = %e,
                    "Failed to record execution"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::error::DatabaseError;
    use crate::executions::model::ExecutionStatus;
    use crate::store::MemoryStore;

    struct BrokenLog;

    #[async_trait]
    impl ExecutionLog for BrokenLog {
        async fn append(&self, _execution: &AgentExecution) -> Result<(), DatabaseError> {
            Err(DatabaseError::Pool("disk full".into()))
        }

        async fn find_by_message(&self, _message_id: &str) -> Result<Option<AgentExecution>, DatabaseError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn records_are_appended() {
        let store = Arc::new(MemoryStore::new());
        let auditor = ExecutionAuditor::new(store.clone());
        let result = ExecutionResult::skipped("m1", Uuid::new_v4(), "oi", "no_eligible_agent");

        assert!(auditor.record(&result).await);
        let records = store.executions().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Skipped);
        assert_eq!(records[0].id, result.execution_id);
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let auditor = ExecutionAuditor::new(Arc::new(BrokenLog));
        let result = ExecutionResult::skipped("m1", Uuid::new_v4(), "oi", "no_eligible_agent");
        assert!(!auditor.record(&result).await);
    }

    #[tokio::test]
    async fn second_record_for_message_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let auditor = ExecutionAuditor::new(store.clone());
        let ticket_id = Uuid::new_v4();

        assert!(auditor.record(&ExecutionResult::skipped("m1", ticket_id, "oi", "x")).await);
        assert!(!auditor.record(&ExecutionResult::skipped("m1", ticket_id, "oi", "x")).await);
        assert_eq!(store.executions().await.len(), 1);
    }
}
