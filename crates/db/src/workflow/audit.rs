use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use opsflow_core::audit::AuditEntry;
use opsflow_core::domain::approval::ApprovalLog;

use crate::repositories::{RepositoryError, SqlApprovalLogRepository};

/// Writes audit entries on the caller's connection, so they commit or roll back together
/// with the state change they describe.
#[derive(Clone, Debug, Default)]
pub struct AuditRecorder;

impl AuditRecorder {
    pub fn new() -> Self {
        Self
    }

    pub async fn record(
        &self,
        conn: &mut SqliteConnection,
        entry: AuditEntry,
        at: DateTime<Utc>,
    ) -> Result<ApprovalLog, RepositoryError> {
        let log = entry.into_log(at);
        SqlApprovalLogRepository::new(conn).append(&log).await?;

        debug!(
            event_name = "workflow.audit.appended",
            flow_id = %log.flow_id,
            action = %log.action,
            "approval log appended"
        );
        Ok(log)
    }
}
