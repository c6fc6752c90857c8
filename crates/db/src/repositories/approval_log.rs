use sqlx::{Row, SqliteConnection};

use opsflow_core::domain::approval::{ApprovalLog, ApprovalLogId, FlowId, StepId};
use opsflow_core::domain::request::UserId;

use super::{format_timestamp, parse_timestamp, RepositoryError};

/// Append-only access to `approval_logs`; the schema rejects updates and deletes.
pub struct SqlApprovalLogRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqlApprovalLogRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn append(&mut self, log: &ApprovalLog) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_logs (id, flow_id, step_id, action, by_user_id, note, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id.0)
        .bind(&log.flow_id.0)
        .bind(log.step_id.as_ref().map(|step| step.0.as_str()))
        .bind(&log.action)
        .bind(log.by_user_id.as_ref().map(|user| user.0.as_str()))
        .bind(&log.note)
        .bind(format_timestamp(&log.created_at))
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Entries for a flow in the order they were written.
    pub async fn list_by_flow(&mut self, flow_id: &FlowId) -> Result<Vec<ApprovalLog>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, flow_id, step_id, action, by_user_id, note, created_at
             FROM approval_logs
             WHERE flow_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&flow_id.0)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter()
            .map(|row| -> Result<ApprovalLog, RepositoryError> {
                let created_at: String = row.try_get("created_at")?;
                Ok(ApprovalLog {
                    id: ApprovalLogId(row.try_get("id")?),
                    flow_id: FlowId(row.try_get("flow_id")?),
                    step_id: row.try_get::<Option<String>, _>("step_id")?.map(StepId),
                    action: row.try_get("action")?,
                    by_user_id: row.try_get::<Option<String>, _>("by_user_id")?.map(UserId),
                    note: row.try_get("note")?,
                    created_at: parse_timestamp("created_at", &created_at)?,
                })
            })
            .collect()
    }
}
