use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use opsflow_core::domain::approval::{
    ApprovalMode, ApprovalStep, Approver, FlowId, StepId, StepStatus,
};

use super::{
    decode_error, format_timestamp, parse_optional_timestamp, parse_timestamp, to_u32,
    RepositoryError,
};

const STEP_COLUMNS: &str = "id, flow_id, step_number, user_id, group_name, mode, status, \
                            approved_at, notes, created_at";

pub struct SqlApprovalStepRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqlApprovalStepRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn insert_many(&mut self, steps: &[ApprovalStep]) -> Result<(), RepositoryError> {
        for step in steps {
            sqlx::query(
                "INSERT INTO approval_steps
                    (id, flow_id, step_number, user_id, group_name, mode, status,
                     approved_at, notes, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(&step.flow_id.0)
            .bind(i64::from(step.step_number))
            .bind(step.approver.user_id().map(|user| user.0.as_str()))
            .bind(step.approver.group_name())
            .bind(step.mode.as_str())
            .bind(step.status.as_str())
            .bind(step.approved_at.as_ref().map(format_timestamp))
            .bind(&step.notes)
            .bind(format_timestamp(&step.created_at))
            .execute(&mut *self.conn)
            .await?;
        }

        Ok(())
    }

    pub async fn list_by_flow(&mut self, flow_id: &FlowId) -> Result<Vec<ApprovalStep>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_steps WHERE flow_id = ? ORDER BY step_number ASC"
        ))
        .bind(&flow_id.0)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter().map(row_to_step).collect()
    }

    pub async fn find_by_number(
        &mut self,
        flow_id: &FlowId,
        step_number: u32,
    ) -> Result<Option<ApprovalStep>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_steps WHERE flow_id = ? AND step_number = ?"
        ))
        .bind(&flow_id.0)
        .bind(i64::from(step_number))
        .fetch_optional(&mut *self.conn)
        .await?;

        row.as_ref().map(row_to_step).transpose()
    }

    pub async fn count_by_flow(&mut self, flow_id: &FlowId) -> Result<u32, RepositoryError> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) AS count FROM approval_steps WHERE flow_id = ?")
                .bind(&flow_id.0)
                .fetch_one(&mut *self.conn)
                .await?
                .try_get("count")?;

        to_u32("count", count)
    }

    /// Records a decision on a step that is still pending. Returns `false` when the step was
    /// already decided.
    pub async fn resolve(
        &mut self,
        id: &StepId,
        status: &StepStatus,
        decided_at: DateTime<Utc>,
        notes: &str,
    ) -> Result<bool, RepositoryError> {
        if *status == StepStatus::Pending {
            return Err(RepositoryError::Conflict(format!(
                "step `{}` cannot be resolved back to pending",
                id.0
            )));
        }

        let result = sqlx::query(
            "UPDATE approval_steps
             SET status = ?, approved_at = ?, notes = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(format_timestamp(&decided_at))
        .bind(notes)
        .bind(&id.0)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let id: String = row.try_get("id")?;
    let step_number: i64 = row.try_get("step_number")?;
    let user_id: Option<String> = row.try_get("user_id")?;
    let group_name: Option<String> = row.try_get("group_name")?;
    let mode: String = row.try_get("mode")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;

    let approver = Approver::from_columns(user_id, group_name).ok_or_else(|| {
        decode_error("user_id/group_name", format!("step `{id}` must name a user or a group"))
    })?;

    Ok(ApprovalStep {
        flow_id: FlowId(row.try_get("flow_id")?),
        step_number: to_u32("step_number", step_number)?,
        approver,
        mode: ApprovalMode::parse(&mode)
            .ok_or_else(|| decode_error("mode", format!("unknown approval mode `{mode}`")))?,
        status: StepStatus::parse(&status)
            .ok_or_else(|| decode_error("status", format!("unknown step status `{status}`")))?,
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", &created_at)?,
        id: StepId(id),
    })
}
