use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use opsflow_core::domain::approval::{ApprovalFlow, FlowId, FlowStatus};
use opsflow_core::domain::request::{RequestId, UserId};

use super::{
    decode_error, format_timestamp, is_unique_violation, parse_timestamp, to_u32, RepositoryError,
};

const FLOW_COLUMNS: &str =
    "id, request_id, current_step, status, created_by_id, created_at, updated_at";

/// Flow rows. Every state change is a compare-and-set on the status and step the caller read,
/// so two writers racing on the same flow cannot both win.
pub struct SqlApprovalFlowRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqlApprovalFlowRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn find_by_id(&mut self, id: &FlowId) -> Result<Option<ApprovalFlow>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {FLOW_COLUMNS} FROM approval_flows WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.as_ref().map(row_to_flow).transpose()
    }

    pub async fn find_by_request_id(
        &mut self,
        request_id: &RequestId,
    ) -> Result<Option<ApprovalFlow>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM approval_flows WHERE request_id = ?"
        ))
        .bind(&request_id.0)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.as_ref().map(row_to_flow).transpose()
    }

    /// Inserts a new flow. A second flow for the same request surfaces as
    /// [`RepositoryError::Conflict`].
    pub async fn insert(&mut self, flow: &ApprovalFlow) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO approval_flows
                (id, request_id, current_step, status, created_by_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&flow.id.0)
        .bind(&flow.request_id.0)
        .bind(i64::from(flow.current_step))
        .bind(flow.status.as_str())
        .bind(flow.created_by_id.as_ref().map(|user| user.0.as_str()))
        .bind(format_timestamp(&flow.created_at))
        .bind(format_timestamp(&flow.updated_at))
        .execute(&mut *self.conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(RepositoryError::Conflict(format!(
                "an approval flow already exists for request `{}`",
                flow.request_id.0
            ))),
            Err(error) => Err(error.into()),
        }
    }

    /// `pending` -> `in_review` at `step`.
    pub async fn mark_in_review(
        &mut self,
        id: &FlowId,
        step: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE approval_flows
             SET status = 'in_review', current_step = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(i64::from(step))
        .bind(format_timestamp(&now))
        .bind(&id.0)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Moves an in-flight flow from `from_step` to `to_step`.
    pub async fn advance(
        &mut self,
        id: &FlowId,
        from_step: u32,
        to_step: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE approval_flows
             SET status = 'in_review', current_step = ?, updated_at = ?
             WHERE id = ? AND current_step = ? AND status IN ('pending', 'in_review')",
        )
        .bind(i64::from(to_step))
        .bind(format_timestamp(&now))
        .bind(&id.0)
        .bind(i64::from(from_step))
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Closes an in-flight flow that is still at `from_step`.
    pub async fn finalize(
        &mut self,
        id: &FlowId,
        from_step: u32,
        status: &FlowStatus,
        closing_step: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        if !status.is_terminal() {
            return Err(RepositoryError::Conflict(format!(
                "cannot finalize flow `{}` as `{}`",
                id.0,
                status.as_str()
            )));
        }

        let result = sqlx::query(
            "UPDATE approval_flows
             SET status = ?, current_step = ?, updated_at = ?
             WHERE id = ? AND current_step = ? AND status IN ('pending', 'in_review')",
        )
        .bind(status.as_str())
        .bind(i64::from(closing_step))
        .bind(format_timestamp(&now))
        .bind(&id.0)
        .bind(i64::from(from_step))
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn row_to_flow(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalFlow, RepositoryError> {
    let status: String = row.try_get("status")?;
    let current_step: i64 = row.try_get("current_step")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ApprovalFlow {
        id: FlowId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        current_step: to_u32("current_step", current_step)?,
        status: FlowStatus::parse(&status)
            .ok_or_else(|| decode_error("status", format!("unknown flow status `{status}`")))?,
        created_by_id: row.try_get::<Option<String>, _>("created_by_id")?.map(UserId),
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}
