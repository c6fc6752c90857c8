use sqlx::{Row, SqliteConnection};

use opsflow_core::domain::approval::{ApprovalMode, Approver, ApproverConfig, ApproverConfigId};
use opsflow_core::domain::request::RequestTypeId;

use super::{decode_error, format_timestamp, parse_timestamp, to_u32, RepositoryError};

pub struct SqlApproverConfigRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqlApproverConfigRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Rows for a request type in chain order. `created_at, id` only break ties the resolver
    /// would otherwise leave in store order.
    pub async fn list_by_request_type(
        &mut self,
        request_type_id: &RequestTypeId,
    ) -> Result<Vec<ApproverConfig>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_type_id, level, user_id, group_name, mode, priority,
                    created_at, updated_at
             FROM approver_configs
             WHERE request_type_id = ?
             ORDER BY level ASC, priority ASC, created_at ASC, id ASC",
        )
        .bind(&request_type_id.0)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter().map(row_to_config).collect()
    }

    pub async fn insert(&mut self, config: &ApproverConfig) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approver_configs
                (id, request_type_id, level, user_id, group_name, mode, priority,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&config.id.0)
        .bind(&config.request_type_id.0)
        .bind(i64::from(config.level))
        .bind(config.approver.user_id().map(|user| user.0.as_str()))
        .bind(config.approver.group_name())
        .bind(config.mode.as_str())
        .bind(config.priority)
        .bind(format_timestamp(&config.created_at))
        .bind(format_timestamp(&config.updated_at))
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }
}

fn row_to_config(row: &sqlx::sqlite::SqliteRow) -> Result<ApproverConfig, RepositoryError> {
    let id: String = row.try_get("id")?;
    let request_type_id: String = row.try_get("request_type_id")?;
    let level: i64 = row.try_get("level")?;
    let user_id: Option<String> = row.try_get("user_id")?;
    let group_name: Option<String> = row.try_get("group_name")?;
    let mode: String = row.try_get("mode")?;
    let priority: i32 = row.try_get("priority")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let approver = Approver::from_columns(user_id, group_name).ok_or_else(|| {
        decode_error("user_id/group_name", format!("config `{id}` must name a user or a group"))
    })?;
    let mode = ApprovalMode::parse(&mode)
        .ok_or_else(|| decode_error("mode", format!("unknown approval mode `{mode}`")))?;

    Ok(ApproverConfig {
        id: ApproverConfigId(id),
        request_type_id: RequestTypeId(request_type_id),
        level: to_u32("level", level)?,
        approver,
        mode,
        priority,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}
