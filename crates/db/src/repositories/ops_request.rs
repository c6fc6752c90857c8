use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqliteConnection};

use opsflow_core::domain::request::{
    OpsRequest, RequestId, RequestStatus, RequestStatusUpdate, RequestType, RequestTypeId, UserId,
};

use super::{
    decode_error, format_timestamp, parse_optional_timestamp, parse_timestamp, to_u32,
    RepositoryError,
};

pub struct SqlOpsRequestRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqlOpsRequestRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn find_by_id(
        &mut self,
        id: &RequestId,
    ) -> Result<Option<OpsRequest>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, requester_id, request_type_id, amount, description, status,
                    approved_by_id, final_approved_at, current_approver_id,
                    current_approval_level, created_at, updated_at
             FROM ops_requests WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.as_ref().map(row_to_request).transpose()
    }

    pub async fn insert(&mut self, request: &OpsRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO ops_requests
                (id, requester_id, request_type_id, amount, description, status,
                 approved_by_id, final_approved_at, current_approver_id,
                 current_approval_level, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.requester_id.0)
        .bind(&request.request_type_id.0)
        .bind(request.amount.to_string())
        .bind(&request.description)
        .bind(request.status.as_str())
        .bind(request.approved_by_id.as_ref().map(|user| user.0.as_str()))
        .bind(request.final_approved_at.as_ref().map(format_timestamp))
        .bind(request.current_approver_id.as_ref().map(|user| user.0.as_str()))
        .bind(request.current_approval_level.map(i64::from))
        .bind(format_timestamp(&request.created_at))
        .bind(format_timestamp(&request.updated_at))
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Applies an engine-driven status change. Only requests that are still open
    /// (`pending` or `in_review`) are touched; returns whether a row changed.
    pub async fn apply_status_update(
        &mut self,
        id: &RequestId,
        update: &RequestStatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let status = update.status();
        let result = match update {
            RequestStatusUpdate::InReview { level, current_approver } => {
                sqlx::query(
                    "UPDATE ops_requests
                     SET status = ?, current_approval_level = ?, current_approver_id = ?,
                         updated_at = ?
                     WHERE id = ? AND status IN ('pending', 'in_review')",
                )
                .bind(status.as_str())
                .bind(i64::from(*level))
                .bind(current_approver.as_ref().map(|user| user.0.as_str()))
                .bind(format_timestamp(&now))
                .bind(&id.0)
                .execute(&mut *self.conn)
                .await?
            }
            RequestStatusUpdate::Approved { approver, final_approved_at } => {
                sqlx::query(
                    "UPDATE ops_requests
                     SET status = ?, approved_by_id = ?, final_approved_at = ?,
                         current_approver_id = NULL, updated_at = ?
                     WHERE id = ? AND status IN ('pending', 'in_review')",
                )
                .bind(status.as_str())
                .bind(&approver.0)
                .bind(format_timestamp(final_approved_at))
                .bind(format_timestamp(&now))
                .bind(&id.0)
                .execute(&mut *self.conn)
                .await?
            }
            RequestStatusUpdate::Rejected => {
                sqlx::query(
                    "UPDATE ops_requests
                     SET status = ?, current_approver_id = NULL, updated_at = ?
                     WHERE id = ? AND status IN ('pending', 'in_review')",
                )
                .bind(status.as_str())
                .bind(format_timestamp(&now))
                .bind(&id.0)
                .execute(&mut *self.conn)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    pub async fn find_request_type(
        &mut self,
        id: &RequestTypeId,
    ) -> Result<Option<RequestType>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, is_active FROM request_types WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&mut *self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(RequestType {
                id: RequestTypeId(row.try_get("id")?),
                name: row.try_get("name")?,
                is_active: row.try_get::<i64, _>("is_active")? != 0,
            })),
            None => Ok(None),
        }
    }

    pub async fn insert_request_type(
        &mut self,
        request_type: &RequestType,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO request_types (id, name, is_active) VALUES (?, ?, ?)")
            .bind(&request_type.id.0)
            .bind(&request_type.name)
            .bind(i64::from(request_type.is_active))
            .execute(&mut *self.conn)
            .await?;

        Ok(())
    }
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<OpsRequest, RepositoryError> {
    let amount: String = row.try_get("amount")?;
    let status: String = row.try_get("status")?;
    let level: Option<i64> = row.try_get("current_approval_level")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(OpsRequest {
        id: RequestId(row.try_get("id")?),
        requester_id: UserId(row.try_get("requester_id")?),
        request_type_id: RequestTypeId(row.try_get("request_type_id")?),
        amount: Decimal::from_str(&amount).map_err(|error| decode_error("amount", error))?,
        description: row.try_get("description")?,
        status: RequestStatus::parse(&status)
            .ok_or_else(|| decode_error("status", format!("unknown request status `{status}`")))?,
        approved_by_id: row.try_get::<Option<String>, _>("approved_by_id")?.map(UserId),
        final_approved_at: parse_optional_timestamp(
            "final_approved_at",
            row.try_get("final_approved_at")?,
        )?,
        current_approver_id: row.try_get::<Option<String>, _>("current_approver_id")?.map(UserId),
        current_approval_level: level
            .map(|value| to_u32("current_approval_level", value))
            .transpose()?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use opsflow_core::domain::request::{
        OpsRequest, RequestId, RequestStatus, RequestStatusUpdate, RequestType, RequestTypeId,
        UserId,
    };

    use super::SqlOpsRequestRepository;
    use crate::{connect_with_settings, migrations};

    fn sample_request(id: &str) -> OpsRequest {
        let now = Utc::now();
        OpsRequest {
            id: RequestId(id.to_owned()),
            requester_id: UserId("u-requester".to_owned()),
            request_type_id: RequestTypeId("rt-expense".to_owned()),
            amount: Decimal::new(125_050, 2),
            description: "Conference travel".to_owned(),
            status: RequestStatus::Pending,
            approved_by_id: None,
            final_approved_at: None,
            current_approver_id: None,
            current_approval_level: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_find_round_trips_amount_and_status() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let mut conn = pool.acquire().await.expect("acquire");
        let mut repo = SqlOpsRequestRepository::new(&mut conn);

        repo.insert_request_type(&RequestType {
            id: RequestTypeId("rt-expense".to_owned()),
            name: "Expense".to_owned(),
            is_active: true,
        })
        .await
        .expect("request type");
        repo.insert(&sample_request("req-1")).await.expect("insert");

        let found = repo
            .find_by_id(&RequestId("req-1".to_owned()))
            .await
            .expect("find")
            .expect("request should exist");

        assert_eq!(found.amount, Decimal::new(125_050, 2));
        assert_eq!(found.status, RequestStatus::Pending);
        assert_eq!(found.current_approval_level, None);
    }

    #[tokio::test]
    async fn status_updates_skip_closed_requests() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let mut conn = pool.acquire().await.expect("acquire");
        let mut repo = SqlOpsRequestRepository::new(&mut conn);

        repo.insert_request_type(&RequestType {
            id: RequestTypeId("rt-expense".to_owned()),
            name: "Expense".to_owned(),
            is_active: true,
        })
        .await
        .expect("request type");
        repo.insert(&sample_request("req-2")).await.expect("insert");
        let id = RequestId("req-2".to_owned());

        let changed =
            repo.apply_status_update(&id, &RequestStatusUpdate::Rejected, Utc::now()).await;
        assert!(changed.expect("reject"));

        let changed = repo
            .apply_status_update(
                &id,
                &RequestStatusUpdate::InReview { level: 2, current_approver: None },
                Utc::now(),
            )
            .await
            .expect("second update");
        assert!(!changed, "rejected request must not move back into review");

        let found = repo.find_by_id(&id).await.expect("find").expect("exists");
        assert_eq!(found.status, RequestStatus::Rejected);
    }
}
