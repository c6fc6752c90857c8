use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};

use opsflow_core::domain::request::UserId;

use super::{format_timestamp, RepositoryError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// Outcome of a group membership lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipLookup {
    Member,
    NotMember,
    /// The deployment has no `user_groups` table at all.
    NotProvisioned,
}

pub struct SqlMembershipRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqlMembershipRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn is_provisioned(&mut self) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master
             WHERE type = 'table' AND name = 'user_groups'",
        )
        .fetch_one(&mut *self.conn)
        .await?
        .try_get("count")?;

        Ok(count > 0)
    }

    pub async fn lookup(
        &mut self,
        user_id: &UserId,
        group_name: &str,
    ) -> Result<MembershipLookup, RepositoryError> {
        if !self.is_provisioned().await? {
            return Ok(MembershipLookup::NotProvisioned);
        }

        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM user_groups WHERE user_id = ? AND group_name = ?",
        )
        .bind(&user_id.0)
        .bind(group_name)
        .fetch_one(&mut *self.conn)
        .await?
        .try_get("count")?;

        Ok(if count > 0 { MembershipLookup::Member } else { MembershipLookup::NotMember })
    }

    pub async fn role_of(&mut self, user_id: &UserId) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT role FROM users WHERE id = ?")
            .bind(&user_id.0)
            .fetch_optional(&mut *self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("role")?)),
            None => Ok(None),
        }
    }

    pub async fn insert_user(
        &mut self,
        user: &UserRecord,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, name, email, role, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id.0)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.role)
        .bind(format_timestamp(&now))
        .bind(format_timestamp(&now))
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    pub async fn add_member(
        &mut self,
        user_id: &UserId,
        group_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT OR IGNORE INTO user_groups (user_id, group_name, created_at) VALUES (?, ?, ?)",
        )
        .bind(&user_id.0)
        .bind(group_name)
        .bind(format_timestamp(&now))
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }
}
