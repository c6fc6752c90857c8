use sqlx::SqliteConnection;
use tracing::{info, warn};

use opsflow_core::config::GroupFallback;
use opsflow_core::domain::request::UserId;

use crate::repositories::{MembershipLookup, RepositoryError, SqlMembershipRepository};

/// Answers "is this user in that group" against `user_groups`.
///
/// Deployments without a `user_groups` table fall back according to [`GroupFallback`]:
/// `Role` compares the user's role with the group name, `Deny` refuses every group step.
#[derive(Clone, Debug)]
pub struct GroupMembershipResolver {
    fallback: GroupFallback,
}

impl GroupMembershipResolver {
    pub fn new(fallback: GroupFallback) -> Self {
        Self { fallback }
    }

    pub fn fallback(&self) -> GroupFallback {
        self.fallback
    }

    pub async fn is_member(
        &self,
        conn: &mut SqliteConnection,
        user_id: &UserId,
        group_name: &str,
    ) -> Result<bool, RepositoryError> {
        let mut repo = SqlMembershipRepository::new(conn);
        match repo.lookup(user_id, group_name).await? {
            MembershipLookup::Member => Ok(true),
            MembershipLookup::NotMember => Ok(false),
            MembershipLookup::NotProvisioned => match self.fallback {
                GroupFallback::Role => {
                    let role = repo.role_of(user_id).await?;
                    let matched = role.as_deref() == Some(group_name);
                    info!(
                        event_name = "workflow.group.fallback",
                        user_id = %user_id,
                        group_name,
                        role = role.as_deref().unwrap_or("none"),
                        matched,
                        "group membership table missing; compared role instead"
                    );
                    Ok(matched)
                }
                GroupFallback::Deny => {
                    warn!(
                        event_name = "workflow.group.fallback",
                        user_id = %user_id,
                        group_name,
                        "group membership table missing; group step denied"
                    );
                    Ok(false)
                }
            },
        }
    }
}
