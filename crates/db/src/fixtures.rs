use serde::Serialize;
use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Seeded requests and the shape of the approver chain each one should resolve to.
const SEED_REQUESTS: &[SeedRequestContract] = &[
    SeedRequestContract {
        request_id: "req-demo-001",
        request_type_id: "rt-expense",
        request_type_active: true,
        expected_step_count: 3,
        description: "Three-step expense chain: lead, finance group, manager",
    },
    SeedRequestContract {
        request_id: "req-demo-002",
        request_type_id: "rt-legacy",
        request_type_active: false,
        expected_step_count: 1,
        description: "Inactive request type; starting a flow is a configuration error",
    },
];

const SEED_USER_IDS: &[&str] = &["u-alice", "u-bob", "u-carol", "u-dave"];

struct SeedRequestContract {
    request_id: &'static str,
    request_type_id: &'static str,
    request_type_active: bool,
    expected_step_count: i64,
    description: &'static str,
}

/// Deterministic demo data for exercising the approval engine by hand.
pub struct DemoDataset;

impl DemoDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    /// Loads the demo rows. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let requests_seeded = SEED_REQUESTS
            .iter()
            .map(|request| RequestSeedInfo {
                request_id: request.request_id,
                request_type_id: request.request_type_id,
                description: request.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { users_seeded: SEED_USER_IDS.len(), requests_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for user_id in SEED_USER_IDS {
            let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)")
                .bind(*user_id)
                .fetch_one(pool)
                .await?;
            checks.push((*user_id, exists == 1));
        }

        let finance_member: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_groups WHERE user_id = 'u-carol' AND group_name = 'finance')",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("group:finance", finance_member == 1));

        for request in SEED_REQUESTS {
            let request_exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM ops_requests WHERE id = ?1 AND request_type_id = ?2)",
            )
            .bind(request.request_id)
            .bind(request.request_type_id)
            .fetch_one(pool)
            .await?;
            checks.push((request.request_id, request_exists == 1));

            let type_active: i64 = sqlx::query_scalar(
                "SELECT COALESCE((SELECT is_active FROM request_types WHERE id = ?1), -1)",
            )
            .bind(request.request_type_id)
            .fetch_one(pool)
            .await?;
            checks.push((request.request_type_id, type_active == i64::from(request.request_type_active)));

            let config_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM approver_configs WHERE request_type_id = ?1",
            )
            .bind(request.request_type_id)
            .fetch_one(pool)
            .await?;
            checks.push(("approver-chain", config_count == request.expected_step_count));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug, Serialize)]
pub struct SeedResult {
    pub users_seeded: usize,
    pub requests_seeded: Vec<RequestSeedInfo>,
}

#[derive(Debug, Serialize)]
pub struct RequestSeedInfo {
    pub request_id: &'static str,
    pub request_type_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
