use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use opsflow_core::config::GroupFallback;
use opsflow_core::domain::approval::{
    ApprovalMode, Approver, ApproverConfig, ApproverConfigId, FlowId, FlowStatus, StepStatus,
};
use opsflow_core::domain::request::{
    OpsRequest, RequestId, RequestStatus, RequestType, RequestTypeId, UserId,
};
use opsflow_core::errors::{ErrorKind, WorkflowError};
use opsflow_db::repositories::{
    SqlApproverConfigRepository, SqlMembershipRepository, SqlOpsRequestRepository, UserRecord,
};
use opsflow_db::{
    connect_with_settings, migrations, ApprovalEngine, ApprovalWorkflow, DbPool,
    GroupMembershipResolver,
};

async fn setup() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    pool
}

/// File-backed pool with several connections, so transactions really overlap.
async fn setup_file(dir: &Path) -> DbPool {
    let url = format!("sqlite://{}?mode=rwc", dir.join("workflow.db").display());
    let pool = connect_with_settings(&url, 8, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    pool
}

fn engine(pool: &DbPool) -> ApprovalEngine {
    ApprovalEngine::new(pool.clone(), GroupMembershipResolver::new(GroupFallback::Role))
}

fn user(id: &str) -> UserId {
    UserId(id.to_owned())
}

fn request_id(id: &str) -> RequestId {
    RequestId(id.to_owned())
}

async fn add_user(pool: &DbPool, id: &str, role: &str) {
    let mut conn = pool.acquire().await.expect("acquire");
    SqlMembershipRepository::new(&mut conn)
        .insert_user(
            &UserRecord {
                id: user(id),
                name: id.to_owned(),
                email: format!("{id}@example.com"),
                role: role.to_owned(),
            },
            Utc::now(),
        )
        .await
        .expect("insert user");
}

async fn add_member(pool: &DbPool, id: &str, group: &str) {
    let mut conn = pool.acquire().await.expect("acquire");
    SqlMembershipRepository::new(&mut conn)
        .add_member(&user(id), group, Utc::now())
        .await
        .expect("insert membership");
}

/// Creates an active request type with one config row per `(level, priority, approver)` and a
/// pending request of that type.
async fn add_chain(pool: &DbPool, type_id: &str, chain: &[(u32, i32, Approver)]) -> RequestId {
    let mut conn = pool.acquire().await.expect("acquire");
    let now = Utc::now();
    let request_type_id = RequestTypeId(type_id.to_owned());

    SqlOpsRequestRepository::new(&mut conn)
        .insert_request_type(&RequestType {
            id: request_type_id.clone(),
            name: type_id.to_owned(),
            is_active: true,
        })
        .await
        .expect("insert request type");

    for (index, (level, priority, approver)) in chain.iter().enumerate() {
        SqlApproverConfigRepository::new(&mut conn)
            .insert(&ApproverConfig {
                id: ApproverConfigId(format!("{type_id}-cfg-{index}")),
                request_type_id: request_type_id.clone(),
                level: *level,
                approver: approver.clone(),
                mode: ApprovalMode::And,
                priority: *priority,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("insert config");
    }

    let id = request_id(&format!("{type_id}-req"));
    SqlOpsRequestRepository::new(&mut conn)
        .insert(&OpsRequest {
            id: id.clone(),
            requester_id: user("requester"),
            request_type_id,
            amount: Decimal::new(42_000, 2),
            description: "laptop refresh".to_owned(),
            status: RequestStatus::Pending,
            approved_by_id: None,
            final_approved_at: None,
            current_approver_id: None,
            current_approval_level: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("insert request");
    id
}

async fn load_request(pool: &DbPool, id: &RequestId) -> OpsRequest {
    let mut conn = pool.acquire().await.expect("acquire");
    SqlOpsRequestRepository::new(&mut conn)
        .find_by_id(id)
        .await
        .expect("load request")
        .expect("request exists")
}

async fn count(pool: &DbPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count rows")
}

async fn log_actions(engine: &ApprovalEngine, flow_id: &FlowId) -> Vec<String> {
    engine
        .list_logs(flow_id)
        .await
        .expect("list logs")
        .into_iter()
        .map(|log| log.action)
        .collect()
}

#[tokio::test]
async fn two_step_chain_approves_in_order() {
    let pool = setup().await;
    let request = add_chain(
        &pool,
        "rt-two",
        &[(1, 0, Approver::User(user("alice"))), (2, 0, Approver::User(user("bob")))],
    )
    .await;
    let engine = engine(&pool);

    let started = engine.start_flow(&request, &user("requester")).await.expect("start");
    assert_eq!(started.steps.len(), 2);
    assert_eq!(started.flow.current_step, 1);
    assert_eq!(started.flow.status, FlowStatus::InReview);
    let flow_id = started.flow.id.clone();

    let first = engine.approve(&flow_id, &user("alice"), "ok").await.expect("approve step 1");
    assert_eq!(first.flow_status, FlowStatus::InReview);
    assert_eq!(first.current_step, 2);
    assert_eq!(first.step_number, 1);
    assert_eq!(load_request(&pool, &request).await.status, RequestStatus::InReview);

    let second = engine.approve(&flow_id, &user("bob"), "fine").await.expect("approve step 2");
    assert_eq!(second.flow_status, FlowStatus::Approved);
    assert_eq!(second.current_step, 2);

    let view = engine.flow_view(&flow_id).await.expect("view");
    assert_eq!(view.flow.status, FlowStatus::Approved);
    assert!(view.steps.iter().all(|step| step.status == StepStatus::Approved));
    assert!(view.steps.iter().all(|step| step.approved_at.is_some()));
    assert_eq!(view.steps[0].notes, "ok");

    let stored = load_request(&pool, &request).await;
    assert_eq!(stored.status, RequestStatus::Approved);
    assert_eq!(stored.approved_by_id, Some(user("bob")));
    assert!(stored.final_approved_at.is_some());

    assert_eq!(
        log_actions(&engine, &flow_id).await,
        vec![
            "flow_started",
            "step_approved",
            "moved_to_next_step",
            "step_approved",
            "flow_approved"
        ]
    );
}

#[tokio::test]
async fn decisions_on_a_closed_flow_fail_without_logging() {
    let pool = setup().await;
    let request = add_chain(&pool, "rt-one", &[(1, 0, Approver::User(user("alice")))]).await;
    let engine = engine(&pool);
    let flow_id = engine.start_flow(&request, &user("requester")).await.expect("start").flow.id;

    engine.approve(&flow_id, &user("alice"), "").await.expect("approve");
    let logs_before = count(&pool, "approval_logs").await;

    let again = engine.approve(&flow_id, &user("alice"), "").await.expect_err("already approved");
    assert_eq!(again.kind(), ErrorKind::InvalidState);
    let reject = engine.reject(&flow_id, &user("alice"), "late").await.expect_err("closed");
    assert_eq!(reject.kind(), ErrorKind::InvalidState);

    assert_eq!(count(&pool, "approval_logs").await, logs_before);
    let approvals: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM approval_logs WHERE flow_id = ? AND action = 'flow_approved'",
    )
    .bind(&flow_id.0)
    .fetch_one(&pool)
    .await
    .expect("count flow_approved");
    assert_eq!(approvals, 1);
}

#[tokio::test]
async fn rejecting_the_first_step_terminates_the_flow() {
    let pool = setup().await;
    let request = add_chain(
        &pool,
        "rt-reject",
        &[(1, 0, Approver::User(user("alice"))), (2, 0, Approver::User(user("bob")))],
    )
    .await;
    let engine = engine(&pool);
    let flow_id = engine.start_flow(&request, &user("requester")).await.expect("start").flow.id;

    let receipt = engine.reject(&flow_id, &user("alice"), "bad data").await.expect("reject");
    assert_eq!(receipt.flow_status, FlowStatus::Rejected);
    assert_eq!(receipt.current_step, 1);

    let view = engine.flow_view(&flow_id).await.expect("view");
    assert_eq!(view.flow.status, FlowStatus::Rejected);
    assert_eq!(view.steps[0].status, StepStatus::Rejected);
    assert_eq!(view.steps[0].notes, "bad data");
    assert_eq!(view.steps[1].status, StepStatus::Pending);
    assert_eq!(view.steps[1].approved_at, None);

    assert_eq!(load_request(&pool, &request).await.status, RequestStatus::Rejected);
    assert_eq!(
        log_actions(&engine, &flow_id).await,
        vec!["flow_started", "step_rejected", "flow_rejected"]
    );

    let error = engine.approve(&flow_id, &user("bob"), "").await.expect_err("flow is closed");
    assert_eq!(error.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn rejecting_a_middle_step_skips_the_rest() {
    let pool = setup().await;
    let request = add_chain(
        &pool,
        "rt-three",
        &[
            (1, 0, Approver::User(user("alice"))),
            (2, 0, Approver::User(user("bob"))),
            (3, 0, Approver::User(user("carol"))),
        ],
    )
    .await;
    let engine = engine(&pool);
    let flow_id = engine.start_flow(&request, &user("requester")).await.expect("start").flow.id;

    engine.approve(&flow_id, &user("alice"), "").await.expect("approve step 1");
    engine.reject(&flow_id, &user("bob"), "over budget").await.expect("reject step 2");

    let view = engine.flow_view(&flow_id).await.expect("view");
    assert_eq!(view.flow.status, FlowStatus::Rejected);
    assert_eq!(view.flow.current_step, 2);
    let statuses: Vec<StepStatus> = view.steps.iter().map(|step| step.status.clone()).collect();
    assert_eq!(statuses, vec![StepStatus::Approved, StepStatus::Rejected, StepStatus::Pending]);
}

#[tokio::test]
async fn start_without_configs_is_a_configuration_error_and_writes_nothing() {
    let pool = setup().await;
    let request = add_chain(&pool, "rt-empty", &[]).await;

    let error = engine(&pool).start_flow(&request, &user("requester")).await.expect_err("no chain");

    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert_eq!(count(&pool, "approval_flows").await, 0);
    assert_eq!(count(&pool, "approval_steps").await, 0);
    assert_eq!(count(&pool, "approval_logs").await, 0);
    assert_eq!(load_request(&pool, &request).await.status, RequestStatus::Pending);
}

#[tokio::test]
async fn starting_twice_keeps_a_single_flow() {
    let pool = setup().await;
    let request = add_chain(&pool, "rt-dup", &[(1, 0, Approver::User(user("alice")))]).await;
    let engine = engine(&pool);

    engine.start_flow(&request, &user("requester")).await.expect("first start");
    let error = engine.start_flow(&request, &user("requester")).await.expect_err("second start");

    assert_eq!(error.kind(), ErrorKind::InvalidState);
    assert_eq!(count(&pool, "approval_flows").await, 1);
    assert_eq!(count(&pool, "approval_steps").await, 1);
}

#[tokio::test]
async fn start_rejects_missing_closed_and_inactive_requests() {
    let pool = setup().await;
    let engine = engine(&pool);

    let missing = engine
        .start_flow(&request_id("req-missing"), &user("requester"))
        .await
        .expect_err("missing request");
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    let canceled = add_chain(&pool, "rt-canceled", &[(1, 0, Approver::User(user("alice")))]).await;
    sqlx::query("UPDATE ops_requests SET status = 'canceled' WHERE id = ?")
        .bind(&canceled.0)
        .execute(&pool)
        .await
        .expect("cancel request");
    let error = engine.start_flow(&canceled, &user("requester")).await.expect_err("canceled");
    assert_eq!(error.kind(), ErrorKind::InvalidState);

    let inactive = add_chain(&pool, "rt-inactive", &[(1, 0, Approver::User(user("alice")))]).await;
    sqlx::query("UPDATE request_types SET is_active = 0 WHERE id = 'rt-inactive'")
        .execute(&pool)
        .await
        .expect("deactivate");
    let error = engine.start_flow(&inactive, &user("requester")).await.expect_err("inactive");
    assert_eq!(error.kind(), ErrorKind::Configuration);

    assert_eq!(count(&pool, "approval_flows").await, 0);
}

#[tokio::test]
async fn start_sets_the_current_approver_hint() {
    let pool = setup().await;
    let request = add_chain(
        &pool,
        "rt-hint",
        &[(1, 0, Approver::User(user("alice"))), (2, 0, Approver::Group("finance".to_owned()))],
    )
    .await;
    add_user(&pool, "carol", "analyst").await;
    add_member(&pool, "carol", "finance").await;
    let engine = engine(&pool);
    let flow_id = engine.start_flow(&request, &user("requester")).await.expect("start").flow.id;

    let stored = load_request(&pool, &request).await;
    assert_eq!(stored.status, RequestStatus::InReview);
    assert_eq!(stored.current_approval_level, Some(1));
    assert_eq!(stored.current_approver_id, Some(user("alice")));

    engine.approve(&flow_id, &user("alice"), "").await.expect("approve step 1");

    let stored = load_request(&pool, &request).await;
    assert_eq!(stored.current_approval_level, Some(2));
    assert_eq!(stored.current_approver_id, None, "group steps have no single approver");
}

#[tokio::test]
async fn outsider_is_unauthorized_and_nothing_changes() {
    let pool = setup().await;
    let request = add_chain(
        &pool,
        "rt-auth",
        &[(1, 0, Approver::User(user("alice"))), (2, 0, Approver::User(user("bob")))],
    )
    .await;
    add_user(&pool, "mallory", "user").await;
    let engine = engine(&pool);
    let flow_id = engine.start_flow(&request, &user("requester")).await.expect("start").flow.id;

    let before = engine.flow_view(&flow_id).await.expect("view before");
    let logs_before = count(&pool, "approval_logs").await;
    let request_before = load_request(&pool, &request).await;

    let error = engine.approve(&flow_id, &user("mallory"), "").await.expect_err("not entitled");
    assert_eq!(
        error,
        WorkflowError::Unauthorized { user_id: "mallory".to_owned(), step_number: 1 }
    );
    let error = engine.reject(&flow_id, &user("bob"), "").await.expect_err("not bob's turn");
    assert_eq!(error.kind(), ErrorKind::Unauthorized);

    assert_eq!(engine.flow_view(&flow_id).await.expect("view after"), before);
    assert_eq!(count(&pool, "approval_logs").await, logs_before);
    assert_eq!(load_request(&pool, &request).await, request_before);
}

#[tokio::test]
async fn group_members_can_act_on_group_steps() {
    let pool = setup().await;
    let request =
        add_chain(&pool, "rt-group", &[(1, 0, Approver::Group("finance".to_owned()))]).await;
    add_user(&pool, "carol", "analyst").await;
    add_user(&pool, "dave", "finance").await;
    add_member(&pool, "carol", "finance").await;
    let engine = engine(&pool);
    let flow_id = engine.start_flow(&request, &user("requester")).await.expect("start").flow.id;

    let error = engine.approve(&flow_id, &user("dave"), "").await.expect_err("dave not a member");
    assert_eq!(error.kind(), ErrorKind::Unauthorized);

    let receipt = engine.approve(&flow_id, &user("carol"), "").await.expect("carol is a member");
    assert_eq!(receipt.flow_status, FlowStatus::Approved);
}

#[tokio::test]
async fn unprovisioned_membership_store_uses_the_configured_fallback() {
    let pool = setup().await;
    let request =
        add_chain(&pool, "rt-fallback", &[(1, 0, Approver::Group("finance".to_owned()))]).await;
    add_user(&pool, "dave", "finance").await;
    add_user(&pool, "erin", "sales").await;
    sqlx::query("DROP TABLE user_groups").execute(&pool).await.expect("drop user_groups");

    let deny = ApprovalEngine::new(pool.clone(), GroupMembershipResolver::new(GroupFallback::Deny));
    let flow_id = deny.start_flow(&request, &user("requester")).await.expect("start").flow.id;
    let error = deny.approve(&flow_id, &user("dave"), "").await.expect_err("deny policy");
    assert_eq!(error.kind(), ErrorKind::Unauthorized);

    let role = engine(&pool);
    let error = role.approve(&flow_id, &user("erin"), "").await.expect_err("role mismatch");
    assert_eq!(error.kind(), ErrorKind::Unauthorized);
    let receipt = role.approve(&flow_id, &user("dave"), "").await.expect("role matches group");
    assert_eq!(receipt.flow_status, FlowStatus::Approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_approvals_on_one_flow_apply_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = setup_file(dir.path()).await;
    let engine = engine(&pool);

    for round in 0..8 {
        let type_id = format!("rt-race-{round}");
        let request = add_chain(&pool, &type_id, &[(1, 0, Approver::User(user("alice")))]).await;
        let flow_id = engine.start_flow(&request, &user("requester")).await.expect("start").flow.id;

        let decisions = ["first", "second"].map(|note| {
            let engine = engine.clone();
            let flow_id = flow_id.clone();
            tokio::spawn(async move { engine.approve(&flow_id, &user("alice"), note).await })
        });
        let mut outcomes = Vec::new();
        for decision in decisions {
            outcomes.push(decision.await.expect("decision task"));
        }

        let applied = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(applied, 1, "exactly one decision may win: {outcomes:?}");
        let loser = outcomes.iter().find_map(|outcome| outcome.as_ref().err()).expect("one loser");
        assert_eq!(loser.kind(), ErrorKind::InvalidState);

        assert_eq!(
            log_actions(&engine, &flow_id).await,
            vec!["flow_started", "step_approved", "flow_approved"]
        );
        assert_eq!(load_request(&pool, &request).await.status, RequestStatus::Approved);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn decisions_on_independent_flows_all_succeed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = setup_file(dir.path()).await;
    let engine = engine(&pool);

    let mut flows = Vec::new();
    for index in 0..24 {
        let approver = format!("approver-{index}");
        let request = add_chain(
            &pool,
            &format!("rt-parallel-{index}"),
            &[(1, 0, Approver::User(user(&approver)))],
        )
        .await;
        let flow_id = engine.start_flow(&request, &user("requester")).await.expect("start").flow.id;
        flows.push((flow_id, approver));
    }

    let tasks: Vec<_> = flows
        .iter()
        .cloned()
        .map(|(flow_id, approver)| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.approve(&flow_id, &user(&approver), "ok").await })
        })
        .collect();

    let mut failures = Vec::new();
    for task in tasks {
        if let Err(error) = task.await.expect("decision task") {
            failures.push(error);
        }
    }
    assert!(failures.is_empty(), "independent decisions failed: {failures:?}");

    for (flow_id, _) in &flows {
        let view = engine.flow_view(flow_id).await.expect("view");
        assert_eq!(view.flow.status, FlowStatus::Approved);
    }
}

#[tokio::test]
async fn unknown_flow_is_not_found() {
    let pool = setup().await;
    let engine = engine(&pool);
    let missing = FlowId("no-such-flow".to_owned());

    let error = engine.approve(&missing, &user("alice"), "").await.expect_err("missing flow");
    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert_eq!(engine.flow_view(&missing).await.expect_err("view").kind(), ErrorKind::NotFound);
    assert_eq!(engine.list_logs(&missing).await.expect_err("logs").kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn steps_are_a_snapshot_of_configuration() {
    let pool = setup().await;
    let request = add_chain(
        &pool,
        "rt-snap",
        &[
            (2, 0, Approver::User(user("bob"))),
            (1, 5, Approver::User(user("carol"))),
            (1, 1, Approver::User(user("alice"))),
        ],
    )
    .await;
    let engine = engine(&pool);
    let started = engine.start_flow(&request, &user("requester")).await.expect("start");

    let numbers: Vec<u32> = started.steps.iter().map(|step| step.step_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    let approvers: Vec<Option<&UserId>> =
        started.steps.iter().map(|step| step.approver.user_id()).collect();
    assert_eq!(approvers, vec![Some(&user("alice")), Some(&user("carol")), Some(&user("bob"))]);

    sqlx::query("DELETE FROM approver_configs WHERE request_type_id = 'rt-snap'")
        .execute(&pool)
        .await
        .expect("drop configuration");

    let view = engine.flow_for_request(&request).await.expect("lookup").expect("flow exists");
    assert_eq!(view.steps, started.steps);
    assert_eq!(view.current().map(|step| step.step_number), Some(1));
}

#[tokio::test]
async fn audit_log_is_append_only() {
    let pool = setup().await;
    let request = add_chain(&pool, "rt-audit", &[(1, 0, Approver::User(user("alice")))]).await;
    engine(&pool).start_flow(&request, &user("requester")).await.expect("start");

    let update = sqlx::query("UPDATE approval_logs SET note = 'tampered'").execute(&pool).await;
    assert!(update.is_err());
    let delete = sqlx::query("DELETE FROM approval_logs").execute(&pool).await;
    assert!(delete.is_err());
    assert_eq!(count(&pool, "approval_logs").await, 1);
}

#[tokio::test]
async fn engine_is_usable_behind_the_workflow_trait() {
    let pool = setup().await;
    let request = add_chain(&pool, "rt-trait", &[(1, 0, Approver::User(user("alice")))]).await;
    let workflow: Arc<dyn ApprovalWorkflow> = Arc::new(engine(&pool));

    let view = workflow.start_flow(&request, &user("requester")).await.expect("start");
    let receipt = workflow.reject(&view.flow.id, &user("alice"), "duplicate").await.expect("reject");

    assert_eq!(receipt.request_id, request);
    assert_eq!(receipt.flow_status, FlowStatus::Rejected);
}
