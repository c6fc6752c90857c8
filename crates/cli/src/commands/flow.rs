use std::future::Future;

use anyhow::Context;
use serde_json::{json, Value};

use crate::commands::{prepare, workflow_exit_code, CommandResult};
use opsflow_core::config::AppConfig;
use opsflow_core::domain::approval::FlowId;
use opsflow_core::domain::request::{RequestId, UserId};
use opsflow_core::errors::WorkflowError;
use opsflow_db::{connect_with_settings, migrations, ApprovalEngine, ApprovalWorkflow};

pub fn start(request_id: String, started_by: String) -> CommandResult {
    execute("flow start", |engine| async move {
        let view = engine.start_flow(&RequestId(request_id), &UserId(started_by)).await?;
        let message = format!(
            "approval flow {} started with {} step(s)",
            view.flow.id,
            view.steps.len()
        );
        Ok((message, serde_json::to_value(&view)?))
    })
}

pub fn approve(flow_id: String, user_id: String, note: String) -> CommandResult {
    execute("flow approve", |engine| async move {
        let receipt = engine.approve(&FlowId(flow_id), &UserId(user_id), &note).await?;
        let message = format!(
            "step {} approved; flow is {}",
            receipt.step_number,
            receipt.flow_status.as_str()
        );
        Ok((message, serde_json::to_value(&receipt)?))
    })
}

pub fn reject(flow_id: String, user_id: String, reason: String) -> CommandResult {
    execute("flow reject", |engine| async move {
        let receipt = engine.reject(&FlowId(flow_id), &UserId(user_id), &reason).await?;
        let message = format!("step {} rejected; flow is rejected", receipt.step_number);
        Ok((message, serde_json::to_value(&receipt)?))
    })
}

pub fn show(flow_id: String, with_logs: bool) -> CommandResult {
    execute("flow show", |engine| async move {
        let flow_id = FlowId(flow_id);
        let view = engine.flow_view(&flow_id).await?;
        let message = format!(
            "flow {} is {} at step {} of {}",
            view.flow.id,
            view.flow.status.as_str(),
            view.flow.current_step,
            view.steps.len()
        );

        let mut data = json!({ "flow": view.flow, "steps": view.steps });
        if with_logs {
            data["logs"] = serde_json::to_value(engine.list_logs(&flow_id).await?)?;
        }
        Ok((message, data))
    })
}

fn execute<F, Fut>(command: &'static str, operation: F) -> CommandResult
where
    F: FnOnce(ApprovalEngine) -> Fut,
    Fut: Future<Output = anyhow::Result<(String, Value)>>,
{
    let (config, runtime) = match prepare(command) {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let engine = match open_engine(&config).await {
            Ok(engine) => engine,
            Err(error) => {
                return CommandResult::failure(command, "db_connectivity", format!("{error:#}"), 4);
            }
        };

        match operation(engine).await {
            Ok((message, data)) => CommandResult::success_with_data(command, message, Some(data)),
            Err(error) => classify(command, &error),
        }
    })
}

async fn open_engine(config: &AppConfig) -> anyhow::Result<ApprovalEngine> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .with_context(|| format!("failed to open database `{}`", config.database.url))?;
    migrations::run_pending(&pool).await.context("failed to apply pending migrations")?;

    Ok(ApprovalEngine::from_config(pool, config))
}

fn classify(command: &str, error: &anyhow::Error) -> CommandResult {
    match error.downcast_ref::<WorkflowError>() {
        Some(workflow_error) => {
            let kind = workflow_error.kind();
            CommandResult::failure(
                command,
                kind.as_str(),
                workflow_error.to_string(),
                workflow_exit_code(kind),
            )
        }
        None => CommandResult::failure(command, "internal", format!("{error:#}"), 1),
    }
}
