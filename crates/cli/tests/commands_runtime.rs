use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use opsflow_cli::commands::{config, flow, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    let vars = [("OPSFLOW_DATABASE_URL", "sqlite::memory:"), ("OPSFLOW_DATABASE_MAX_CONNECTIONS", "1")];
    with_env(&vars, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.ends_with("schema at version 20250912000000"), "{message}");
    });
}

#[test]
fn migrate_returns_config_failure_for_unsupported_database() {
    with_env(&[("OPSFLOW_DATABASE_URL", "postgres://localhost/opsflow")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(dir.path());

    with_env(&[("OPSFLOW_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success: {}", first.output);
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");

        let message = first_payload["message"].as_str().unwrap_or("");
        assert!(message.starts_with("demo approval data loaded:"));
        assert!(message.contains("req-demo-001 (rt-expense)"));
        assert!(message.contains("req-demo-002 (rt-legacy)"));

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn flow_commands_drive_the_seeded_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(dir.path());

    with_env(&[("OPSFLOW_DATABASE_URL", url.as_str())], || {
        assert_eq!(seed::run().exit_code, 0);

        let started = flow::start("req-demo-001".to_string(), "u-dave".to_string());
        assert_eq!(started.exit_code, 0, "start failed: {}", started.output);
        let started_payload = parse_payload(&started.output);
        assert_eq!(started_payload["command"], "flow start");
        let flow_id = started_payload["data"]["flow"]["id"]
            .as_str()
            .expect("flow id in start payload")
            .to_string();
        assert_eq!(started_payload["data"]["steps"].as_array().map(Vec::len), Some(3));

        let outsider = flow::approve(flow_id.clone(), "u-dave".to_string(), String::new());
        assert_eq!(outsider.exit_code, 12);
        assert_eq!(parse_payload(&outsider.output)["error_class"], "unauthorized");

        let approved = flow::approve(flow_id.clone(), "u-alice".to_string(), "ok".to_string());
        assert_eq!(approved.exit_code, 0, "approve failed: {}", approved.output);
        let approved_payload = parse_payload(&approved.output);
        assert_eq!(approved_payload["data"]["step_number"], 1);
        assert_eq!(approved_payload["data"]["current_step"], 2);

        let shown = flow::show(flow_id.clone(), true);
        assert_eq!(shown.exit_code, 0, "show failed: {}", shown.output);
        let shown_payload = parse_payload(&shown.output);
        assert_eq!(shown_payload["data"]["flow"]["current_step"], 2);
        let actions: Vec<&str> = shown_payload["data"]["logs"]
            .as_array()
            .expect("logs")
            .iter()
            .filter_map(|log| log["action"].as_str())
            .collect();
        assert_eq!(actions, ["flow_started", "step_approved", "moved_to_next_step"]);

        let rejected = flow::reject(flow_id, "u-carol".to_string(), "over budget".to_string());
        assert_eq!(rejected.exit_code, 0, "reject failed: {}", rejected.output);
        assert_eq!(parse_payload(&rejected.output)["data"]["flow_status"], "rejected");
    });
}

#[test]
fn flow_start_maps_workflow_errors_to_exit_codes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(dir.path());

    with_env(&[("OPSFLOW_DATABASE_URL", url.as_str())], || {
        assert_eq!(seed::run().exit_code, 0);

        let inactive = flow::start("req-demo-002".to_string(), "u-dave".to_string());
        assert_eq!(inactive.exit_code, 11);
        assert_eq!(parse_payload(&inactive.output)["error_class"], "configuration");

        let missing = flow::show("no-such-flow".to_string(), false);
        assert_eq!(missing.exit_code, 10);
        assert_eq!(parse_payload(&missing.output)["error_class"], "not_found");
    });
}

#[test]
fn config_reports_env_sources() {
    with_env(
        &[
            ("OPSFLOW_DATABASE_URL", "sqlite::memory:"),
            ("OPSFLOW_WORKFLOW_GROUP_FALLBACK", "deny"),
        ],
        || {
            let output = config::run();

            assert!(output
                .contains("- database.url = sqlite::memory: (source: env (OPSFLOW_DATABASE_URL))"));
            assert!(output.contains(
                "- workflow.group_fallback = deny (source: env (OPSFLOW_WORKFLOW_GROUP_FALLBACK))"
            ));
            assert!(output.contains("- logging.level = info (source: default)"));
        },
    );
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", dir.join("opsflow.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "OPSFLOW_DATABASE_URL",
        "OPSFLOW_DATABASE_MAX_CONNECTIONS",
        "OPSFLOW_DATABASE_TIMEOUT_SECS",
        "OPSFLOW_LOGGING_LEVEL",
        "OPSFLOW_LOGGING_FORMAT",
        "OPSFLOW_LOG_LEVEL",
        "OPSFLOW_LOG_FORMAT",
        "OPSFLOW_WORKFLOW_GROUP_FALLBACK",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
