use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use expenso_cli::commands::{check_matrix, config, migrate, route};
use serde_json::Value;
use tempfile::TempDir;

const THREE_LEVEL_SCENARIO: &str = r#"
company_id = "acme"
currency = "INR"

[matrix.level3]
roles = ["FINANCE_MANAGER"]

[[users]]
id = "emp-1"
manager = "mgr-1"
roles = ["EMPLOYEE"]

[[users]]
id = "mgr-1"
roles = ["MANAGER"]

[[users]]
id = "bh-1"
roles = ["BUSINESS_HEAD"]

[[users]]
id = "fin-1"
roles = ["FINANCE_MANAGER"]

[report]
id = "R-100"
owner = "emp-1"
expenses = ["45000", "15000"]

[[actions]]
actor = "mgr-1"
decision = "approve"

[[actions]]
actor = "bh-1"
decision = "approve"

[[actions]]
actor = "fin-1"
decision = "approve"
comment = "within budget"
"#;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("EXPENSO_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("EXPENSO_DATABASE_URL", "postgres://localhost/expenso")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_env_sources() {
    with_env(&[("EXPENSO_APPROVALS_OVERRIDE_ROLES", "SUPER_ADMIN")], || {
        let output = config::run();
        assert!(output.contains(
            "- approvals.override_roles = SUPER_ADMIN (source: env (EXPENSO_APPROVALS_OVERRIDE_ROLES))"
        ));
        assert!(output.contains("- approvals.empty_chain_policy = auto_approve (source: default)"));
    });
}

#[test]
fn check_matrix_accepts_monotonic_prefix() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_file(
        &dir,
        "matrix.toml",
        r#"
[level3]
roles = ["ACCOUNTANT"]

[level4]
roles = ["FINANCE_MANAGER", "custom:cfo-office"]
"#,
    );

    let result = check_matrix::run(&path);
    assert_eq!(result.exit_code, 0, "{}", result.output);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["data"]["enabled_levels"], serde_json::json!(["L1", "L2", "L3", "L4"]));
}

#[test]
fn check_matrix_rejects_gap_in_levels() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_file(
        &dir,
        "matrix.toml",
        r#"
[level4]
roles = ["FINANCE_MANAGER"]
"#,
    );

    let result = check_matrix::run(&path);
    assert_eq!(result.exit_code, 7);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["error_class"], "configuration");
    assert!(payload["message"].as_str().unwrap_or_default().starts_with("MATRIX_INVARIANT"));
}

#[test]
fn check_matrix_rejects_unknown_role_label() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_file(&dir, "matrix.toml", "[level3]\nroles = [\"JANITOR\"]\n");

    let result = check_matrix::run(&path);
    assert_eq!(result.exit_code, 6);
    assert_eq!(parse_payload(&result.output)["error_class"], "input");
}

#[test]
fn route_walks_three_level_chain_to_approval() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let path = write_file(&dir, "scenario.toml", THREE_LEVEL_SCENARIO);

        let result = route::run(&path);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        let data = &payload["data"];
        assert_eq!(data["submitted"]["status"], "PENDING_APPROVAL_L1");
        assert_eq!(data["submitted"]["version"], 2);

        let approvers: Vec<&str> = data["submitted"]["approvers"]
            .as_array()
            .expect("approvers array")
            .iter()
            .map(|entry| entry["approver_id"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(approvers, vec!["mgr-1", "bh-1", "fin-1"]);

        assert_eq!(data["steps"].as_array().map(Vec::len), Some(3));
        assert_eq!(data["final"]["status"], "APPROVED");
        assert_eq!(data["final"]["version"], 5);
        assert_eq!(data["audit_events"], 4);
    });
}

#[test]
fn route_stops_at_first_rejected_step() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let scenario = THREE_LEVEL_SCENARIO.replace(
            "actor = \"bh-1\"\ndecision = \"approve\"",
            "actor = \"bh-1\"\ndecision = \"reject\"",
        );
        let path = write_file(&dir, "scenario.toml", &scenario);

        let result = route::run(&path);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let data = &parse_payload(&result.output)["data"];
        let steps = data["steps"].as_array().expect("steps array");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1]["error_code"], "VALIDATION_ERROR");
        assert_eq!(data["final"]["status"], "PENDING_APPROVAL_L2");
    });
}

#[test]
fn route_fails_submission_on_ambiguous_business_head() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let scenario = THREE_LEVEL_SCENARIO.replace(
            "[report]",
            "[[users]]\nid = \"bh-2\"\nroles = [\"BUSINESS_HEAD\"]\n\n[report]",
        );
        let path = write_file(&dir, "scenario.toml", &scenario);

        let result = route::run(&path);
        assert_eq!(result.exit_code, 7);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "CONFIGURATION_ERROR");
    });
}

#[test]
fn route_auto_approves_below_threshold() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let scenario = THREE_LEVEL_SCENARIO.replace(
            "currency = \"INR\"\n",
            "currency = \"INR\"\n\n[flow]\nauto_approve_threshold = \"100000\"\n",
        );
        let path = write_file(&dir, "scenario.toml", &scenario);

        let result = route::run(&path);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let data = &parse_payload(&result.output)["data"];
        assert_eq!(data["submitted"]["status"], "APPROVED");
        assert_eq!(data["submitted"]["approvers"].as_array().map(Vec::len), Some(0));
    });
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write scenario file");
    path
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let keys = [
        "EXPENSO_DATABASE_URL",
        "EXPENSO_DATABASE_MAX_CONNECTIONS",
        "EXPENSO_DATABASE_TIMEOUT_SECS",
        "EXPENSO_SERVER_BIND_ADDRESS",
        "EXPENSO_SERVER_PORT",
        "EXPENSO_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "EXPENSO_APPROVALS_OVERRIDE_ROLES",
        "EXPENSO_APPROVALS_EMPTY_CHAIN_POLICY",
        "EXPENSO_LOGGING_LEVEL",
        "EXPENSO_LOGGING_FORMAT",
        "EXPENSO_LOG_LEVEL",
        "EXPENSO_LOG_FORMAT",
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
