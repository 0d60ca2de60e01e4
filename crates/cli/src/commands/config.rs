use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use expenso_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// Renders every effective setting with the layer it came from.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let override_roles = if config.approvals.override_roles.is_empty() {
        "<none>".to_string()
    } else {
        config
            .approvals
            .override_roles
            .iter()
            .map(|role| role.as_str())
            .collect::<Vec<_>>()
            .join(",")
    };

    let fields = vec![
        field("database.url", config.database.url.clone(), &["EXPENSO_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["EXPENSO_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["EXPENSO_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["EXPENSO_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", config.server.port.to_string(), &["EXPENSO_SERVER_PORT"]),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["EXPENSO_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field("approvals.override_roles", override_roles, &["EXPENSO_APPROVALS_OVERRIDE_ROLES"]),
        field(
            "approvals.empty_chain_policy",
            config.approvals.empty_chain_policy.as_str().to_string(),
            &["EXPENSO_APPROVALS_EMPTY_CHAIN_POLICY"],
        ),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["EXPENSO_LOGGING_LEVEL", "EXPENSO_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["EXPENSO_LOGGING_FORMAT", "EXPENSO_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        lines.push(render_line(key, &value, source(key, env_keys)));
    }
    lines.join("\n")
}

type Field = (&'static str, String, &'static [&'static str]);

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    (key, value, env_keys)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("expenso.toml"), PathBuf::from("config/expenso.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
