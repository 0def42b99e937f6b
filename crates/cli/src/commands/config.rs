use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use claimflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> Result<String> {
    let config = AppConfig::load(LoadOptions::default()).context("config validation failed")?;

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref())?;
    let sources = SourceLookup { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let workflow = &config.workflow;
    let entries: Vec<(&str, String)> = vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("workflow.high_value_threshold", workflow.high_value_threshold.to_string()),
        ("workflow.rule_cache_ttl_secs", workflow.rule_cache_ttl_secs.to_string()),
        ("workflow.manager_due_days", workflow.manager_due_days.to_string()),
        ("workflow.admin_due_days", workflow.admin_due_days.to_string()),
        ("workflow.default_step_due_days", workflow.default_step_due_days.to_string()),
        ("workflow.specific_approver_due_days", workflow.specific_approver_due_days.to_string()),
        ("workflow.empty_step_policy", workflow.empty_step_policy.as_str().to_string()),
        ("workflow.max_action_retries", workflow.max_action_retries.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .iter()
            .map(|(key, value)| render_line(key, value, sources.source_of(key, &env_key(key)))),
    );
    Ok(lines.join("\n"))
}

struct SourceLookup<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

impl SourceLookup<'_> {
    fn source_of(&self, key_path: &str, env_key: &str) -> String {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

/// `workflow.admin_due_days` -> `CLAIMFLOW_WORKFLOW_ADMIN_DUE_DAYS`.
fn env_key(key_path: &str) -> String {
    format!("CLAIMFLOW_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    ["claimflow.toml", "config/claimflow.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Result<Option<Value>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read `{}`", path.display()))?;
    let doc = raw
        .parse::<Value>()
        .with_context(|| format!("could not parse `{}` as TOML", path.display()))?;
    Ok(Some(doc))
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

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, env_key, render_line};

    #[test]
    fn env_keys_follow_the_section_field_convention() {
        assert_eq!(env_key("database.url"), "CLAIMFLOW_DATABASE_URL");
        assert_eq!(
            env_key("workflow.empty_step_policy"),
            "CLAIMFLOW_WORKFLOW_EMPTY_STEP_POLICY"
        );
    }

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: Value = "[workflow]\nmanager_due_days = 4\n".parse().expect("toml");
        assert!(contains_path(&doc, "workflow.manager_due_days"));
        assert!(!contains_path(&doc, "workflow.admin_due_days"));
        assert!(!contains_path(&doc, "logging.level"));
    }

    #[test]
    fn rendered_line_names_the_source() {
        assert_eq!(
            render_line("logging.level", "debug", "default".to_string()),
            "- logging.level = debug (source: default)"
        );
    }
}
