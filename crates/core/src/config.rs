use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Tunables for workflow construction and approver actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Converted amount above which the default workflow adds an Admin step.
    pub high_value_threshold: Decimal,
    pub rule_cache_ttl_secs: u64,
    pub manager_due_days: u32,
    pub admin_due_days: u32,
    pub default_step_due_days: u32,
    pub specific_approver_due_days: u32,
    pub empty_step_policy: EmptyStepPolicy,
    pub max_action_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// What happens when a required step resolves to nobody.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyStepPolicy {
    #[default]
    Fail,
    Skip,
}

impl EmptyStepPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Skip => "skip",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub empty_step_policy: Option<EmptyStepPolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://claimflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            high_value_threshold: Decimal::new(1000, 0),
            rule_cache_ttl_secs: 300,
            manager_due_days: 2,
            admin_due_days: 3,
            default_step_due_days: 3,
            specific_approver_due_days: 1,
            empty_step_policy: EmptyStepPolicy::Fail,
            max_action_retries: 3,
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl FromStr for EmptyStepPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "skip" => Ok(Self::Skip),
            other => Err(ConfigError::Validation(format!(
                "unsupported empty step policy `{other}` (expected fail|skip)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("claimflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(threshold) = workflow.high_value_threshold {
                self.workflow.high_value_threshold = threshold;
            }
            if let Some(ttl) = workflow.rule_cache_ttl_secs {
                self.workflow.rule_cache_ttl_secs = ttl;
            }
            if let Some(days) = workflow.manager_due_days {
                self.workflow.manager_due_days = days;
            }
            if let Some(days) = workflow.admin_due_days {
                self.workflow.admin_due_days = days;
            }
            if let Some(days) = workflow.default_step_due_days {
                self.workflow.default_step_due_days = days;
            }
            if let Some(days) = workflow.specific_approver_due_days {
                self.workflow.specific_approver_due_days = days;
            }
            if let Some(policy) = workflow.empty_step_policy {
                self.workflow.empty_step_policy = policy;
            }
            if let Some(retries) = workflow.max_action_retries {
                self.workflow.max_action_retries = retries;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CLAIMFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CLAIMFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CLAIMFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CLAIMFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CLAIMFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CLAIMFLOW_WORKFLOW_HIGH_VALUE_THRESHOLD") {
            self.workflow.high_value_threshold =
                parse_decimal("CLAIMFLOW_WORKFLOW_HIGH_VALUE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("CLAIMFLOW_WORKFLOW_RULE_CACHE_TTL_SECS") {
            self.workflow.rule_cache_ttl_secs =
                parse_u64("CLAIMFLOW_WORKFLOW_RULE_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("CLAIMFLOW_WORKFLOW_MANAGER_DUE_DAYS") {
            self.workflow.manager_due_days =
                parse_u32("CLAIMFLOW_WORKFLOW_MANAGER_DUE_DAYS", &value)?;
        }
        if let Some(value) = read_env("CLAIMFLOW_WORKFLOW_ADMIN_DUE_DAYS") {
            self.workflow.admin_due_days = parse_u32("CLAIMFLOW_WORKFLOW_ADMIN_DUE_DAYS", &value)?;
        }
        if let Some(value) = read_env("CLAIMFLOW_WORKFLOW_DEFAULT_STEP_DUE_DAYS") {
            self.workflow.default_step_due_days =
                parse_u32("CLAIMFLOW_WORKFLOW_DEFAULT_STEP_DUE_DAYS", &value)?;
        }
        if let Some(value) = read_env("CLAIMFLOW_WORKFLOW_SPECIFIC_APPROVER_DUE_DAYS") {
            self.workflow.specific_approver_due_days =
                parse_u32("CLAIMFLOW_WORKFLOW_SPECIFIC_APPROVER_DUE_DAYS", &value)?;
        }
        if let Some(value) = read_env("CLAIMFLOW_WORKFLOW_EMPTY_STEP_POLICY") {
            self.workflow.empty_step_policy = value.parse()?;
        }
        if let Some(value) = read_env("CLAIMFLOW_WORKFLOW_MAX_ACTION_RETRIES") {
            self.workflow.max_action_retries =
                parse_u32("CLAIMFLOW_WORKFLOW_MAX_ACTION_RETRIES", &value)?;
        }

        let log_level =
            read_env("CLAIMFLOW_LOGGING_LEVEL").or_else(|| read_env("CLAIMFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CLAIMFLOW_LOGGING_FORMAT").or_else(|| read_env("CLAIMFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(policy) = overrides.empty_step_policy {
            self.workflow.empty_step_policy = policy;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("claimflow.toml"), PathBuf::from("config/claimflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.high_value_threshold.is_sign_negative() {
        return Err(ConfigError::Validation(
            "workflow.high_value_threshold must not be negative".to_string(),
        ));
    }

    if workflow.rule_cache_ttl_secs > 86_400 {
        return Err(ConfigError::Validation(
            "workflow.rule_cache_ttl_secs must be in range 0..=86400".to_string(),
        ));
    }

    let due_days = [
        ("workflow.manager_due_days", workflow.manager_due_days),
        ("workflow.admin_due_days", workflow.admin_due_days),
        ("workflow.default_step_due_days", workflow.default_step_due_days),
        ("workflow.specific_approver_due_days", workflow.specific_approver_due_days),
    ];
    for (key, days) in due_days {
        if days == 0 || days > 365 {
            return Err(ConfigError::Validation(format!("{key} must be in range 1..=365")));
        }
    }

    if workflow.max_action_retries == 0 || workflow.max_action_retries > 10 {
        return Err(ConfigError::Validation(
            "workflow.max_action_retries must be in range 1..=10".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    high_value_threshold: Option<Decimal>,
    rule_cache_ttl_secs: Option<u64>,
    manager_due_days: Option<u32>,
    admin_due_days: Option<u32>,
    default_step_due_days: Option<u32>,
    specific_approver_due_days: Option<u32>,
    empty_step_policy: Option<EmptyStepPolicy>,
    max_action_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
