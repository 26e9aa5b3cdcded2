use crate::error::{GuardrailError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIN_CREDENTIAL_TTL_SECS: u64 = 900;
pub const MAX_CREDENTIAL_TTL_SECS: u64 = 43_200;
/// Upper bound for `deployment.maxRetries`.
pub const MAX_RETRIES: u32 = 10;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// DependencyPolicy
// ---------------------------------------------------------------------------

/// What to do with an operation whose declared dependency failed earlier in
/// the same account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    /// Attempt the operation anyway.
    #[default]
    Continue,
    /// Record it as skipped.
    Skip,
}

// ---------------------------------------------------------------------------
// DeploymentSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeploymentSettings {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_ttl")]
    pub credential_ttl_seconds: u64,
    /// Retries after the first attempt for transient failures.
    /// `0` means one attempt, `2` means up to three attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff")]
    pub retry_backoff_seconds: u64,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
    #[serde(default = "default_recorder_name")]
    pub recorder_name: String,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    #[serde(default)]
    pub on_dependency_failure: DependencyPolicy,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_ttl() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff() -> u64 {
    2
}

fn default_call_timeout() -> u64 {
    900
}

fn default_recorder_name() -> String {
    "default".to_string()
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            region: default_region(),
            credential_ttl_seconds: default_ttl(),
            max_retries: default_max_retries(),
            retry_backoff_seconds: default_backoff(),
            call_timeout_seconds: default_call_timeout(),
            recorder_name: default_recorder_name(),
            templates_dir: default_templates_dir(),
            on_dependency_failure: DependencyPolicy::default(),
        }
    }
}

impl DeploymentSettings {
    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}

// ---------------------------------------------------------------------------
// AccountEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AccountEntry {
    pub team_name: String,
    #[serde(deserialize_with = "deserialize_account_id")]
    pub account_id: String,
    #[serde(default = "default_budget_limit")]
    pub budget_limit: f64,
    pub team_email: String,
}

fn default_budget_limit() -> f64 {
    500.0
}

/// Account ids are 12-digit strings; YAML happily reads an unquoted id as an
/// integer, so accept both and restore the leading zeros.
fn deserialize_account_id<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(d)? {
        Raw::Text(s) => s,
        Raw::Number(n) => format!("{n:012}"),
    })
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub cloud_team_email: String,
    #[serde(default = "default_assume_role_name")]
    pub assume_role_name: String,
    pub accounts: Vec<AccountEntry>,
    #[serde(default)]
    pub deployment: DeploymentSettings,
    /// Directory the config was loaded from; relative paths resolve against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_assume_role_name() -> String {
    "OrganizationAccountAccessRole".to_string()
}

impl Config {
    /// Load and validate a configuration file. YAML and JSON are both accepted.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            GuardrailError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut cfg = Self::parse(&data)?;
        cfg.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(cfg)
    }

    pub fn parse(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolved templates directory.
    pub fn templates_dir(&self) -> PathBuf {
        if self.deployment.templates_dir.is_absolute() {
            self.deployment.templates_dir.clone()
        } else {
            self.base_dir.join(&self.deployment.templates_dir)
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Hard errors. Account-level checks (duplicates, budgets) live in
    /// `AccountSource::from_config`.
    pub fn validate(&self) -> Result<()> {
        if self.cloud_team_email.trim().is_empty() {
            return Err(GuardrailError::Config("cloudTeamEmail is empty".into()));
        }
        if self.assume_role_name.trim().is_empty() {
            return Err(GuardrailError::Config("assumeRoleName is empty".into()));
        }
        let d = &self.deployment;
        if d.region.trim().is_empty() {
            return Err(GuardrailError::Config("deployment.region is empty".into()));
        }
        if !(MIN_CREDENTIAL_TTL_SECS..=MAX_CREDENTIAL_TTL_SECS).contains(&d.credential_ttl_seconds)
        {
            return Err(GuardrailError::Config(format!(
                "deployment.credentialTtlSeconds={} must be within {MIN_CREDENTIAL_TTL_SECS}..={MAX_CREDENTIAL_TTL_SECS}",
                d.credential_ttl_seconds
            )));
        }
        if d.max_retries > MAX_RETRIES {
            return Err(GuardrailError::Config(format!(
                "deployment.maxRetries={} must be at most {MAX_RETRIES}",
                d.max_retries
            )));
        }
        if d.call_timeout_seconds == 0 {
            return Err(GuardrailError::Config(
                "deployment.callTimeoutSeconds must be greater than zero".into(),
            ));
        }
        if d.recorder_name.trim().is_empty() {
            return Err(GuardrailError::Config(
                "deployment.recorderName is empty".into(),
            ));
        }
        Ok(())
    }

    /// Soft findings that do not block a run.
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for entry in &self.accounts {
            if !entry.team_email.contains('@') {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "teamEmail '{}' for team '{}' does not look like an address",
                        entry.team_email, entry.team_name
                    ),
                });
            }
            if entry.account_id.len() != 12 || !entry.account_id.chars().all(|c| c.is_ascii_digit())
            {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "accountId '{}' for team '{}' is not a 12-digit id",
                        entry.account_id, entry.team_name
                    ),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
