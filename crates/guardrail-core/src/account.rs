//! Target accounts, validated once from the static configuration.

use crate::config::Config;
use crate::error::{GuardrailError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One member account to deploy into. Immutable for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTarget {
    /// Position in the source configuration (0-based).
    pub index: usize,
    pub team_name: String,
    pub account_id: String,
    pub budget_limit: f64,
    pub team_email: String,
    pub assume_role_name: String,
}

/// Ordered, validated account list.
///
/// `iter()` can be called any number of times and always yields accounts in
/// the order they appear in the configuration.
#[derive(Debug, Clone)]
pub struct AccountSource {
    targets: Vec<AccountTarget>,
}

impl AccountSource {
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.accounts.is_empty() {
            return Err(GuardrailError::Config("accounts list is empty".into()));
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(config.accounts.len());

        for (index, entry) in config.accounts.iter().enumerate() {
            let team_name = entry.team_name.trim();
            if team_name.is_empty() {
                return Err(GuardrailError::Config(format!(
                    "accounts[{index}]: teamName is empty"
                )));
            }
            if entry.account_id.trim().is_empty() {
                return Err(GuardrailError::Config(format!(
                    "accounts[{index}] ({team_name}): accountId is empty"
                )));
            }
            if entry.team_email.trim().is_empty() {
                return Err(GuardrailError::Config(format!(
                    "accounts[{index}] ({team_name}): teamEmail is empty"
                )));
            }
            if !entry.budget_limit.is_finite() || entry.budget_limit <= 0.0 {
                return Err(GuardrailError::Config(format!(
                    "accounts[{index}] ({team_name}): budgetLimit must be positive, got {}",
                    entry.budget_limit
                )));
            }
            if !seen.insert(team_name.to_string()) {
                return Err(GuardrailError::DuplicateTeam(team_name.to_string()));
            }

            targets.push(AccountTarget {
                index,
                team_name: team_name.to_string(),
                account_id: entry.account_id.trim().to_string(),
                budget_limit: entry.budget_limit,
                team_email: entry.team_email.trim().to_string(),
                assume_role_name: config.assume_role_name.clone(),
            });
        }

        Ok(Self { targets })
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccountTarget> + '_ {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn get(&self, team_name: &str) -> Option<&AccountTarget> {
        self.targets.iter().find(|t| t.team_name == team_name)
    }

    /// Validate an `--only` filter. Returns the selected team name, or an
    /// error when it names a team that is not configured.
    pub fn select(&self, only: Option<&str>) -> Result<Selection> {
        match only {
            None => Ok(Selection::All),
            Some(team) => {
                if self.get(team).is_none() {
                    return Err(GuardrailError::UnknownTeam(team.to_string()));
                }
                Ok(Selection::Only(team.to_string()))
            }
        }
    }
}

/// Which accounts a run should actually deploy into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Only(String),
}

impl Selection {
    pub fn includes(&self, target: &AccountTarget) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(team) => target.team_name == *team,
        }
    }
}
