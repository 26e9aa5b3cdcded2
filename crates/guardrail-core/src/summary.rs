//! Per-operation outcomes and the run summary that collects them.

use crate::account::AccountTarget;
use crate::control_plane::{ApplyStatus, RecorderStatus};
use crate::error::{ErrorKind, GuardrailError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Change / SkipReason / OutcomeStatus
// ---------------------------------------------------------------------------

/// What a successful operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Created,
    Updated,
    Unchanged,
    Started,
    AlreadyRunning,
}

impl From<ApplyStatus> for Change {
    fn from(status: ApplyStatus) -> Self {
        match status {
            ApplyStatus::Created => Change::Created,
            ApplyStatus::Updated => Change::Updated,
            ApplyStatus::Unchanged => Change::Unchanged,
        }
    }
}

impl From<RecorderStatus> for Change {
    fn from(status: RecorderStatus) -> Self {
        match status {
            RecorderStatus::Started => Change::Started,
            RecorderStatus::AlreadyRunning => Change::AlreadyRunning,
        }
    }
}

impl Change {
    pub fn as_str(&self) -> &'static str {
        match self {
            Change::Created => "created",
            Change::Updated => "updated",
            Change::Unchanged => "unchanged",
            Change::Started => "started",
            Change::AlreadyRunning => "already running",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Excluded by `--only`.
    Filtered,
    /// Planned but not applied.
    DryRun,
    /// The run was cancelled before this account started.
    Cancelled,
    /// A declared dependency failed earlier in the same account.
    DependencyFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Filtered => "filtered",
            SkipReason::DryRun => "dry run",
            SkipReason::Cancelled => "cancelled",
            SkipReason::DependencyFailed => "dependency failed",
        }
    }

    /// Whether this skip still counts as a clean run.
    pub fn is_allowed(&self) -> bool {
        matches!(self, SkipReason::Filtered | SkipReason::DryRun)
    }
}

/// Lifecycle result of one operation on one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success { change: Change },
    Failed { kind: ErrorKind, error: String },
    Skipped { reason: SkipReason },
}

impl OutcomeStatus {
    pub fn failed(err: &GuardrailError) -> Self {
        OutcomeStatus::Failed {
            kind: err.kind(),
            error: err.to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutcomeStatus::Success { .. } => "success",
            OutcomeStatus::Failed { .. } => "failed",
            OutcomeStatus::Skipped { .. } => "skipped",
        }
    }
}

// ---------------------------------------------------------------------------
// OperationOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub team_name: String,
    pub account_id: String,
    /// Position of the account in the source configuration.
    pub account_index: usize,
    pub operation: String,
    /// Position of the operation in the registry.
    pub operation_index: usize,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    /// Control-plane attempts made (0 when nothing was called).
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl OperationOutcome {
    pub fn new(
        target: &AccountTarget,
        operation: &str,
        operation_index: usize,
        status: OutcomeStatus,
        attempts: u32,
    ) -> Self {
        Self {
            team_name: target.team_name.clone(),
            account_id: target.account_id.clone(),
            account_index: target.index,
            operation: operation.to_string(),
            operation_index,
            status,
            attempts,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed { .. })
    }

    /// Success, or a skip that does not make the run unclean.
    pub fn is_acceptable(&self) -> bool {
        match &self.status {
            OutcomeStatus::Success { .. } => true,
            OutcomeStatus::Failed { .. } => false,
            OutcomeStatus::Skipped { reason } => reason.is_allowed(),
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Failed { error, .. } => Some(error.as_str()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Account reference kept so a summary lists every input account, even ones
/// whose outcomes were all skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRef {
    pub index: usize,
    pub team_name: String,
    pub account_id: String,
}

/// Append-only record of a run. Outcomes are kept in the order they were
/// recorded; use [`ordered_outcomes`](Self::ordered_outcomes) for source order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub accounts: Vec<AccountRef>,
    pub outcomes: Vec<OperationOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            accounts: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn add_account(&mut self, target: &AccountTarget) {
        self.accounts.push(AccountRef {
            index: target.index,
            team_name: target.team_name.clone(),
            account_id: target.account_id.clone(),
        });
    }

    pub fn record(&mut self, outcome: OperationOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Outcomes sorted by account source order, then registry order.
    pub fn ordered_outcomes(&self) -> Vec<&OperationOutcome> {
        let mut ordered: Vec<&OperationOutcome> = self.outcomes.iter().collect();
        ordered.sort_by_key(|o| (o.account_index, o.operation_index));
        ordered
    }

    pub fn outcomes_for(&self, team_name: &str) -> Vec<&OperationOutcome> {
        self.ordered_outcomes()
            .into_iter()
            .filter(|o| o.team_name == team_name)
            .collect()
    }

    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for o in &self.outcomes {
            match o.status {
                OutcomeStatus::Success { .. } => totals.success += 1,
                OutcomeStatus::Failed { .. } => totals.failed += 1,
                OutcomeStatus::Skipped { .. } => totals.skipped += 1,
            }
        }
        totals
    }

    /// Teams with at least one outcome that is not success or an allowed skip.
    pub fn unclean_teams(&self) -> Vec<&str> {
        let mut teams: Vec<&str> = Vec::new();
        for account in &self.accounts {
            let unclean = self
                .outcomes
                .iter()
                .any(|o| o.account_index == account.index && !o.is_acceptable());
            if unclean {
                teams.push(account.team_name.as_str());
            }
        }
        teams
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(OperationOutcome::is_acceptable)
    }
}
