//! Sequential cross-account deployment.
//!
//! Accounts are processed one at a time, in source order. Each account gets
//! its own freshly assumed credential, which is dropped before the next
//! account starts. A failure in one account never stops the run: it is
//! recorded in the summary and the loop moves on.

use crate::account::{AccountSource, AccountTarget, Selection};
use crate::config::{Config, DependencyPolicy};
use crate::control_plane::{ControlPlane, StackRequest};
use crate::credentials::{CredentialBroker, ScopedCredential};
use crate::error::{GuardrailError, Result};
use crate::operation::{OperationKind, OperationRegistry, OperationSpec, TemplateContext};
use crate::retry::{bounded, RetryPolicy};
use crate::summary::{Change, OperationOutcome, OutcomeStatus, RunSummary, SkipReason};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    pub selection: Selection,
    pub region: String,
    pub cloud_team_email: String,
    pub templates_dir: PathBuf,
    pub credential_ttl: Duration,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub on_dependency_failure: DependencyPolicy,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        let d = &config.deployment;
        Self {
            dry_run: false,
            selection: Selection::All,
            region: d.region.clone(),
            cloud_team_email: config.cloud_team_email.clone(),
            templates_dir: config.templates_dir(),
            credential_ttl: d.credential_ttl(),
            call_timeout: d.call_timeout(),
            retry: RetryPolicy::from(d),
            on_dependency_failure: d.on_dependency_failure,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }
}

// ---------------------------------------------------------------------------
// DeploymentOrchestrator
// ---------------------------------------------------------------------------

pub struct DeploymentOrchestrator {
    control_plane: Arc<dyn ControlPlane>,
    broker: CredentialBroker,
    options: RunOptions,
    cancel: CancellationToken,
}

impl DeploymentOrchestrator {
    pub fn new(control_plane: Arc<dyn ControlPlane>, options: RunOptions) -> Self {
        let broker = CredentialBroker::new(control_plane.clone(), options.call_timeout);
        Self {
            control_plane,
            broker,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one cancelled from a Ctrl-C handler.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Deploy every operation to every selected account.
    ///
    /// Cancellation is only honoured between accounts; an account that has
    /// started is always finished. Every input account appears in the
    /// returned summary with one outcome per operation.
    pub async fn run(&self, accounts: &AccountSource, registry: &OperationRegistry) -> RunSummary {
        let mut summary = RunSummary::new(self.options.dry_run);
        info!(
            run_id = %summary.run_id,
            accounts = accounts.len(),
            operations = registry.len(),
            dry_run = self.options.dry_run,
            "starting deployment run"
        );

        for target in accounts.iter() {
            summary.add_account(target);

            if self.cancel.is_cancelled() {
                warn!(team = %target.team_name, "run cancelled, skipping account");
                skip_all(target, registry, SkipReason::Cancelled, &mut summary);
                continue;
            }
            if !self.options.selection.includes(target) {
                debug!(team = %target.team_name, "account filtered out");
                skip_all(target, registry, SkipReason::Filtered, &mut summary);
                continue;
            }
            if self.options.dry_run {
                self.plan_account(target, registry, &mut summary);
                continue;
            }

            self.deploy_account(target, registry, &mut summary).await;
        }

        summary.finalize();
        let totals = summary.totals();
        info!(
            run_id = %summary.run_id,
            success = totals.success,
            failed = totals.failed,
            skipped = totals.skipped,
            "deployment run finished"
        );
        summary
    }

    fn template_context<'a>(&'a self, target: &'a AccountTarget) -> TemplateContext<'a> {
        TemplateContext {
            target,
            cloud_team_email: &self.options.cloud_team_email,
            region: &self.options.region,
        }
    }

    fn plan_account(
        &self,
        target: &AccountTarget,
        registry: &OperationRegistry,
        summary: &mut RunSummary,
    ) {
        let ctx = self.template_context(target);
        for (index, op) in registry.list_operations().iter().enumerate() {
            let status = match op.resolve_parameters(&ctx) {
                Ok(parameters) => {
                    info!(
                        team = %target.team_name,
                        account_id = %target.account_id,
                        operation = %op.name,
                        template = op.template_ref().unwrap_or("-"),
                        ?parameters,
                        "planned"
                    );
                    OutcomeStatus::Skipped {
                        reason: SkipReason::DryRun,
                    }
                }
                Err(e) => OutcomeStatus::failed(&e),
            };
            summary.record(OperationOutcome::new(target, &op.name, index, status, 0));
        }
    }

    async fn deploy_account(
        &self,
        target: &AccountTarget,
        registry: &OperationRegistry,
        summary: &mut RunSummary,
    ) {
        info!(
            team = %target.team_name,
            account_id = %target.account_id,
            role = %target.assume_role_name,
            "deploying account"
        );

        let (acquired, attempts) = self
            .broker
            .acquire_with_retry(target, self.options.credential_ttl, &self.options.retry)
            .await;
        let mut credential = match acquired {
            Ok(credential) => credential,
            Err(e) => {
                error!(
                    team = %target.team_name,
                    account_id = %target.account_id,
                    attempts,
                    error = %e,
                    "could not acquire credentials, failing all operations for account"
                );
                for (index, op) in registry.list_operations().iter().enumerate() {
                    summary.record(OperationOutcome::new(
                        target,
                        &op.name,
                        index,
                        OutcomeStatus::failed(&e),
                        attempts,
                    ));
                }
                return;
            }
        };

        let mut failed: HashSet<&str> = HashSet::new();
        for (index, op) in registry.list_operations().iter().enumerate() {
            if self.options.on_dependency_failure == DependencyPolicy::Skip
                && op.depends_on.iter().any(|d| failed.contains(d.as_str()))
            {
                warn!(team = %target.team_name, operation = %op.name, "dependency failed, skipping");
                failed.insert(op.name.as_str());
                summary.record(OperationOutcome::new(
                    target,
                    &op.name,
                    index,
                    OutcomeStatus::Skipped {
                        reason: SkipReason::DependencyFailed,
                    },
                    0,
                ));
                continue;
            }

            if credential.is_expired_at(Utc::now()) {
                info!(team = %target.team_name, "credential expired, re-assuming role");
                match self
                    .broker
                    .acquire_with_retry(target, self.options.credential_ttl, &self.options.retry)
                    .await
                {
                    (Ok(fresh), _) => credential = fresh,
                    (Err(e), attempts) => {
                        failed.insert(op.name.as_str());
                        summary.record(OperationOutcome::new(
                            target,
                            &op.name,
                            index,
                            OutcomeStatus::failed(&e),
                            attempts,
                        ));
                        continue;
                    }
                }
            }

            let (result, attempts) = self.apply(target, op, &credential).await;
            let status = match result {
                Ok(change) => {
                    info!(
                        team = %target.team_name,
                        operation = %op.name,
                        change = change.as_str(),
                        attempts,
                        "operation succeeded"
                    );
                    OutcomeStatus::Success { change }
                }
                Err(e) => {
                    warn!(
                        team = %target.team_name,
                        operation = %op.name,
                        attempts,
                        error = %e,
                        "operation failed"
                    );
                    failed.insert(op.name.as_str());
                    OutcomeStatus::failed(&e)
                }
            };
            summary.record(OperationOutcome::new(target, &op.name, index, status, attempts));
        }

        drop(credential);
        debug!(team = %target.team_name, "scoped credential discarded");
    }

    /// Run one operation against one account. Returns the result and the
    /// number of control-plane attempts made.
    async fn apply(
        &self,
        target: &AccountTarget,
        op: &OperationSpec,
        credential: &ScopedCredential,
    ) -> (Result<Change>, u32) {
        if let Err(e) = credential.ensure_for(&target.account_id) {
            return (Err(e), 0);
        }
        let parameters = match op.resolve_parameters(&self.template_context(target)) {
            Ok(p) => p,
            Err(e) => return (Err(e), 0),
        };

        let control_plane = self.control_plane.as_ref();
        let limit = self.options.call_timeout;
        let what = op.name.as_str();

        match &op.kind {
            OperationKind::DeployStack {
                stack_name,
                template_ref,
            } => {
                let request = StackRequest {
                    stack_name: stack_name.clone(),
                    template_path: self.options.templates_dir.join(template_ref),
                    parameters,
                    region: self.options.region.clone(),
                };
                let request = &request;
                let (result, attempts) = self
                    .options
                    .retry
                    .run(what, move || {
                        bounded(
                            limit,
                            what,
                            control_plane.apply_declarative_infra(credential, request),
                        )
                    })
                    .await;
                (result.map(Change::from), attempts)
            }
            OperationKind::StartRecorder { recorder_name } => {
                let region = self.options.region.as_str();
                let recorder_name = recorder_name.as_str();
                let (result, attempts) = self
                    .options
                    .retry
                    .run(what, move || {
                        bounded(
                            limit,
                            what,
                            control_plane.start_recorder(credential, recorder_name, region),
                        )
                    })
                    .await;
                let result = match result {
                    Ok(status) => Ok(Change::from(status)),
                    Err(e) if reports_already_running(&e) => Ok(Change::AlreadyRunning),
                    Err(e) => Err(e),
                };
                (result, attempts)
            }
        }
    }
}

/// Some control planes report an already-running recorder as an error.
fn reports_already_running(err: &GuardrailError) -> bool {
    match err {
        GuardrailError::ExternalService(detail) => {
            let detail = detail.to_ascii_lowercase();
            detail.contains("already running") || detail.contains("already recording")
        }
        _ => false,
    }
}

fn skip_all(
    target: &AccountTarget,
    registry: &OperationRegistry,
    reason: SkipReason,
    summary: &mut RunSummary,
) {
    for (index, op) in registry.list_operations().iter().enumerate() {
        summary.record(OperationOutcome::new(
            target,
            &op.name,
            index,
            OutcomeStatus::Skipped { reason },
            0,
        ));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
