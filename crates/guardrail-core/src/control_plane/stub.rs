//! Scriptable in-memory control plane for tests.
//!
//! Stacks and recorders are remembered per account, so a second apply of the
//! same request reports `Unchanged` and a second recorder start reports
//! `AlreadyRunning`. Every call is appended to a timeline.

use super::{ApplyStatus, ControlPlane, RecorderStatus, StackRequest};
use crate::credentials::ScopedCredential;
use crate::error::{GuardrailError, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Authorization,
    ExternalService,
    /// Report the recorder as already running through an error.
    AlreadyRunning,
    /// Fail transiently `times` times, then behave normally.
    Transient { times: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AssumeRole {
        account_id: String,
    },
    Apply {
        credential_account: String,
        stack_name: String,
    },
    StartRecorder {
        credential_account: String,
        recorder_name: String,
    },
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    stacks: HashMap<(String, String), BTreeMap<String, String>>,
    recorders: HashSet<(String, String)>,
    assume_faults: HashMap<String, (Fault, u32)>,
    apply_faults: HashMap<(String, String), (Fault, u32)>,
    recorder_faults: HashMap<String, (Fault, u32)>,
    first_lifetime: Option<Duration>,
}

#[derive(Default)]
pub struct StubControlPlane {
    state: Mutex<State>,
    expired_credentials: bool,
    issue_for: Option<String>,
    apply_delay: Option<Duration>,
    cancel_on_apply: Option<CancellationToken>,
}

/// Returns the error to raise for this call, consuming one transient budget.
fn trip(fault: &mut (Fault, u32), what: &str) -> Option<GuardrailError> {
    let (kind, seen) = fault;
    match *kind {
        Fault::Authorization => Some(GuardrailError::Authorization(format!(
            "AccessDenied: {what} is not authorized"
        ))),
        Fault::ExternalService => Some(GuardrailError::ExternalService(format!(
            "{what} failed: ValidationError"
        ))),
        Fault::AlreadyRunning => Some(GuardrailError::ExternalService(format!(
            "{what}: recorder is already running"
        ))),
        Fault::Transient { times } => {
            if *seen < times {
                *seen += 1;
                Some(GuardrailError::Transient(format!("{what}: Rate exceeded")))
            } else {
                None
            }
        }
    }
}

impl StubControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_assume_role(self, account_id: &str, fault: Fault) -> Self {
        self.lock()
            .assume_faults
            .insert(account_id.to_string(), (fault, 0));
        self
    }

    pub fn fail_apply(self, account_id: &str, stack_name: &str, fault: Fault) -> Self {
        self.lock().apply_faults.insert(
            (account_id.to_string(), stack_name.to_string()),
            (fault, 0),
        );
        self
    }

    pub fn fail_recorder(self, account_id: &str, fault: Fault) -> Self {
        self.lock()
            .recorder_faults
            .insert(account_id.to_string(), (fault, 0));
        self
    }

    /// Mark a recorder as already running in `account_id`.
    pub fn recorder_running(self, account_id: &str, recorder_name: &str) -> Self {
        self.lock()
            .recorders
            .insert((account_id.to_string(), recorder_name.to_string()));
        self
    }

    pub fn with_expired_credentials(mut self) -> Self {
        self.expired_credentials = true;
        self
    }

    /// Hand out credentials for `account_id` no matter what was requested.
    pub fn issue_for_account(mut self, account_id: &str) -> Self {
        self.issue_for = Some(account_id.to_string());
        self
    }

    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = Some(delay);
        self
    }

    /// The first credential issued lives only `lifetime`; later ones get
    /// the requested ttl.
    pub fn short_lived_first_credential(self, lifetime: Duration) -> Self {
        self.lock().first_lifetime = Some(lifetime);
        self
    }

    /// Cancel `token` as soon as a stack apply is received.
    pub fn cancel_on_apply(mut self, token: CancellationToken) -> Self {
        self.cancel_on_apply = Some(token);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("stub state poisoned")
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn assume_role_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::AssumeRole { .. }))
            .count()
    }

    /// Calls that would change cloud state.
    pub fn mutating_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| !matches!(c, Call::AssumeRole { .. }))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }
}

#[async_trait]
impl ControlPlane for StubControlPlane {
    async fn assume_role(
        &self,
        account_id: &str,
        _role_name: &str,
        ttl: Duration,
    ) -> Result<ScopedCredential> {
        let mut state = self.lock();
        state.calls.push(Call::AssumeRole {
            account_id: account_id.to_string(),
        });
        if let Some(fault) = state.assume_faults.get_mut(account_id) {
            if let Some(err) = trip(fault, "sts:AssumeRole") {
                return Err(err);
            }
        }
        let expires_at = if self.expired_credentials {
            Utc::now() - ChronoDuration::seconds(1)
        } else if let Some(lifetime) = state.first_lifetime.take() {
            Utc::now() + ChronoDuration::milliseconds(lifetime.as_millis() as i64)
        } else {
            Utc::now() + ChronoDuration::seconds(ttl.as_secs() as i64)
        };
        let issued_for = self.issue_for.as_deref().unwrap_or(account_id);
        Ok(ScopedCredential::new(
            issued_for,
            format!("ASIA{issued_for}"),
            "stub-secret",
            "stub-token",
            expires_at,
        ))
    }

    async fn apply_declarative_infra(
        &self,
        credential: &ScopedCredential,
        request: &StackRequest,
    ) -> Result<ApplyStatus> {
        if let Some(token) = &self.cancel_on_apply {
            token.cancel();
        }
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }
        let account = credential.account_id().to_string();
        let mut state = self.lock();
        state.calls.push(Call::Apply {
            credential_account: account.clone(),
            stack_name: request.stack_name.clone(),
        });
        let key = (account, request.stack_name.clone());
        if let Some(fault) = state.apply_faults.get_mut(&key) {
            if let Some(err) = trip(fault, "cloudformation:deploy") {
                return Err(err);
            }
        }
        let status = match state.stacks.get(&key) {
            None => ApplyStatus::Created,
            Some(params) if *params == request.parameters => ApplyStatus::Unchanged,
            Some(_) => ApplyStatus::Updated,
        };
        state.stacks.insert(key, request.parameters.clone());
        Ok(status)
    }

    async fn start_recorder(
        &self,
        credential: &ScopedCredential,
        recorder_name: &str,
        _region: &str,
    ) -> Result<RecorderStatus> {
        let account = credential.account_id().to_string();
        let mut state = self.lock();
        state.calls.push(Call::StartRecorder {
            credential_account: account.clone(),
            recorder_name: recorder_name.to_string(),
        });
        if let Some(fault) = state.recorder_faults.get_mut(&account) {
            if let Some(err) = trip(fault, "config:StartConfigurationRecorder") {
                return Err(err);
            }
        }
        if state
            .recorders
            .insert((account, recorder_name.to_string()))
        {
            Ok(RecorderStatus::Started)
        } else {
            Ok(RecorderStatus::AlreadyRunning)
        }
    }
}
