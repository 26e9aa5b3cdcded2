//! `ControlPlane` backed by the `aws` command-line tool.
//!
//! Each call spawns one `aws` child process. Scoped credentials are handed to
//! the child through its own environment only; the parent process
//! environment is never modified.

use super::{ApplyStatus, ControlPlane, RecorderStatus, StackRequest};
use crate::credentials::ScopedCredential;
use crate::error::{GuardrailError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Cap on the stderr excerpt carried in error messages (keeps the tail).
const MAX_ERROR_DETAIL: usize = 2 * 1024;

const AUTHORIZATION_MARKERS: &[&str] = &[
    "accessdenied",
    "access denied",
    "not authorized",
    "unauthorizedoperation",
    "invalidclienttokenid",
    "expiredtoken",
    "signaturedoesnotmatch",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "throttling",
    "throttled",
    "rate exceeded",
    "requestlimitexceeded",
    "toomanyrequests",
    "could not connect",
    "connect timeout",
    "read timeout",
    "timed out",
    "serviceunavailable",
    "internalfailure",
    "requesttimeout",
];

// ---------------------------------------------------------------------------
// AwsCliControlPlane
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AwsCliControlPlane {
    aws_bin: PathBuf,
}

struct CliOutput {
    stdout: String,
    stderr: String,
}

impl AwsCliControlPlane {
    pub fn new(aws_bin: impl Into<PathBuf>) -> Self {
        Self {
            aws_bin: aws_bin.into(),
        }
    }

    /// Find `aws` on `PATH`.
    pub fn locate() -> Result<Self> {
        let bin = which::which("aws").map_err(|e| {
            GuardrailError::Config(format!("aws CLI not found on PATH: {e}"))
        })?;
        Ok(Self::new(bin))
    }

    async fn exec(&self, args: &[String], credential: Option<&ScopedCredential>) -> Result<CliOutput> {
        let mut cmd = Command::new(&self.aws_bin);
        cmd.args(args)
            .env("AWS_PAGER", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cred) = credential {
            cmd.env_remove("AWS_PROFILE")
                .env("AWS_ACCESS_KEY_ID", cred.access_key())
                .env("AWS_SECRET_ACCESS_KEY", cred.secret_key())
                .env("AWS_SESSION_TOKEN", cred.session_token());
        }

        tracing::debug!(command = %args[..args.len().min(2)].join(" "), "invoking aws");

        let output = cmd.output().await.map_err(|e| {
            GuardrailError::ExternalService(format!(
                "failed to execute '{}': {e}",
                self.aws_bin.display()
            ))
        })?;

        let stdout = stdout_string(output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(classify_failure(&stderr, output.status.code()));
        }
        Ok(CliOutput { stdout, stderr })
    }

    async fn stack_exists(&self, credential: &ScopedCredential, request: &StackRequest) -> Result<bool> {
        let args = strings(&[
            "cloudformation",
            "describe-stacks",
            "--stack-name",
            &request.stack_name,
            "--region",
            &request.region,
            "--output",
            "json",
        ]);
        match self.exec(&args, Some(credential)).await {
            Ok(_) => Ok(true),
            Err(GuardrailError::ExternalService(detail)) if detail.contains("does not exist") => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ControlPlane for AwsCliControlPlane {
    async fn assume_role(
        &self,
        account_id: &str,
        role_name: &str,
        ttl: Duration,
    ) -> Result<ScopedCredential> {
        let role_arn = format!("arn:aws:iam::{account_id}:role/{role_name}");
        let session_name = format!("guardrail-{account_id}");
        let args = strings(&[
            "sts",
            "assume-role",
            "--role-arn",
            &role_arn,
            "--role-session-name",
            &session_name,
            "--duration-seconds",
            &ttl.as_secs().to_string(),
            "--output",
            "json",
        ]);
        let mut output = self.exec(&args, None).await?;
        let parsed = parse_assume_role(account_id, &output.stdout);
        output.stdout.zeroize();
        parsed
    }

    async fn apply_declarative_infra(
        &self,
        credential: &ScopedCredential,
        request: &StackRequest,
    ) -> Result<ApplyStatus> {
        if !request.template_path.is_file() {
            return Err(GuardrailError::ExternalService(format!(
                "template not found: {}",
                request.template_path.display()
            )));
        }

        let existed = self.stack_exists(credential, request).await?;
        let output = self.exec(&deploy_args(request), Some(credential)).await?;
        Ok(deploy_status(&output.stdout, existed))
    }

    async fn start_recorder(
        &self,
        credential: &ScopedCredential,
        recorder_name: &str,
        region: &str,
    ) -> Result<RecorderStatus> {
        let status_args = strings(&[
            "configservice",
            "describe-configuration-recorder-status",
            "--configuration-recorder-names",
            recorder_name,
            "--region",
            region,
            "--output",
            "json",
        ]);
        let status = self.exec(&status_args, Some(credential)).await?;
        if recorder_is_recording(&status.stdout, recorder_name)? {
            return Ok(RecorderStatus::AlreadyRunning);
        }

        let start_args = strings(&[
            "configservice",
            "start-configuration-recorder",
            "--configuration-recorder-name",
            recorder_name,
            "--region",
            region,
        ]);
        let started = self.exec(&start_args, Some(credential)).await?;
        if !started.stderr.trim().is_empty() {
            tracing::debug!(stderr = %started.stderr.trim(), "start-configuration-recorder wrote to stderr");
        }
        Ok(RecorderStatus::Started)
    }
}

// ---------------------------------------------------------------------------
// Argument building and output parsing
// ---------------------------------------------------------------------------

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn deploy_args(request: &StackRequest) -> Vec<String> {
    let mut args = strings(&[
        "cloudformation",
        "deploy",
        "--stack-name",
        &request.stack_name,
        "--template-file",
        &*request.template_path.to_string_lossy(),
        "--region",
        &request.region,
        "--capabilities",
        "CAPABILITY_NAMED_IAM",
        "--no-fail-on-empty-changeset",
    ]);
    if !request.parameters.is_empty() {
        args.push("--parameter-overrides".to_string());
        args.extend(request.parameters.iter().map(|(k, v)| format!("{k}={v}")));
    }
    args
}

fn deploy_status(stdout: &str, existed: bool) -> ApplyStatus {
    if stdout.contains("No changes to deploy") {
        ApplyStatus::Unchanged
    } else if existed {
        ApplyStatus::Updated
    } else {
        ApplyStatus::Created
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleOutput {
    credentials: RawCredentials,
}

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "PascalCase")]
struct RawCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: String,
}

/// Stdout may carry secrets, so bytes that are not valid UTF-8 are wiped
/// once the lossy copy has been taken.
fn stdout_string(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            let mut bytes = e.into_bytes();
            let text = String::from_utf8_lossy(&bytes).into_owned();
            bytes.zeroize();
            text
        }
    }
}

fn parse_assume_role(account_id: &str, stdout: &str) -> Result<ScopedCredential> {
    let mut parsed: AssumeRoleOutput = serde_json::from_str(stdout).map_err(|e| {
        GuardrailError::ExternalService(format!("unexpected assume-role output: {e}"))
    })?;
    let raw = &mut parsed.credentials;
    let expires_at = DateTime::parse_from_rfc3339(&raw.expiration)
        .map_err(|e| {
            GuardrailError::ExternalService(format!(
                "invalid credential expiration '{}': {e}",
                raw.expiration
            ))
        })?
        .with_timezone(&Utc);

    Ok(ScopedCredential::new(
        account_id,
        std::mem::take(&mut raw.access_key_id),
        std::mem::take(&mut raw.secret_access_key),
        std::mem::take(&mut raw.session_token),
        expires_at,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecorderStatusOutput {
    #[serde(default)]
    configuration_recorders_status: Vec<RecorderStatusEntry>,
}

#[derive(Deserialize)]
struct RecorderStatusEntry {
    name: String,
    #[serde(default)]
    recording: bool,
}

fn recorder_is_recording(stdout: &str, recorder_name: &str) -> Result<bool> {
    let parsed: RecorderStatusOutput = serde_json::from_str(stdout).map_err(|e| {
        GuardrailError::ExternalService(format!("unexpected recorder status output: {e}"))
    })?;
    Ok(parsed
        .configuration_recorders_status
        .iter()
        .any(|r| r.name == recorder_name && r.recording))
}

/// Map a failed `aws` invocation onto the error taxonomy.
pub(crate) fn classify_failure(stderr: &str, code: Option<i32>) -> GuardrailError {
    let detail = error_detail(stderr, code);
    let lowered = stderr.to_ascii_lowercase();
    if AUTHORIZATION_MARKERS.iter().any(|m| lowered.contains(m)) {
        GuardrailError::Authorization(detail)
    } else if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        GuardrailError::Transient(detail)
    } else {
        GuardrailError::ExternalService(detail)
    }
}

fn error_detail(stderr: &str, code: Option<i32>) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return match code {
            Some(c) => format!("aws exited with code {c}"),
            None => "aws terminated by signal".to_string(),
        };
    }
    if trimmed.len() <= MAX_ERROR_DETAIL {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_ERROR_DETAIL;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
