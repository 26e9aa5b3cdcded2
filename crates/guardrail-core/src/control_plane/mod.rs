//! The external control plane the orchestrator drives.
//!
//! `ControlPlane` is the seam between the orchestrator and whatever actually
//! talks to the cloud provider. [`AwsCliControlPlane`] shells out to the `aws`
//! CLI; tests use a call-counting stub.

pub mod aws_cli;
#[cfg(test)]
pub(crate) mod stub;

use crate::credentials::ScopedCredential;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub use aws_cli::AwsCliControlPlane;

/// Result of an idempotent stack deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Created,
    Updated,
    /// The stack already matched the template and parameters.
    Unchanged,
}

/// Result of asking a compliance recorder to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderStatus {
    Started,
    AlreadyRunning,
}

/// A fully resolved stack deployment for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    pub stack_name: String,
    pub template_path: PathBuf,
    pub parameters: BTreeMap<String, String>,
    pub region: String,
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Exchange the caller's identity for temporary credentials in `account_id`.
    async fn assume_role(
        &self,
        account_id: &str,
        role_name: &str,
        ttl: Duration,
    ) -> Result<ScopedCredential>;

    /// Create or update a stack. Must report `Unchanged` rather than fail when
    /// there is nothing to do.
    async fn apply_declarative_infra(
        &self,
        credential: &ScopedCredential,
        request: &StackRequest,
    ) -> Result<ApplyStatus>;

    /// Start a compliance recorder. Must report `AlreadyRunning` rather than
    /// fail when the recorder is already on.
    async fn start_recorder(
        &self,
        credential: &ScopedCredential,
        recorder_name: &str,
        region: &str,
    ) -> Result<RecorderStatus>;
}
