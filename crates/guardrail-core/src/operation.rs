//! The fixed set of idempotent operations applied to every account.
//!
//! Operations are listed in application order. Ordering constraints are
//! declared through `depends_on` and checked when the registry is built: every
//! dependency must name an operation that appears earlier in the list.

use crate::account::AccountTarget;
use crate::config::{ConfigWarning, DeploymentSettings, WarnLevel};
use crate::error::{GuardrailError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

pub const DEPLOY_BUDGET_STACK: &str = "deploy budget stack";
pub const DEPLOY_COMPLIANCE_STACK: &str = "deploy compliance stack";
pub const START_COMPLIANCE_RECORDER: &str = "start compliance recorder";

pub const BUDGET_STACK_NAME: &str = "guardrail-budget";
pub const COMPLIANCE_STACK_NAME: &str = "guardrail-compliance";

/// Placeholder names usable as `{{name}}` inside parameter values.
pub const PLACEHOLDERS: &[&str] = &[
    "teamName",
    "accountId",
    "budgetLimit",
    "teamEmail",
    "cloudTeamEmail",
    "assumeRoleName",
    "region",
];

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z][A-Za-z0-9]*)\s*\}\}").unwrap())
}

// ---------------------------------------------------------------------------
// OperationKind / OperationSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Create or update a stack from a template under the templates directory.
    DeployStack {
        stack_name: String,
        template_ref: String,
    },
    /// Turn on a compliance recorder that a stack created earlier.
    StartRecorder { recorder_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    pub name: String,
    pub kind: OperationKind,
    /// Parameter templates; values may reference `{{placeholder}}`s.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub idempotent: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl OperationSpec {
    pub fn deploy_stack(
        name: impl Into<String>,
        stack_name: impl Into<String>,
        template_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::DeployStack {
                stack_name: stack_name.into(),
                template_ref: template_ref.into(),
            },
            parameters: BTreeMap::new(),
            idempotent: true,
            depends_on: Vec::new(),
        }
    }

    pub fn start_recorder(name: impl Into<String>, recorder_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::StartRecorder {
                recorder_name: recorder_name.into(),
            },
            parameters: BTreeMap::new(),
            idempotent: true,
            depends_on: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    pub fn template_ref(&self) -> Option<&str> {
        match &self.kind {
            OperationKind::DeployStack { template_ref, .. } => Some(template_ref.as_str()),
            OperationKind::StartRecorder { .. } => None,
        }
    }

    /// Substitute placeholders for one account.
    pub fn resolve_parameters(&self, ctx: &TemplateContext<'_>) -> Result<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        for (key, template) in &self.parameters {
            let mut unknown = None;
            let value = placeholder_re().replace_all(template, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                ctx.value(name).unwrap_or_else(|| {
                    unknown = Some(name.to_string());
                    String::new()
                })
            });
            if let Some(name) = unknown {
                return Err(GuardrailError::Config(format!(
                    "operation '{}' parameter '{key}' references unknown placeholder '{name}'",
                    self.name
                )));
            }
            resolved.insert(key.clone(), value.into_owned());
        }
        Ok(resolved)
    }
}

// ---------------------------------------------------------------------------
// TemplateContext
// ---------------------------------------------------------------------------

/// Values available to parameter templates for one account.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub target: &'a AccountTarget,
    pub cloud_team_email: &'a str,
    pub region: &'a str,
}

impl TemplateContext<'_> {
    pub fn value(&self, name: &str) -> Option<String> {
        let t = self.target;
        Some(match name {
            "teamName" => t.team_name.clone(),
            "accountId" => t.account_id.clone(),
            "budgetLimit" => t.budget_limit.to_string(),
            "teamEmail" => t.team_email.clone(),
            "cloudTeamEmail" => self.cloud_team_email.to_string(),
            "assumeRoleName" => t.assume_role_name.clone(),
            "region" => self.region.to_string(),
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// OperationRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OperationRegistry {
    operations: Vec<OperationSpec>,
}

impl OperationRegistry {
    /// Build a registry, rejecting duplicate names, unknown placeholders, and
    /// any dependency that does not appear earlier in the list.
    pub fn new(operations: Vec<OperationSpec>) -> Result<Self> {
        if operations.is_empty() {
            return Err(GuardrailError::InvalidRegistry("no operations".into()));
        }

        let all: HashSet<&str> = operations.iter().map(|o| o.name.as_str()).collect();
        let mut earlier: HashSet<&str> = HashSet::new();

        for op in &operations {
            if op.name.trim().is_empty() {
                return Err(GuardrailError::InvalidRegistry(
                    "operation with empty name".into(),
                ));
            }
            if earlier.contains(op.name.as_str()) {
                return Err(GuardrailError::InvalidRegistry(format!(
                    "duplicate operation '{}'",
                    op.name
                )));
            }
            for dep in &op.depends_on {
                if !earlier.contains(dep.as_str()) {
                    let reason = if dep == &op.name {
                        "depends on itself".to_string()
                    } else if all.contains(dep.as_str()) {
                        format!("depends on '{dep}', which is listed after it")
                    } else {
                        format!("depends on unknown operation '{dep}'")
                    };
                    return Err(GuardrailError::InvalidRegistry(format!(
                        "operation '{}' {reason}",
                        op.name
                    )));
                }
            }
            for (key, template) in &op.parameters {
                for caps in placeholder_re().captures_iter(template) {
                    let name = &caps[1];
                    if !PLACEHOLDERS.contains(&name) {
                        return Err(GuardrailError::InvalidRegistry(format!(
                            "operation '{}' parameter '{key}' references unknown placeholder '{name}'",
                            op.name
                        )));
                    }
                }
            }
            earlier.insert(op.name.as_str());
        }

        Ok(Self { operations })
    }

    /// The guardrail operations every member account receives.
    ///
    /// The budget and compliance stacks are independent of each other; the
    /// recorder can only start once the compliance stack has created it.
    pub fn builtin(settings: &DeploymentSettings) -> Result<Self> {
        Self::new(vec![
            OperationSpec::deploy_stack(DEPLOY_BUDGET_STACK, BUDGET_STACK_NAME, "budget.yaml")
                .param("TeamName", "{{teamName}}")
                .param("BudgetLimit", "{{budgetLimit}}")
                .param("TeamEmail", "{{teamEmail}}")
                .param("CloudTeamEmail", "{{cloudTeamEmail}}"),
            OperationSpec::deploy_stack(
                DEPLOY_COMPLIANCE_STACK,
                COMPLIANCE_STACK_NAME,
                "compliance.yaml",
            )
            .param("TeamName", "{{teamName}}")
            .param("AccountId", "{{accountId}}")
            .param("CloudTeamEmail", "{{cloudTeamEmail}}"),
            OperationSpec::start_recorder(START_COMPLIANCE_RECORDER, &settings.recorder_name)
                .after(DEPLOY_COMPLIANCE_STACK),
        ])
    }

    pub fn list_operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.operations.iter().position(|o| o.name == name)
    }

    /// One error per stack operation whose template is not a file under
    /// `templates_dir`.
    pub fn missing_templates(&self, templates_dir: &Path) -> Vec<ConfigWarning> {
        self.operations
            .iter()
            .filter_map(|op| {
                let path = templates_dir.join(op.template_ref()?);
                (!path.is_file()).then(|| ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "template for '{}' not found at {}",
                        op.name,
                        path.display()
                    ),
                })
            })
            .collect()
    }
}
