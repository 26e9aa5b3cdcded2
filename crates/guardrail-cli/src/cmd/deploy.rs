use crate::output::print_json;
use anyhow::Context;
use guardrail_core::{
    account::AccountSource,
    config::{Config, WarnLevel},
    control_plane::{AwsCliControlPlane, ControlPlane},
    operation::OperationRegistry,
    orchestrator::{DeploymentOrchestrator, RunOptions},
    report::{self, ExitStatus},
    GuardrailError,
};
use tokio_util::sync::CancellationToken;
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// DeployExit: typed non-zero exit for a run that finished but was not clean
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum DeployExit {
    AccountsFailed { teams: Vec<String> },
}

impl DeployExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployExit::AccountsFailed { .. } => ExitStatus::AccountsFailed.code(),
        }
    }
}

impl std::fmt::Display for DeployExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployExit::AccountsFailed { teams } => write!(
                f,
                "{} account(s) did not complete cleanly: {}",
                teams.len(),
                teams.join(", ")
            ),
        }
    }
}

impl std::error::Error for DeployExit {}

// ---------------------------------------------------------------------------
// deploy
// ---------------------------------------------------------------------------

pub struct DeployArgs {
    pub config: PathBuf,
    pub dry_run: bool,
    pub only: Option<String>,
    pub region: Option<String>,
    pub aws_bin: Option<PathBuf>,
}

pub fn run(args: DeployArgs, json: bool) -> anyhow::Result<()> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(region) = args.region {
        config.deployment.region = region;
        config.validate()?;
    }

    let accounts = AccountSource::from_config(&config)?;
    let registry = OperationRegistry::builtin(&config.deployment)?;

    let mut findings = config.warnings();
    findings.extend(registry.missing_templates(&config.templates_dir()));
    let mut errors = 0;
    for w in &findings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("{}", w.message),
            WarnLevel::Error => {
                errors += 1;
                tracing::error!("{}", w.message);
            }
        }
    }
    // Dry runs never read templates.
    if errors > 0 && !args.dry_run {
        return Err(GuardrailError::Config(format!(
            "{errors} configuration error(s), nothing was deployed"
        ))
        .into());
    }
    let selection = accounts.select(args.only.as_deref())?;

    let control_plane = match args.aws_bin {
        Some(bin) => AwsCliControlPlane::new(bin),
        // Dry runs never invoke the binary.
        None if args.dry_run => AwsCliControlPlane::new("aws"),
        None => AwsCliControlPlane::locate()?,
    };
    let control_plane: Arc<dyn ControlPlane> = Arc::new(control_plane);

    let options = RunOptions::from_config(&config)
        .dry_run(args.dry_run)
        .selection(selection);
    let cancel = CancellationToken::new();
    let orchestrator =
        DeploymentOrchestrator::new(control_plane, options).with_cancellation(cancel.clone());

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing the current account");
                cancel.cancel();
            }
        });
        orchestrator.run(&accounts, &registry).await
    });

    if json {
        print_json(&summary)?;
    } else {
        print!("{}", report::summarize(&summary));
    }

    if report::exit_code(&summary) != ExitStatus::Success.code() {
        let teams = summary
            .unclean_teams()
            .into_iter()
            .map(str::to_string)
            .collect();
        return Err(DeployExit::AccountsFailed { teams }.into());
    }
    Ok(())
}
