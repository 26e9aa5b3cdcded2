mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::deploy::{DeployArgs, DeployExit};
use guardrail_core::report::ExitStatus;
use guardrail_core::GuardrailError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "guardrail",
    about = "Deploy budget and compliance guardrails into every team account",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the guardrail operations to every configured account
    Deploy {
        /// Path to the accounts configuration (YAML or JSON)
        config: PathBuf,

        /// Plan only; make no calls to the cloud provider
        #[arg(long)]
        dry_run: bool,

        /// Deploy a single team; other accounts are reported as skipped
        #[arg(long, value_name = "TEAM")]
        only: Option<String>,

        /// Override deployment.region
        #[arg(long)]
        region: Option<String>,

        /// Path to the aws CLI (default: found on PATH)
        #[arg(long, env = "GUARDRAIL_AWS_BIN")]
        aws_bin: Option<PathBuf>,
    },

    /// Validate the configuration and show the planned accounts
    Validate {
        /// Path to the accounts configuration (YAML or JSON)
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Deploy { .. } => tracing::Level::INFO,
        Commands::Validate { .. } => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Deploy {
            config,
            dry_run,
            only,
            region,
            aws_bin,
        } => cmd::deploy::run(
            DeployArgs {
                config,
                dry_run,
                only,
                region,
                aws_bin,
            },
            cli.json,
        ),
        Commands::Validate { config } => cmd::validate::run(&config, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(exit) = err.downcast_ref::<DeployExit>() {
        return exit.exit_code();
    }
    err.chain()
        .find_map(|cause| cause.downcast_ref::<GuardrailError>())
        .map(|e| ExitStatus::for_error(e).code())
        .unwrap_or(ExitStatus::AccountsFailed.code())
}
