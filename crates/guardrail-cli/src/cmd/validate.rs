use crate::output::print_json;
use anyhow::Context;
use guardrail_core::{
    account::AccountSource,
    config::{Config, WarnLevel},
    operation::OperationRegistry,
    GuardrailError,
};
use std::path::Path;

pub fn run(path: &Path, json: bool) -> anyhow::Result<()> {
    let config =
        Config::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    let accounts = AccountSource::from_config(&config)?;
    let registry = OperationRegistry::builtin(&config.deployment)?;

    let mut warnings = config.warnings();
    warnings.extend(registry.missing_templates(&config.templates_dir()));

    if json {
        let accounts: Vec<_> = accounts.iter().collect();
        let operations: Vec<&str> = registry
            .list_operations()
            .iter()
            .map(|op| op.name.as_str())
            .collect();
        let value = serde_json::json!({
            "accounts": accounts,
            "operations": operations,
            "region": config.deployment.region,
            "warnings": warnings,
        });
        print_json(&value)?;
    } else {
        println!(
            "Config is valid: {} account(s), {} operation(s) in {}.",
            accounts.len(),
            registry.len(),
            config.deployment.region
        );
        for target in accounts.iter() {
            println!(
                "  {:<3} {:<20} {}  budget {}  {}",
                target.index + 1,
                target.team_name,
                target.account_id,
                target.budget_limit,
                target.team_email
            );
        }
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        return Err(GuardrailError::Config("config validation found errors".into()).into());
    }
    Ok(())
}
