#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const TWO_TEAMS: &str = r#"
cloudTeamEmail: cloud@example.com
accounts:
  - teamName: team-01
    accountId: "111111111111"
    budgetLimit: 500
    teamEmail: team-01@example.com
  - teamName: team-02
    accountId: "222222222222"
    budgetLimit: 1000
    teamEmail: team-02@example.com
deployment:
  retryBackoffSeconds: 0
"#;

fn guardrail() -> Command {
    let mut cmd = Command::cargo_bin("guardrail").unwrap();
    cmd.env_remove("GUARDRAIL_AWS_BIN")
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY")
        .env_remove("AWS_SESSION_TOKEN")
        .env_remove("AWS_PROFILE")
        .env("RUST_LOG", "warn");
    cmd
}

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("accounts.yaml");
    std::fs::write(&path, body).unwrap();
    let templates = dir.path().join("templates");
    std::fs::create_dir_all(&templates).unwrap();
    std::fs::write(templates.join("budget.yaml"), "Resources: {}\n").unwrap();
    std::fs::write(templates.join("compliance.yaml"), "Resources: {}\n").unwrap();
    path
}

// ---------------------------------------------------------------------------
// guardrail validate
// ---------------------------------------------------------------------------

#[test]
fn validate_lists_accounts() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, TWO_TEAMS);

    guardrail()
        .arg("validate")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 account(s), 3 operation(s)"))
        .stdout(predicate::str::contains("team-01"))
        .stdout(predicate::str::contains("222222222222"));
}

#[test]
fn validate_reports_missing_templates_as_errors() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, TWO_TEAMS);
    std::fs::remove_file(dir.path().join("templates/budget.yaml")).unwrap();

    guardrail()
        .arg("validate")
        .arg(&config)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("[error] template for 'deploy budget stack'"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn deploy_refuses_to_start_without_templates_but_dry_run_plans() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, TWO_TEAMS);
    std::fs::remove_file(dir.path().join("templates/compliance.yaml")).unwrap();

    guardrail()
        .args(["deploy", "--aws-bin", "/nonexistent/aws"])
        .arg(&config)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nothing was deployed"));

    guardrail()
        .args(["deploy", "--dry-run"])
        .arg(&config)
        .assert()
        .success();
}

#[test]
fn validate_json_is_parseable() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, TWO_TEAMS);

    let out = guardrail()
        .args(["validate", "--json"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value["accounts"].as_array().unwrap().len(), 2);
    assert_eq!(value["accounts"][1]["teamName"], "team-02");
    assert_eq!(value["operations"][2], "start compliance recorder");
}

#[test]
fn duplicate_team_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"
cloudTeamEmail: cloud@example.com
accounts:
  - teamName: team-01
    accountId: "111111111111"
    teamEmail: a@example.com
  - teamName: team-01
    accountId: "222222222222"
    teamEmail: b@example.com
"#,
    );

    guardrail()
        .arg("validate")
        .arg(&config)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("team-01"));
}

#[test]
fn malformed_config_exits_two() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "cloudTeamEmail: [unterminated\n");

    guardrail().arg("deploy").arg(&config).assert().code(2);
}

#[test]
fn missing_config_file_exits_two() {
    let dir = TempDir::new().unwrap();
    guardrail()
        .arg("deploy")
        .arg(dir.path().join("nope.yaml"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to read"));
}

// ---------------------------------------------------------------------------
// guardrail deploy --dry-run
// ---------------------------------------------------------------------------

#[test]
fn dry_run_plans_every_account() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, TWO_TEAMS);

    guardrail()
        .args(["deploy", "--dry-run"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("team-01"))
        .stdout(predicate::str::contains("team-02"))
        .stdout(predicate::str::contains("dry run"))
        .stdout(predicate::str::contains("0 succeeded, 0 failed, 6 skipped"));
}

#[test]
fn dry_run_json_has_one_outcome_per_account_and_operation() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, TWO_TEAMS);

    let out = guardrail()
        .args(["deploy", "--dry-run", "--json"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let outcomes = value["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 6);
    assert!(outcomes
        .iter()
        .all(|o| o["status"] == "skipped" && o["reason"] == "dry_run"));
    assert_eq!(value["dryRun"], true);
    assert_eq!(outcomes[0]["teamName"], "team-01");
    assert_eq!(outcomes[5]["operationIndex"], 2);
    assert!(value["runId"].is_string());
}

#[test]
fn unknown_only_team_exits_two() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, TWO_TEAMS);

    guardrail()
        .args(["deploy", "--dry-run", "--only", "team-99"])
        .arg(&config)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("team-99"));
}

// ---------------------------------------------------------------------------
// guardrail deploy against a fake aws CLI
// ---------------------------------------------------------------------------

#[cfg(unix)]
const FAKE_AWS: &str = r#"#!/bin/sh
echo "$1 $2 ${AWS_ACCESS_KEY_ID:-none}" >> "$FAKE_AWS_LOG"
case "$1 $2" in
  "sts assume-role")
    case "$*" in
      *"$FAKE_AWS_DENY"*)
        echo "An error occurred (AccessDenied) when calling the AssumeRole operation: denied" >&2
        exit 254 ;;
    esac
    echo '{"Credentials":{"AccessKeyId":"ASIAFAKE","SecretAccessKey":"fake-secret","SessionToken":"fake-token","Expiration":"2099-01-01T00:00:00Z"}}'
    ;;
  "cloudformation describe-stacks")
    echo "An error occurred (ValidationError) when calling the DescribeStacks operation: Stack with id guardrail does not exist" >&2
    exit 254 ;;
  "cloudformation deploy")
    echo "Successfully created/updated stack"
    ;;
  "configservice describe-configuration-recorder-status")
    echo '{"ConfigurationRecordersStatus":[{"name":"default","recording":false}]}'
    ;;
  "configservice start-configuration-recorder")
    ;;
  *)
    echo "unexpected call: $*" >&2
    exit 1 ;;
esac
"#;

#[cfg(unix)]
fn install_fake_aws(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("aws");
    std::fs::write(&path, FAKE_AWS).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[test]
fn deploy_with_fake_aws_succeeds_for_all_accounts() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, TWO_TEAMS);
    let aws = install_fake_aws(dir.path());
    let log = dir.path().join("calls.log");

    guardrail()
        .arg("deploy")
        .arg(&config)
        .arg("--aws-bin")
        .arg(&aws)
        .env("FAKE_AWS_LOG", &log)
        .env("FAKE_AWS_DENY", "no-such-account")
        .assert()
        .success()
        .stdout(predicate::str::contains("6 succeeded, 0 failed, 0 skipped"))
        .stdout(predicate::str::contains("created"))
        .stdout(predicate::str::contains("started"));

    let calls = std::fs::read_to_string(&log).unwrap();
    for line in calls.lines() {
        if line.starts_with("sts ") {
            assert!(line.ends_with("none"), "assume-role ran with scoped keys: {line}");
        } else {
            assert!(line.ends_with("ASIAFAKE"), "call ran without scoped keys: {line}");
        }
    }
    assert_eq!(calls.lines().filter(|l| l.starts_with("sts ")).count(), 2);
}

#[cfg(unix)]
#[test]
fn denied_account_fails_alone_and_exits_one() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, TWO_TEAMS);
    let aws = install_fake_aws(dir.path());
    let log = dir.path().join("calls.log");

    let out = guardrail()
        .args(["deploy", "--json"])
        .arg(&config)
        .env("GUARDRAIL_AWS_BIN", &aws)
        .env("FAKE_AWS_LOG", &log)
        .env("FAKE_AWS_DENY", "222222222222")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("team-02"));

    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let outcomes = value["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 6);
    for o in outcomes {
        if o["teamName"] == "team-01" {
            assert_eq!(o["status"], "success");
        } else {
            assert_eq!(o["status"], "failed");
            assert_eq!(o["kind"], "authorization");
        }
    }

    // Only assume-role was attempted for the denied account.
    let calls = std::fs::read_to_string(&log).unwrap();
    assert_eq!(calls.lines().filter(|l| l.starts_with("sts ")).count(), 2);
    assert_eq!(calls.lines().filter(|l| !l.starts_with("sts ")).count(), 6);
}

#[cfg(unix)]
#[test]
fn only_deploys_the_selected_team() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, TWO_TEAMS);
    let aws = install_fake_aws(dir.path());
    let log = dir.path().join("calls.log");

    guardrail()
        .args(["deploy", "--only", "team-02", "--aws-bin"])
        .arg(&aws)
        .arg(&config)
        .env("FAKE_AWS_LOG", &log)
        .env("FAKE_AWS_DENY", "no-such-account")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 succeeded, 0 failed, 3 skipped"))
        .stdout(predicate::str::contains("filtered"));

    let calls = std::fs::read_to_string(&log).unwrap();
    assert_eq!(calls.lines().filter(|l| l.starts_with("sts ")).count(), 1);
}
