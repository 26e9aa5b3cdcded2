use crate::error::GuardrailError;
use crate::summary::{OutcomeStatus, RunSummary};

/// Process exit status for a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    AccountsFailed = 1,
    ConfigInvalid = 2,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn for_summary(summary: &RunSummary) -> Self {
        if summary.is_clean() {
            ExitStatus::Success
        } else {
            ExitStatus::AccountsFailed
        }
    }

    /// Status for an error that stopped the run before any account was touched.
    pub fn for_error(err: &GuardrailError) -> Self {
        if err.is_configuration() {
            ExitStatus::ConfigInvalid
        } else {
            ExitStatus::AccountsFailed
        }
    }
}

pub fn exit_code(summary: &RunSummary) -> i32 {
    ExitStatus::for_summary(summary).code()
}

const HEADERS: [&str; 5] = ["TEAM", "ACCOUNT", "OPERATION", "STATUS", "DETAIL"];

/// Render the summary as an aligned table in source order, followed by a
/// totals line.
pub fn summarize(summary: &RunSummary) -> String {
    let rows: Vec<[String; 5]> = summary
        .ordered_outcomes()
        .into_iter()
        .map(|o| {
            let detail = match &o.status {
                OutcomeStatus::Success { change } => change.as_str().to_string(),
                OutcomeStatus::Failed { kind, error } => format!("{kind}: {error}"),
                OutcomeStatus::Skipped { reason } => reason.as_str().to_string(),
            };
            [
                o.team_name.clone(),
                o.account_id.clone(),
                o.operation.clone(),
                o.status.label().to_string(),
                detail,
            ]
        })
        .collect();

    let mut widths: Vec<usize> = HEADERS.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, HEADERS.iter().copied(), &widths);
    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    push_row(&mut out, sep.iter().map(String::as_str), &widths);
    for row in &rows {
        push_row(&mut out, row.iter().map(String::as_str), &widths);
    }

    let totals = summary.totals();
    out.push('\n');
    out.push_str(&format!(
        "{} account(s), {} operation(s): {} succeeded, {} failed, {} skipped",
        summary.accounts.len(),
        summary.outcomes.len(),
        totals.success,
        totals.failed,
        totals.skipped
    ));
    if summary.dry_run {
        out.push_str(" (dry run)");
    }
    out.push('\n');

    let unclean = summary.unclean_teams();
    if !unclean.is_empty() {
        out.push_str(&format!("needs attention: {}\n", unclean.join(", ")));
    }
    out
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let cells: Vec<String> = cells
        .enumerate()
        .map(|(i, cell)| format!("{:width$}", cell, width = widths[i]))
        .collect();
    out.push_str(cells.join("  ").trim_end());
    out.push('\n');
}
