//! Human and JSON rendering for CLI results

use bulwark_core::contract::Contract;
use bulwark_core::executor::{CommandOutput, GrepMatch};
use bulwark_core::risk::{RiskAssessment, RiskLevel};
use bulwark_core::verification::VerificationResult;
use bulwark_sandbox::{Commit, GitStatus, RollbackAction, RollbackOutcome, TreeEntry};
use colored::{ColoredString, Colorize};
use serde::Serialize;
use serde_json::json;

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn level(level: RiskLevel) -> ColoredString {
    let label = level.as_str().to_uppercase();
    match level {
        RiskLevel::Safe => label.green(),
        RiskLevel::Low => label.cyan(),
        RiskLevel::Medium => label.yellow(),
        RiskLevel::High => label.red(),
        RiskLevel::Critical => label.red().bold(),
    }
}

fn verdict(ok: bool) -> ColoredString {
    if ok {
        "✓".green()
    } else {
        "✗".red()
    }
}

pub fn assessment(assessment: &RiskAssessment, blocked: Option<&str>, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&json!({ "assessment": assessment, "blocked": blocked }));
    }
    println!("{} {}", "RISK:".bold(), level(assessment.level));
    for reason in &assessment.reasons {
        println!("  - {}", reason);
    }
    println!(
        "  reversible: {}  data loss: {}  backup: {}  reboot: {}",
        assessment.reversible,
        assessment.data_loss_possible,
        assessment.requires_backup,
        assessment.requires_reboot
    );
    if let Some(reason) = blocked {
        println!("{} {}", "BLOCKED:".red().bold(), reason);
    }
    Ok(())
}

pub fn command(out: &CommandOutput, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(out);
    }
    print!("{}", out.stdout);
    eprint!("{}", out.stderr);
    eprintln!(
        "{} exit {} in {}ms",
        verdict(out.success()),
        out.exit_code,
        out.duration_ms
    );
    Ok(())
}

pub fn text(label: &str, text: &str, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&json!({ "path": label, "content": text }));
    }
    print!("{}", text);
    Ok(())
}

pub fn grep(matches: &[GrepMatch], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(matches);
    }
    for m in matches {
        let line = &m.line_content;
        let (before, hit, after) = (&line[..m.match_start], &line[m.match_start..m.match_end], &line[m.match_end..]);
        println!(
            "{}:{}: {}{}{}",
            m.path.magenta(),
            m.line_number.to_string().green(),
            before,
            hit.red().bold(),
            after
        );
    }
    Ok(())
}

pub fn lines(items: &[String], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(items);
    }
    for item in items {
        println!("{}", item);
    }
    Ok(())
}

pub fn tree(tree: &TreeEntry, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(tree);
    }
    print!("{}", tree.render());
    Ok(())
}

pub fn git_status(status: &GitStatus, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(status);
    }
    let branch = status.branch.as_deref().unwrap_or("(detached)");
    println!("{} {} (ahead {}, behind {})", "BRANCH:".bold(), branch, status.ahead, status.behind);
    if status.clean {
        println!("{}", "clean".green());
        return Ok(());
    }
    for (label, paths) in [
        ("staged", &status.staged),
        ("modified", &status.modified),
        ("untracked", &status.untracked),
    ] {
        for path in paths {
            println!("  {:<10} {}", label, path);
        }
    }
    Ok(())
}

pub fn commits(commits: &[Commit], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(commits);
    }
    for c in commits {
        let short = &c.sha[..c.sha.len().min(8)];
        println!(
            "{} {} ({}, {} file(s)) {}",
            short.yellow(),
            c.message,
            c.author,
            c.files_changed,
            c.timestamp.dimmed()
        );
    }
    Ok(())
}

pub fn verification(result: &VerificationResult, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(result);
    }
    let head = if result.overall_passed {
        "PASSED".green().bold()
    } else {
        "FAILED".red().bold()
    };
    println!(
        "{} {:?} confidence {:.2} in {}ms",
        head, result.strategy, result.confidence, result.total_duration_ms
    );
    for layer in &result.layers {
        println!("  {} {:<10} {}", verdict(layer.passed), layer.layer.as_str(), layer.reason);
    }
    if let Some(stopped) = result.stopped_at {
        println!("  {} stopped after {}", "…".dimmed(), stopped.as_str());
    }
    Ok(())
}

pub fn rollback_entries(entries: &[&RollbackAction], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(entries);
    }
    if entries.is_empty() {
        println!("Nothing to roll back");
    }
    for entry in entries {
        let how = match (&entry.reverse_command, &entry.backup) {
            (Some(cmd), _) => format!("run `{}`", cmd),
            (None, Some(backup)) => format!("restore {}", backup.location),
            (None, None) => "no undo recorded".to_string(),
        };
        println!(
            "{} {} {} ({})",
            entry.id.yellow(),
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.description,
            how.dimmed()
        );
    }
    Ok(())
}

pub fn rollback_outcome(outcome: &RollbackOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(outcome);
    }
    println!("{} {}", verdict(outcome.success), outcome.message);
    Ok(())
}

pub fn pruned(removed: usize, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&json!({ "removed": removed }));
    }
    println!("Removed {} completed entr{}", removed, if removed == 1 { "y" } else { "ies" });
    Ok(())
}

pub fn contract(contract: &Contract, gap: Option<&Contract>, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&json!({ "contract": contract, "gap": gap }));
    }
    println!("{}", contract.summary());
    if let Some(gap) = gap {
        println!();
        println!("{}", gap.summary());
    }
    Ok(())
}
