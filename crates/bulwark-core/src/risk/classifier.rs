//! Command and action risk classifier

use super::rules::{
    program_in, CommandRule, Matcher, COMMAND_RULES, CONTENT_RULES, CRITICAL_PROJECT_FILES,
    REDIRECT, SAFE_PROGRAMS, SEGMENT_SEPARATOR, SUBSTITUTION,
};
use super::{RiskAssessment, RiskLevel};
use crate::action::{Action, ActionKind};

/// Maps shell commands and file actions to a [`RiskAssessment`].
///
/// Never fails: an unrecognised command that matches no rule is `Low`,
/// and any rule that fires can only raise the level.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskClassifier;

impl RiskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Assess a shell command. Compound commands take the maximum over their segments.
    pub fn assess(&self, command: &str) -> RiskAssessment {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            let mut assessment = RiskAssessment::empty(command);
            assessment.add_reason("Empty command");
            return assessment.seal();
        }

        let mut total = RiskAssessment::empty(trimmed);
        for segment in SEGMENT_SEPARATOR.split(trimmed) {
            if !segment.trim().is_empty() {
                total.absorb(assess_segment(segment.trim()));
            }
        }

        for caps in SUBSTITUTION.captures_iter(trimmed) {
            let inner = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            if inner.trim().is_empty() {
                continue;
            }
            let mut nested = self.assess(inner);
            if nested.level > RiskLevel::Safe {
                nested.add_reason("Command substitution");
            }
            total.absorb(nested);
        }

        let total = total.seal();
        tracing::debug!(command = trimmed, level = %total.level, "assessed command");
        total
    }

    /// Assess an [`Action`]. Commands delegate to [`assess`](Self::assess); file
    /// mutations are scored from their target and the content they introduce.
    pub fn assess_action(&self, action: &Action) -> RiskAssessment {
        let mut assessment = match &action.kind {
            ActionKind::RunCommand { command, .. } => {
                let mut a = self.assess(command);
                a.subject = action.description.clone();
                a
            }
            kind => assess_file_action(action, kind),
        };

        if let Some(hint) = action.risk_hint {
            if hint > assessment.level {
                assessment.escalate(hint);
                assessment.add_reason(format!("Planner marked the action as {}", hint));
            }
        }
        assessment.seal()
    }
}

struct Invocation<'a> {
    base: &'a str,
    args: String,
    elevated: bool,
}

/// Strip `sudo`, env assignments and path prefixes to find the executable
fn parse_invocation(segment: &str) -> Invocation<'_> {
    let mut tokens = segment.split_whitespace().peekable();
    let mut elevated = false;

    while let Some(token) = tokens.peek() {
        if *token == "sudo" {
            elevated = true;
            tokens.next();
            while tokens.peek().map(|t| t.starts_with('-')).unwrap_or(false) {
                tokens.next();
            }
        } else if is_env_assignment(token) {
            tokens.next();
        } else {
            break;
        }
    }

    let program = tokens.next().unwrap_or("");
    let base = program.rsplit('/').next().unwrap_or(program);
    let args = tokens.collect::<Vec<_>>().join(" ");
    Invocation { base, args, elevated }
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Files written by `>`/`>>` redirections, `/dev/null` excluded
fn redirect_targets(segment: &str) -> Vec<&str> {
    REDIRECT
        .captures_iter(segment)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|target| *target != "/dev/null")
        .collect()
}

fn assess_segment(segment: &str) -> RiskAssessment {
    let invocation = parse_invocation(segment);
    let writes = redirect_targets(segment);

    if invocation.base.is_empty() {
        return RiskAssessment::empty(segment);
    }

    if program_in(invocation.base, SAFE_PROGRAMS) && writes.is_empty() {
        let mut safe = RiskAssessment::empty(segment);
        safe.add_reason("Read-only command");
        safe.estimated_duration_secs = 5;
        return safe;
    }

    let mut assessment = RiskAssessment::empty(segment);
    assessment.escalate(RiskLevel::Low);
    assessment.estimated_duration_secs = 30;

    for rule in COMMAND_RULES.iter() {
        if rule.matcher.matches(invocation.base, &invocation.args, segment) {
            apply_rule(&mut assessment, rule, invocation.base);
        }
    }

    for target in writes {
        assessment.add_reason(format!("Redirects output to {}", target));
    }
    if invocation.elevated {
        assessment.add_reason("Runs with elevated privileges");
    }
    assessment
}

fn apply_rule(assessment: &mut RiskAssessment, rule: &CommandRule, base: &str) {
    assessment.escalate(rule.level);
    match rule.matcher {
        Matcher::Pattern(_) => assessment.add_reason(rule.reason),
        _ => assessment.add_reason(format!("{} ({})", rule.reason, base)),
    }
    assessment.requires_backup |= rule.requires_backup;
    assessment.requires_reboot |= rule.requires_reboot;
    assessment.data_loss_possible |= rule.data_loss;
    if rule.irreversible {
        assessment.reversible = false;
    }
    assessment.estimated_duration_secs = assessment.estimated_duration_secs.max(rule.duration_secs);
    if let Some(component) = rule.component {
        assessment.add_component(component);
    }
}

fn is_documentation(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    [".md", ".txt", ".rst", ".adoc"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

fn assess_file_action(action: &Action, kind: &ActionKind) -> RiskAssessment {
    let mut assessment = RiskAssessment::empty(action.description.clone());
    assessment.estimated_duration_secs = 1;
    let target = action.target().unwrap_or("");

    match kind {
        ActionKind::CreateFile { .. } => {
            assessment.escalate(RiskLevel::Low);
            assessment.add_reason("Creates a new file");
        }
        ActionKind::WriteFile { .. } | ActionKind::EditFile { .. } => {
            let level = if is_documentation(target) {
                RiskLevel::Low
            } else {
                RiskLevel::Medium
            };
            assessment.escalate(level);
            assessment.requires_backup = true;
        }
        ActionKind::DeleteFile { .. } => {
            assessment.escalate(RiskLevel::Medium);
            assessment.add_reason("Deletes a file or directory");
            assessment.requires_backup = true;
            assessment.data_loss_possible = true;
        }
        ActionKind::RunCommand { .. } => {}
    }

    let file_name = target.rsplit('/').next().unwrap_or(target);
    if CRITICAL_PROJECT_FILES.contains(&file_name) || target.starts_with(".git/") || target.contains("/.git/") {
        assessment.escalate(RiskLevel::High);
        assessment.add_reason(format!("Touches critical project file {}", target));
        assessment.requires_backup = true;
    }

    if let Some(content) = action.content() {
        for (name, pattern, level, reason) in CONTENT_RULES.iter() {
            if pattern.is_match(content) {
                assessment.escalate(*level);
                assessment.add_reason(*reason);
                assessment.add_component(name);
            }
        }
    }

    assessment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assess(cmd: &str) -> RiskAssessment {
        RiskClassifier::new().assess(cmd)
    }

    #[test]
    fn test_rm_rf_root_is_critical() {
        let a = assess("rm -rf /");
        assert_eq!(a.level, RiskLevel::Critical);
        assert!(!a.reversible);
        assert!(a.data_loss_possible);
        assert!(a.requires_confirmation);
    }

    #[test]
    fn test_ls_is_safe() {
        let a = assess("ls -la");
        assert_eq!(a.level, RiskLevel::Safe);
        assert!(!a.requires_confirmation);
        assert!(a.reversible);
        assert_eq!(a.estimated_duration_secs, 5);
    }

    #[test]
    fn test_empty_command() {
        let a = assess("   ");
        assert_eq!(a.level, RiskLevel::Safe);
        assert_eq!(a.reasons, vec!["Empty command".to_string()]);
        assert_eq!(a.estimated_duration_secs, 0);
    }

    #[test]
    fn test_unknown_command_defaults_to_low() {
        let a = assess("make build");
        assert_eq!(a.level, RiskLevel::Low);
        assert_eq!(a.reasons, vec!["Standard operation".to_string()]);
        assert_eq!(a.estimated_duration_secs, 30);
    }

    #[test]
    fn test_sudo_and_path_prefix_are_stripped() {
        assert_eq!(assess("sudo /bin/ls /root").level, RiskLevel::Safe);
        let a = assess("sudo /usr/bin/rm notes.txt");
        assert_eq!(a.level, RiskLevel::High);
        assert!(a.reasons.iter().any(|r| r.contains("elevated")));
    }

    #[test]
    fn test_package_removal_is_high_with_backup() {
        let install = assess("sudo apt-get install htop");
        assert_eq!(install.level, RiskLevel::Medium);
        assert_eq!(install.estimated_duration_secs, 120);
        assert!(install.affected_components.contains(&"packages".to_string()));

        let remove = assess("sudo apt-get remove htop");
        assert_eq!(remove.level, RiskLevel::High);
        assert!(remove.requires_backup);
    }

    #[test]
    fn test_recursive_chmod_escalates() {
        assert_eq!(assess("chmod 644 a.txt").level, RiskLevel::Medium);
        assert_eq!(assess("chmod -R 755 dir").level, RiskLevel::High);
    }

    #[test]
    fn test_power_control_requires_reboot() {
        let a = assess("shutdown -h now");
        assert_eq!(a.level, RiskLevel::High);
        assert!(a.requires_reboot);
    }

    #[test]
    fn test_disk_tools_are_critical() {
        let dd = assess("dd if=/dev/zero of=disk.img bs=1M count=10");
        assert_eq!(dd.level, RiskLevel::Critical);
        assert_eq!(dd.estimated_duration_secs, 300);
        assert_eq!(assess("mkfs.ext4 /dev/sdb1").level, RiskLevel::Critical);
    }

    #[test]
    fn test_critical_config_path_raises_to_high() {
        let a = assess("cp backup.conf /etc/fstab");
        assert_eq!(a.level, RiskLevel::High);
        assert!(a.requires_backup);
        assert!(a.affected_components.contains(&"system-config".to_string()));
    }

    #[test]
    fn test_redirect_defeats_safe_shortcut() {
        assert_eq!(assess("ls 2>/dev/null").level, RiskLevel::Safe);
        assert_eq!(assess("echo hi > out.txt").level, RiskLevel::Low);
        assert_eq!(assess("echo nameserver > /etc/resolv.conf").level, RiskLevel::High);
    }

    #[test]
    fn test_composition_takes_maximum() {
        let a = assess("ls && rm -rf build");
        assert_eq!(a.level, RiskLevel::Critical);
        let b = assess("cat a.txt | grep foo");
        assert_eq!(b.level, RiskLevel::Safe);
        let c = assess("echo $(rm -rf /)");
        assert_eq!(c.level, RiskLevel::Critical);
    }

    #[test]
    fn test_file_actions() {
        let c = RiskClassifier::new();
        assert_eq!(c.assess_action(&Action::create("notes.md", "hello")).level, RiskLevel::Low);
        assert_eq!(c.assess_action(&Action::write("src/app.py", "x = 1")).level, RiskLevel::Medium);
        assert_eq!(c.assess_action(&Action::write("Cargo.toml", "[package]")).level, RiskLevel::High);
        let del = c.assess_action(&Action::delete("old.txt"));
        assert!(del.level >= RiskLevel::Medium);
        assert!(del.data_loss_possible);
        let secret = c.assess_action(&Action::create("cfg.py", "API_KEY = 'abc'"));
        assert_eq!(secret.level, RiskLevel::High);
    }

    #[test]
    fn test_hint_only_raises() {
        let c = RiskClassifier::new();
        let raised = c.assess_action(&Action::command("ls").with_risk_hint(RiskLevel::High));
        assert_eq!(raised.level, RiskLevel::High);
        let kept = c.assess_action(&Action::command("rm -rf x").with_risk_hint(RiskLevel::Low));
        assert_eq!(kept.level, RiskLevel::Critical);
    }
}
