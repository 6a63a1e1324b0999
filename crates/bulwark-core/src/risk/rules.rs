//! Rule tables for the risk classifier and the safety gate
//!
//! Ordered, compiled once. Each command rule names its matcher, the level it
//! raises the assessment to and the reason it reports.

use super::RiskLevel;
use lazy_static::lazy_static;
use regex::Regex;

/// Read-only tools: a segment running one of these is `Safe`
pub const SAFE_PROGRAMS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "find", "which", "whereis", "whoami", "hostname",
    "uname", "uptime", "date", "cal", "df", "du", "free", "top", "htop", "ps", "pgrep", "ip",
    "ifconfig", "netstat", "ss", "ping", "traceroute", "nslookup", "man", "info", "help",
    "type", "file", "stat", "echo", "printf", "pwd", "env", "printenv", "wc", "true",
];

pub const PACKAGE_MANAGERS: &[&str] = &[
    "apt", "apt-get", "dnf", "yum", "pacman", "zypper", "pip", "pip3", "npm", "cargo",
];

/// System configuration files whose mention raises a command to at least `High`
pub const CRITICAL_CONFIG_PATHS: &[&str] = &[
    "/etc/fstab",
    "/etc/passwd",
    "/etc/shadow",
    "/etc/group",
    "/etc/sudoers",
    "/etc/ssh/sshd_config",
    "/etc/nginx/nginx.conf",
    "/etc/apache2/apache2.conf",
    "/etc/systemd/system/",
    "/boot/grub/grub.cfg",
];

/// Project files whose modification is treated as `High`
pub const CRITICAL_PROJECT_FILES: &[&str] = &[
    "Cargo.toml",
    "Cargo.lock",
    "package.json",
    "package-lock.json",
    "pyproject.toml",
    "setup.py",
    ".env",
];

/// How a rule recognises a command segment
#[derive(Debug)]
pub enum Matcher {
    /// Base executable is one of these (`mkfs` also matches `mkfs.ext4`)
    Program(&'static [&'static str]),
    /// Base executable is listed and its arguments match
    ProgramArgs(&'static [&'static str], Regex),
    /// The whole segment matches
    Pattern(Regex),
}

impl Matcher {
    pub fn matches(&self, base: &str, args: &str, segment: &str) -> bool {
        match self {
            Matcher::Program(names) => program_in(base, names),
            Matcher::ProgramArgs(names, re) => program_in(base, names) && re.is_match(args),
            Matcher::Pattern(re) => re.is_match(segment),
        }
    }
}

pub fn program_in(base: &str, names: &[&str]) -> bool {
    names.iter().any(|name| {
        base == *name
            || base
                .strip_prefix(name)
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false)
    })
}

/// One row of the command table
#[derive(Debug)]
pub struct CommandRule {
    pub name: &'static str,
    pub matcher: Matcher,
    pub level: RiskLevel,
    pub reason: &'static str,
    pub requires_backup: bool,
    pub requires_reboot: bool,
    pub data_loss: bool,
    pub irreversible: bool,
    pub duration_secs: u32,
    pub component: Option<&'static str>,
}

impl CommandRule {
    fn new(name: &'static str, matcher: Matcher, level: RiskLevel, reason: &'static str) -> Self {
        Self {
            name,
            matcher,
            level,
            reason,
            requires_backup: false,
            requires_reboot: false,
            data_loss: false,
            irreversible: false,
            duration_secs: 0,
            component: None,
        }
    }

    fn backup(mut self) -> Self {
        self.requires_backup = true;
        self
    }

    fn reboot(mut self) -> Self {
        self.requires_reboot = true;
        self
    }

    fn destructive(mut self) -> Self {
        self.data_loss = true;
        self.irreversible = true;
        self
    }

    fn takes(mut self, secs: u32) -> Self {
        self.duration_secs = secs;
        self
    }

    fn touches(mut self, component: &'static str) -> Self {
        self.component = Some(component);
        self
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

fn critical_paths_regex() -> Regex {
    let alternatives: Vec<String> = CRITICAL_CONFIG_PATHS.iter().map(|p| regex::escape(p)).collect();
    re(&alternatives.join("|"))
}

lazy_static! {
    /// Command rules in priority order
    pub static ref COMMAND_RULES: Vec<CommandRule> = {
        use Matcher::*;
        use RiskLevel::*;
        const RECURSIVE: &str = r"(^|\s)(-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)(\s|$)";
        const RECURSIVE_UPPER: &str = r"(^|\s)(-[a-zA-Z]*R[a-zA-Z]*|--recursive)(\s|$)";
        vec![
            // Medium tier
            CommandRule::new("package-manager", Program(PACKAGE_MANAGERS), Medium, "Package manager operation")
                .takes(120)
                .touches("packages"),
            CommandRule::new("service-control", Program(&["systemctl", "service"]), Medium, "Service control")
                .touches("services"),
            CommandRule::new("service-stop", ProgramArgs(&["systemctl", "service"], re(r"\b(stop|disable|mask)\b")), Medium, "Stops or disables a service"),
            CommandRule::new("permissions", Program(&["chmod", "chown", "chgrp"]), Medium, "Changes permissions or ownership"),
            CommandRule::new("file-ops", Program(&["cp", "mv", "mkdir", "touch", "ln"]), Medium, "Modifies files"),
            CommandRule::new("users", Program(&["useradd", "usermod", "userdel", "groupadd", "groupdel", "groupmod"]), Medium, "User or group manipulation")
                .touches("users"),
            CommandRule::new("processes", Program(&["kill", "killall", "pkill"]), Medium, "Terminates processes"),
            CommandRule::new("cron", Program(&["crontab"]), Medium, "Cron manipulation"),
            CommandRule::new("ssh-keygen", ProgramArgs(&["ssh-keygen"], re(r"(^|\s)-f\s")), Medium, "SSH key generation"),
            // High tier
            CommandRule::new("package-removal", ProgramArgs(PACKAGE_MANAGERS, re(r"\b(remove|purge|autoremove|uninstall|erase)\b")), High, "Removes installed packages")
                .backup(),
            CommandRule::new("recursive-permissions", ProgramArgs(&["chmod", "chown", "chgrp"], re(RECURSIVE_UPPER)), High, "Recursive permission change")
                .backup(),
            CommandRule::new("delete", Program(&["rm", "rmdir", "shred", "unlink"]), High, "Deletes files")
                .backup()
                .destructive(),
            CommandRule::new("mount", Program(&["mount", "umount"]), High, "Changes mounted filesystems")
                .backup()
                .touches("filesystems"),
            CommandRule::new("firewall", Program(&["iptables", "ip6tables", "ufw", "nft", "firewalld", "firewall-cmd"]), High, "Firewall manipulation")
                .backup()
                .touches("network"),
            CommandRule::new("power", Program(&["shutdown", "reboot", "poweroff", "halt", "init"]), High, "System power control")
                .backup()
                .reboot(),
            CommandRule::new("credentials", Program(&["passwd", "chpasswd", "visudo"]), High, "Credential or sudo configuration")
                .backup()
                .touches("users"),
            CommandRule::new("etc-write", Pattern(re(r">>?\s*/etc/")), High, "Writes into /etc")
                .backup()
                .touches("system-config"),
            CommandRule::new("critical-config", Pattern(critical_paths_regex()), High, "References critical system configuration")
                .backup()
                .touches("system-config"),
            // Critical tier
            CommandRule::new("recursive-delete", ProgramArgs(&["rm"], re(RECURSIVE)), Critical, "Recursive delete")
                .backup()
                .destructive(),
            CommandRule::new("disk-write", Program(&["dd"]), Critical, "Raw disk write")
                .destructive()
                .takes(300)
                .touches("disks"),
            CommandRule::new("format", Program(&["mkfs", "fdisk", "parted", "gdisk", "wipefs"]), Critical, "Formats or repartitions a disk")
                .destructive()
                .touches("disks"),
        ]
    };

    /// Commands refused outright by the safety gate
    pub static ref BLOCKED_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (re(r"rm\s+(-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)\s+(/|~|/home|/\*)/?\s*$"), "Recursive delete of root or home"),
        (re(r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&"), "Fork bomb pattern"),
        (re(r">\s*/dev/sd[a-z]"), "Direct write to block device"),
        (re(r"dd\s+.*of=/dev/(sd[a-z]|nvme|hd[a-z])"), "dd to block device"),
        (re(r"\bmkfs"), "Filesystem creation"),
        (re(r"\b(fdisk|parted|gdisk)\b"), "Partition manipulation"),
        (re(r"chmod\s+(-R\s+)?777\s+/"), "Recursive chmod 777 on root paths"),
        (re(r"chown\s+-R\s+.*\s+/\S*\s*$"), "Recursive chown on root paths"),
        (re(r"/etc/passwd|/etc/shadow"), "Accessing password files"),
        (re(r"curl\s+.*\|\s*(ba|z)?sh\b"), "Pipe curl to shell"),
        (re(r"wget\s+.*\|\s*(ba|z)?sh\b"), "Pipe wget to shell"),
        (re(r"\beval\s+.*\$"), "Eval with variable expansion"),
    ];

    /// Splits compound commands into segments
    pub static ref SEGMENT_SEPARATOR: Regex = re(r"\s*(?:&&|\|\||;|\||\n)\s*");

    /// `$( … )` and backtick substitutions
    pub static ref SUBSTITUTION: Regex = re(r"\$\(([^()]*)\)|`([^`]*)`");

    /// Output redirections and their targets
    pub static ref REDIRECT: Regex = re(r"(?:^|[^<>&])>{1,2}\s*([^\s&|;]+)");

    /// File-content rules for `assess_action`
    pub static ref CONTENT_RULES: Vec<(&'static str, Regex, RiskLevel, &'static str)> = vec![
        ("destructive", re(r"(?i)\b(drop\s+table|truncate\s+table|rm\s+-rf|shutil\.rmtree|os\.remove|remove_dir_all|fs\.rmSync|unlink\()"), RiskLevel::High, "Content performs destructive operations"),
        ("security", re(r"(?i)\b(password|secret|api[_-]?key|private[_-]?key|credential)s?\b"), RiskLevel::High, "Content touches credentials or secrets"),
        ("system", re(r"(?i)\b(subprocess|os\.system|std::process::Command|child_process|exec\(|eval\()"), RiskLevel::High, "Content spawns processes or evaluates code"),
        ("external", re(r"(?i)(requests\.(get|post|put|delete)|reqwest::|fetch\(|urllib|https?://)"), RiskLevel::High, "Content calls external services"),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_compile() {
        assert!(!COMMAND_RULES.is_empty());
        assert!(!BLOCKED_PATTERNS.is_empty());
        assert!(!CONTENT_RULES.is_empty());
    }

    #[test]
    fn test_rule_names_unique() {
        let mut names: Vec<_> = COMMAND_RULES.iter().map(|r| r.name).collect();
        names.sort();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn test_program_in_accepts_dotted_variants() {
        assert!(program_in("mkfs.ext4", &["mkfs"]));
        assert!(program_in("rm", &["rm"]));
        assert!(!program_in("rmdirx", &["rmdir"]));
        assert!(!program_in("rsync", &["rm"]));
    }

    #[test]
    fn test_recursive_delete_rule_matches_flag_variants() {
        let rule = COMMAND_RULES
            .iter()
            .find(|r| r.name == "recursive-delete")
            .unwrap();
        assert!(rule.matcher.matches("rm", "-rf /tmp/x", "rm -rf /tmp/x"));
        assert!(rule.matcher.matches("rm", "-fR build", "rm -fR build"));
        assert!(rule.matcher.matches("rm", "--recursive x", "rm --recursive x"));
        assert!(!rule.matcher.matches("rm", "-f notes.txt", "rm -f notes.txt"));
    }
}
