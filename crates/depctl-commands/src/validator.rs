use depctl_domain::CommandType;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Denied { reason: String },
    RequiresConfirmation { reason: String },
    Allowed,
}

struct Pattern {
    kind: Option<CommandType>,
    regex: Regex,
    reason: &'static str,
}

fn deny_patterns() -> Vec<Pattern> {
    vec![
        Pattern {
            kind: None,
            regex: Regex::new(r"rm\s+-rf\s+/(\s|$)").unwrap(),
            reason: "refuses to recursively delete the filesystem root",
        },
        Pattern {
            kind: None,
            regex: Regex::new(r":\(\)\s*\{\s*:\|\s*:&\s*\}\s*;\s*:").unwrap(),
            reason: "fork bomb",
        },
        Pattern {
            kind: None,
            regex: Regex::new(r"curl[^|]*\|\s*sh\b").unwrap(),
            reason: "pipes a remote script directly into a shell",
        },
        Pattern {
            kind: None,
            regex: Regex::new(r"(?i)(aws_secret_access_key|AWS_SESSION_TOKEN|cat\s+.*\.aws/credentials|curl\s+[^ ]*\?.*token=)").unwrap(),
            reason: "attempts to exfiltrate credentials",
        },
        Pattern {
            kind: Some(CommandType::Shell),
            regex: Regex::new(r"^\s*dd\s+.*of=/dev/(sd|nvme|xvd)").unwrap(),
            reason: "writes directly to a raw block device",
        },
    ]
}

fn confirm_patterns() -> Vec<Pattern> {
    vec![
        Pattern {
            kind: Some(CommandType::Iac),
            regex: Regex::new(r"\bdestroy\b").unwrap(),
            reason: "destroys provisioned infrastructure",
        },
        Pattern {
            kind: Some(CommandType::Provider),
            regex: Regex::new(r"\b(terminate-instances|delete-bucket|delete-db-instance)\b").unwrap(),
            reason: "performs an irreversible cloud-provider deletion",
        },
        Pattern {
            kind: None,
            regex: Regex::new(r"\bdrop\s+(table|database)\b").unwrap(),
            reason: "drops a database object",
        },
        Pattern {
            kind: Some(CommandType::Docker),
            regex: Regex::new(r"\bsystem\s+prune\b.*-a\b").unwrap(),
            reason: "prunes all unused docker resources, including images still in use elsewhere",
        },
    ]
}

fn matches(pattern: &Pattern, command: &str, kind: CommandType) -> bool {
    match pattern.kind {
        Some(k) if k != kind => false,
        _ => pattern.regex.is_match(command),
    }
}

/// Pure, data-driven classification. The pattern tables above are
/// intentionally small and named — extend them rather than special-casing
/// individual commands in the caller.
pub fn classify(command: &str, kind: CommandType) -> Classification {
    for pattern in deny_patterns() {
        if matches(&pattern, command, kind) {
            return Classification::Denied { reason: pattern.reason.to_string() };
        }
    }
    for pattern in confirm_patterns() {
        if matches(&pattern, command, kind) {
            return Classification::RequiresConfirmation { reason: pattern.reason.to_string() };
        }
    }
    Classification::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_root_deletion() {
        let c = classify("rm -rf /", CommandType::Shell);
        assert!(matches!(c, Classification::Denied { .. }));
    }

    #[test]
    fn denies_fork_bomb() {
        let c = classify(":(){ :|:& };:", CommandType::Shell);
        assert!(matches!(c, Classification::Denied { .. }));
    }

    #[test]
    fn requires_confirmation_for_iac_destroy() {
        let c = classify("terraform destroy -auto-approve", CommandType::Iac);
        assert!(matches!(c, Classification::RequiresConfirmation { .. }));
    }

    #[test]
    fn plain_plan_is_allowed() {
        let c = classify("terraform plan -out=tfplan", CommandType::Iac);
        assert_eq!(c, Classification::Allowed);
    }

    #[test]
    fn confirmation_pattern_is_scoped_to_its_command_type() {
        // "destroy" only requires confirmation for iac commands, not shell.
        let c = classify("echo destroy", CommandType::Shell);
        assert_eq!(c, Classification::Allowed);
    }
}
