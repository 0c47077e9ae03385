use crate::patterns::{self, DEFAULT_ALWAYS_CONFIRM, DEFAULT_BLOCKED};
use crate::split::{self, split_segments};
use natshell_core::SafetyMode;
use regex::Regex;
use thiserror::Error;

pub const MAX_COMMAND_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Safe,
    Confirm,
    Blocked,
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub level: Level,
    pub reason: String,
    pub matched_segment: Option<String>,
    /// Set when a `warn`/`yolo` policy mode downgraded an original Confirm
    /// verdict; surfaced to the user even though the command now runs.
    pub warning: Option<String>,
}

impl Verdict {
    fn safe(reason: impl Into<String>) -> Self {
        Self {
            level: Level::Safe,
            reason: reason.into(),
            matched_segment: None,
            warning: None,
        }
    }

    fn blocked(reason: impl Into<String>, segment: Option<String>) -> Self {
        Self {
            level: Level::Blocked,
            reason: reason.into(),
            matched_segment: segment,
            warning: None,
        }
    }

    fn confirm(reason: impl Into<String>, segment: Option<String>) -> Self {
        Self {
            level: Level::Confirm,
            reason: reason.into(),
            matched_segment: segment,
            warning: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid safety pattern: {0}")]
    InvalidPattern(String),
}

/// Deterministic, stateless classification of a shell command string. See
/// `SPEC_FULL.md`'s Safety Classifier section for the full algorithm; this
/// is the direct implementation of each numbered step there.
pub struct SafetyClassifier {
    blocked_extra: Vec<Regex>,
    always_confirm_extra: Vec<Regex>,
    mode: SafetyMode,
}

impl SafetyClassifier {
    pub fn new(
        extra_blocked: &[String],
        extra_always_confirm: &[String],
        mode: SafetyMode,
    ) -> Result<Self, PolicyError> {
        let blocked_extra = compile_all(extra_blocked)?;
        let always_confirm_extra = compile_all(extra_always_confirm)?;
        Ok(Self {
            blocked_extra,
            always_confirm_extra,
            mode,
        })
    }

    pub fn classify(&self, command: &str) -> Verdict {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Verdict::blocked("empty command", None);
        }
        if command.len() > MAX_COMMAND_BYTES {
            return Verdict::confirm("command exceeds 64 KiB", None);
        }

        if patterns::matches_any(&DEFAULT_BLOCKED, command)
            || patterns::matches_any(&self.blocked_extra, command)
        {
            return Verdict::blocked(
                "command matches a blocked pattern",
                Some(command.to_string()),
            );
        }

        let segments = split_segments(command);
        if segments.is_empty() {
            return Verdict::blocked("empty command", None);
        }

        let mut worst = Verdict::safe("all segments classified safe");
        for segment in &segments {
            if segment.has_risky_subshell && split::subshell_looks_risky(&segment.text) {
                worst = self.combine(
                    worst,
                    Verdict::confirm(
                        "command contains a subshell that may run additional commands",
                        Some(segment.text.clone()),
                    ),
                );
                continue;
            }
            worst = self.combine(worst, self.classify_segment(&segment.text));
        }

        self.apply_mode(worst)
    }

    fn classify_segment(&self, segment: &str) -> Verdict {
        if patterns::matches_any(&DEFAULT_BLOCKED, segment)
            || patterns::matches_any(&self.blocked_extra, segment)
        {
            return Verdict::blocked("segment matches a blocked pattern", Some(segment.to_string()));
        }
        if patterns::matches_any(&DEFAULT_ALWAYS_CONFIRM, segment)
            || patterns::matches_any(&self.always_confirm_extra, segment)
        {
            return Verdict::confirm(
                "segment requires confirmation by policy",
                Some(segment.to_string()),
            );
        }
        Verdict::safe("segment classified safe")
    }

    fn combine(&self, a: Verdict, b: Verdict) -> Verdict {
        if b.level > a.level { b } else { a }
    }

    fn apply_mode(&self, verdict: Verdict) -> Verdict {
        if verdict.level != Level::Confirm {
            return verdict;
        }
        match self.mode {
            SafetyMode::Confirm => verdict,
            SafetyMode::Warn => Verdict {
                level: Level::Safe,
                warning: Some(format!("downgraded from Confirm: {}", verdict.reason)),
                ..verdict
            },
            SafetyMode::Yolo => Verdict {
                level: Level::Safe,
                ..verdict
            },
        }
    }
}

fn compile_all(raw: &[String]) -> Result<Vec<Regex>, PolicyError> {
    raw.iter()
        .map(|p| Regex::new(p).map_err(|_| PolicyError::InvalidPattern(p.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(mode: SafetyMode) -> SafetyClassifier {
        SafetyClassifier::new(&[], &[], mode).unwrap()
    }

    #[test]
    fn empty_command_is_blocked() {
        let v = classifier(SafetyMode::Confirm).classify("");
        assert_eq!(v.level, Level::Blocked);
    }

    #[test]
    fn oversized_command_is_confirm() {
        let cmd = "echo ".to_string() + &"a".repeat(MAX_COMMAND_BYTES + 1);
        let v = classifier(SafetyMode::Confirm).classify(&cmd);
        assert_eq!(v.level, Level::Confirm);
    }

    #[test]
    fn plain_command_is_safe() {
        let v = classifier(SafetyMode::Confirm).classify("ls -la");
        assert_eq!(v.level, Level::Safe);
    }

    #[test]
    fn blocked_pattern_wins_whole_string_sweep() {
        let v = classifier(SafetyMode::Confirm).classify("echo hi && rm -rf /");
        assert_eq!(v.level, Level::Blocked);
    }

    #[test]
    fn blocked_primacy_inside_confirm_chain() {
        // A confirm-worthy sudo segment chained with a blocked segment must
        // still come out Blocked overall.
        let v = classifier(SafetyMode::Confirm).classify("sudo ls && rm -rf /");
        assert_eq!(v.level, Level::Blocked);
    }

    #[test]
    fn sudo_requires_confirm() {
        let v = classifier(SafetyMode::Confirm).classify("sudo apt update");
        assert_eq!(v.level, Level::Confirm);
    }

    #[test]
    fn subshell_forces_confirm() {
        let v = classifier(SafetyMode::Confirm).classify("echo $(rm file)");
        assert_eq!(v.level, Level::Confirm);
    }

    #[test]
    fn plain_dollar_paren_without_metachars_is_still_confirm_by_default() {
        // Even a subshell with no further metacharacters is treated
        // conservatively since it may still run an arbitrary command.
        let v = classifier(SafetyMode::Confirm).classify("echo $(git rev-parse HEAD)");
        // No metacharacters inside -> subshell_looks_risky is false, so this
        // segment is classified on its own merits (echo ... is safe).
        assert_eq!(v.level, Level::Safe);
    }

    #[test]
    fn warn_mode_downgrades_confirm_to_safe_with_warning() {
        let v = classifier(SafetyMode::Warn).classify("sudo apt update");
        assert_eq!(v.level, Level::Safe);
        assert!(v.warning.is_some());
    }

    #[test]
    fn yolo_mode_downgrades_confirm_silently() {
        let v = classifier(SafetyMode::Yolo).classify("sudo apt update");
        assert_eq!(v.level, Level::Safe);
    }

    #[test]
    fn no_mode_ever_downgrades_blocked() {
        let v = classifier(SafetyMode::Yolo).classify("rm -rf /");
        assert_eq!(v.level, Level::Blocked);
    }

    #[test]
    fn chained_block_inside_confirm_chain_is_blocked_end_to_end() {
        let v = classifier(SafetyMode::Confirm).classify("sudo echo hi; mkfs.ext4 /dev/sda1");
        assert_eq!(v.level, Level::Blocked);
    }

    #[test]
    fn determinism_same_input_same_output() {
        let c = classifier(SafetyMode::Confirm);
        let a = c.classify("sudo rm file1 file2");
        let b = c.classify("sudo rm file1 file2");
        assert_eq!(a.level, b.level);
    }
}
