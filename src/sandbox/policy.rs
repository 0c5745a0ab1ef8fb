//! Command policy: decides which command strings may run.
//!
//! Two layers, both required to pass:
//!
//! 1. A substring blocklist applied to the raw string, before any parsing.
//!    Fragments buried inside arguments or quotes are still caught.
//! 2. An allowlist matched exactly against the first shell word. No path
//!    normalization: `./git` and `/usr/bin/git` are not `git`.
//!
//! This is a heuristic filter, not a sandbox. An allowed program can still
//! be asked to do harmful things through its own arguments.

use std::collections::BTreeSet;

use thiserror::Error;

/// Programs permitted as the first token of a command.
const ALLOWED_COMMANDS: &[&str] = &[
    "composer",
    "php",
    "git",
    "npm",
    "yarn",
    "mkdir",
    "mv",
    "cp",
    "ls",
    "chmod",
    "phpstan",
    "php-cs-fixer",
];

/// Substrings that reject a command wherever they appear.
const BLOCKED_TOKENS: &[&str] = &["rm", "sudo", "curl", "wget", "chmod 777", "mkfs", "dd", ":(){"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("Command contains blocked token")]
    BlockedToken,
    #[error("Invalid command syntax: {0}")]
    InvalidSyntax(String),
    #[error("Empty command provided")]
    Empty,
    #[error("Command '{0}' is not allowed")]
    NotAllowed(String),
}

/// Allowlist + blocklist, fixed at construction and shared read-only.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed: BTreeSet<String>,
    blocked: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(ALLOWED_COMMANDS.iter().copied(), BLOCKED_TOKENS.iter().copied())
    }
}

impl CommandPolicy {
    pub fn new<A, B>(allowed: A, blocked: B) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        B: IntoIterator,
        B::Item: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
            blocked: blocked.into_iter().map(Into::into).collect(),
        }
    }

    /// Validates a raw command string and returns its shell words.
    ///
    /// The returned tokens, never `raw`, are what gets executed, so no
    /// second round of shell interpretation happens.
    pub fn validate(&self, raw: &str) -> Result<Vec<String>, PolicyViolation> {
        if self.blocked.iter().any(|token| raw.contains(token.as_str())) {
            return Err(PolicyViolation::BlockedToken);
        }

        let tokens =
            split_words(raw).ok_or_else(|| PolicyViolation::InvalidSyntax(raw.to_string()))?;

        let program = tokens.first().ok_or(PolicyViolation::Empty)?;
        if !self.allowed.contains(program) {
            return Err(PolicyViolation::NotAllowed(program.clone()));
        }

        Ok(tokens)
    }

    /// Allowed program names, sorted.
    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

/// Stands in for `#` while splitting; never valid in a command.
const HASH_MASK: char = '\u{E000}';

/// Shell word splitting without comment handling.
///
/// `shlex` drops everything after an unquoted word starting with `#`, which
/// would silently truncate arguments like `-m #42`. `#` is masked before
/// splitting and restored afterwards, so it is always a literal character.
fn split_words(raw: &str) -> Option<Vec<String>> {
    if raw.contains(HASH_MASK) {
        return None;
    }
    let masked = raw.replace('#', &HASH_MASK.to_string());
    let words = shlex::split(&masked)?;
    Some(
        words
            .into_iter()
            .map(|w| w.replace(HASH_MASK, "#"))
            .collect(),
    )
}
