//! Local side effects requested by a prompt: file writes and shell commands.
//!
//! The security model is two layers of heuristics, not isolation:
//!
//! 1. API-token auth on the request (see `gateway`)
//! 2. Command allowlist + substring blocklist (see [`policy`])
//!
//! There is no filesystem namespacing, resource limiting or network
//! isolation. File paths and working directories are used as given.

pub mod files;
pub mod policy;
pub mod shell;

pub use files::{FileEntry, FileWriter};
pub use policy::CommandPolicy;
pub use shell::{CommandBatch, CommandRunner};
