//! Run environment snapshot

use std::collections::BTreeMap;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::RunnerConfig;

/// Where and from what source state a run was executed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEnvironment {
    /// `HEAD` commit hash
    pub commit_hash: Option<String>,
    /// Current branch
    pub branch: Option<String>,
    /// Whether the work tree had uncommitted changes
    pub dirty: Option<bool>,
    /// Operating system
    pub os: String,
    /// CPU architecture
    pub arch: String,
    /// Host name
    pub hostname: Option<String>,
    /// Working directory of the process
    pub working_directory: Option<String>,
    /// Framework version
    pub verity_version: String,
    /// Captured environment variables, sensitive ones masked
    pub env_vars: BTreeMap<String, String>,
}

impl RunEnvironment {
    /// Snapshot the current process environment
    pub fn capture(config: &RunnerConfig) -> Self {
        let (commit_hash, branch, dirty) = git_info();
        Self {
            commit_hash,
            branch,
            dirty,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: hostname(),
            working_directory: std::env::current_dir()
                .ok()
                .map(|p| p.display().to_string()),
            verity_version: env!("CARGO_PKG_VERSION").to_string(),
            env_vars: filter_env(std::env::vars(), config),
        }
    }
}

/// Keep allow-listed variables verbatim and mask sensitive ones
pub fn filter_env<I>(vars: I, config: &RunnerConfig) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| {
            if config.masked_env_keys.contains(&key) {
                Some((key, mask(&value)))
            } else if config.env_allowlist.contains(&key) {
                Some((key, value))
            } else {
                None
            }
        })
        .collect()
}

/// `***` followed by the last four characters of values longer than four
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 4 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("***{tail}")
    } else {
        "***".to_string()
    }
}

fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        trace!(program, ?args, "command failed");
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn git_info() -> (Option<String>, Option<String>, Option<bool>) {
    if run("git", &["rev-parse", "--is-inside-work-tree"]).is_none() {
        return (None, None, None);
    }
    let commit = run("git", &["rev-parse", "HEAD"]);
    let branch = run("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let dirty = run("git", &["status", "--porcelain"]).map(|status| !status.is_empty());
    (commit, branch, dirty)
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| run("hostname", &[]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_keep_last_four() {
        assert_eq!(mask("sk-abcdef1234"), "***1234");
        assert_eq!(mask("abcd"), "***");
        assert_eq!(mask(""), "***");
    }

    #[test]
    fn filter_keeps_allowlisted_and_masks_sensitive() {
        let config = RunnerConfig::default();
        let vars = vec![
            ("AWS_REGION".to_string(), "eu-west-1".to_string()),
            ("OPENAI_API_KEY".to_string(), "sk-secretvalue9876".to_string()),
            ("HOME".to_string(), "/home/me".to_string()),
        ];
        let filtered = filter_env(vars, &config);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered["AWS_REGION"], "eu-west-1");
        assert_eq!(filtered["OPENAI_API_KEY"], "***9876");
    }

    #[test]
    fn capture_fills_platform() {
        let env = RunEnvironment::capture(&RunnerConfig::default());
        assert_eq!(env.os, std::env::consts::OS);
        assert!(!env.verity_version.is_empty());
    }
}
