//! Runner configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use verity_core::{Result, VerityError};

/// Concurrency used when `concurrency` is 0
pub const DEFAULT_CONCURRENCY_CAP: usize = 10;

/// Largest accepted explicit concurrency
pub const MAX_CONCURRENCY: usize = 1024;

/// Prefix of environment variables read by [`RunnerConfig::merge_with_env`]
pub const ENV_PREFIX: &str = "VERITY_";

/// Configuration of a [`Runner`](super::Runner)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Top-level tests executing at once; 0 selects the default cap, 1 is sequential
    pub concurrency: usize,
    /// Stop scheduling new tests after this many failures
    pub maxfail: Option<usize>,
    /// Stop after the first failure
    pub fail_fast: bool,
    /// Per top-level test timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Open a tracing span per executed test
    pub enable_tracing: bool,
    /// Environment variables copied into the run environment
    pub env_allowlist: Vec<String>,
    /// Sensitive variables captured only as `***` plus their last four characters
    pub masked_env_keys: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            maxfail: None,
            fail_fast: false,
            timeout_ms: None,
            enable_tracing: false,
            env_allowlist: [
                "MODEL_VENDOR",
                "INFERENCE_VENDOR",
                "CLOUD_ML_REGION",
                "GOOGLE_CLOUD_PROJECT",
                "AWS_REGION",
            ]
            .map(String::from)
            .to_vec(),
            masked_env_keys: [
                "OPENAI_API_KEY",
                "ANTHROPIC_API_KEY",
                "AWS_ACCESS_KEY_ID",
                "AWS_SECRET_ACCESS_KEY",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl RunnerConfig {
    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            VerityError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `VERITY_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `VERITY_*` overrides from `vars`
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(field) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match field {
                "CONCURRENCY" => self.concurrency = parse(key.as_ref(), value)?,
                "MAXFAIL" => self.maxfail = Some(parse(key.as_ref(), value)?),
                "FAIL_FAST" => self.fail_fast = parse_bool(key.as_ref(), value)?,
                "TIMEOUT_MS" => self.timeout_ms = Some(parse(key.as_ref(), value)?),
                "ENABLE_TRACING" => self.enable_tracing = parse_bool(key.as_ref(), value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.concurrency > MAX_CONCURRENCY {
            return Err(VerityError::config(format!(
                "concurrency {} exceeds maximum {MAX_CONCURRENCY}",
                self.concurrency
            )));
        }
        if self.maxfail == Some(0) {
            return Err(VerityError::config("maxfail must be at least 1"));
        }
        if self.timeout_ms == Some(0) {
            return Err(VerityError::config("timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Concurrency with the 0 sentinel resolved
    pub fn effective_concurrency(&self) -> usize {
        match self.concurrency {
            0 => DEFAULT_CONCURRENCY_CAP,
            n => n,
        }
    }

    /// Failure count after which scheduling stops
    pub fn effective_maxfail(&self) -> Option<usize> {
        if self.fail_fast {
            Some(1)
        } else {
            self.maxfail
        }
    }

    /// Per-test timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| VerityError::config(format!("invalid value '{value}' in {key}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(VerityError::config(format!("invalid boolean '{value}' in {key}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid_and_sequential() {
        let config = RunnerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_concurrency(), 1);
        assert_eq!(config.effective_maxfail(), None);
    }

    #[test]
    fn zero_concurrency_uses_cap() {
        let config = RunnerConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_concurrency(), DEFAULT_CONCURRENCY_CAP);
    }

    #[test]
    fn parses_partial_toml() {
        let config = RunnerConfig::from_toml_str(
            r#"
            concurrency = 4
            maxfail = 2
            timeout_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.maxfail, Some(2));
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
        assert!(!config.enable_tracing);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verity.toml");
        std::fs::write(&path, "fail_fast = true\nenable_tracing = true\n").unwrap();
        let config = RunnerConfig::load(&path).unwrap();
        assert!(config.enable_tracing);
        assert_eq!(config.effective_maxfail(), Some(1));

        assert_matches!(
            RunnerConfig::load(dir.path().join("missing.toml")),
            Err(VerityError::Config { .. })
        );
    }

    #[test]
    fn invalid_toml_is_config_error() {
        assert_matches!(
            RunnerConfig::from_toml_str("concurrency = \"many\""),
            Err(VerityError::Config { .. })
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = RunnerConfig::default();
        config
            .merge_with_vars([
                ("VERITY_CONCURRENCY", "8"),
                ("VERITY_FAIL_FAST", "true"),
                ("UNRELATED", "x"),
            ])
            .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.effective_maxfail(), Some(1));

        assert_matches!(
            config.merge_with_vars([("VERITY_MAXFAIL", "lots")]),
            Err(VerityError::Config { .. })
        );
    }

    #[test]
    fn validate_rejects_out_of_range() {
        for config in [
            RunnerConfig {
                concurrency: MAX_CONCURRENCY + 1,
                ..Default::default()
            },
            RunnerConfig {
                maxfail: Some(0),
                ..Default::default()
            },
            RunnerConfig {
                timeout_ms: Some(0),
                ..Default::default()
            },
        ] {
            assert_matches!(config.validate(), Err(VerityError::Config { .. }));
        }
    }
}
