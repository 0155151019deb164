use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{error::Error, types::duration_serde, types::ResourceLimits};

/// Engine configuration, loadable from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Working directory for every child and home of the wrapper files
    pub scratch_dir: PathBuf,

    /// Interpreter used for script tasks
    pub interpreter: String,

    /// Wall-clock deadline for script tasks
    #[serde(with = "duration_serde")]
    pub script_timeout: Duration,

    /// Wall-clock deadline for command tasks
    #[serde(with = "duration_serde")]
    pub command_timeout: Duration,

    /// Resource monitor tick
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Age after which finished tasks are swept
    #[serde(with = "duration_serde")]
    pub retention: Duration,

    pub limits: ResourceLimits,

    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Also apply the restricted-token denylist at `Medium`
    pub medium_denylist: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("task-exec"),
            interpreter: "python3".to_string(),
            script_timeout: Duration::from_secs(300),
            command_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            retention: Duration::from_secs(24 * 60 * 60),
            limits: ResourceLimits::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        let config: EngineConfig =
            toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.interpreter.trim().is_empty() {
            return Err(Error::Config("interpreter must not be empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be positive".to_string()));
        }
        if self.script_timeout.is_zero() || self.command_timeout.is_zero() {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }
        if self.limits.max_memory_bytes == 0 {
            return Err(Error::Config("max_memory_bytes must be positive".to_string()));
        }
        Ok(())
    }

    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_medium_denylist(mut self, enabled: bool) -> Self {
        self.policy.medium_denylist = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn defaults_are_conservative() {
        let config = EngineConfig::default();
        assert_eq!(config.script_timeout, Duration::from_secs(300));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.retention, Duration::from_secs(86_400));
        assert_eq!(config.limits.max_memory_bytes, 512 * 1024 * 1024);
        assert_eq!(config.limits.max_cpu_percent, 50.0);
        assert!(!config.policy.medium_denylist);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            interpreter = "python3.11"
            script_timeout = 60

            [limits]
            max_memory_bytes = 104857600

            [policy]
            medium_denylist = true
            "#,
        )
        .unwrap();

        assert_eq!(config.interpreter, "python3.11");
        assert_eq!(config.script_timeout, Duration::from_secs(60));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.limits.max_memory_bytes, 100 * 1024 * 1024);
        assert_eq!(config.limits.max_cpu_percent, 50.0);
        assert!(config.policy.medium_denylist);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = EngineConfig::from_toml_str("poll_interval = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("engine.toml");
        file.write_str("command_timeout = 5\nscratch_dir = \"/tmp/engine-scratch\"\n")
            .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.scratch_dir, PathBuf::from("/tmp/engine-scratch"));

        let missing = EngineConfig::load(temp.child("missing.toml").path());
        assert!(matches!(missing, Err(Error::Config(_))));
    }
}
