pub mod defaults {
    use crate::{EngineConfig, ResourceLimits, Result, TaskExecutionService};
    use tempfile::TempDir;
    use tokio::time::Duration;

    pub fn default_test_limits() -> ResourceLimits {
        ResourceLimits {
            max_memory_bytes: 100 * 1024 * 1024, // 100MB
            max_cpu_percent: 100.0,
            max_file_size_bytes: 10 * 1024 * 1024, // 10MB
        }
    }

    pub fn test_config(scratch: &TempDir) -> EngineConfig {
        EngineConfig::default()
            .with_scratch_dir(scratch.path())
            .with_limits(default_test_limits())
            .with_poll_interval(poll_interval())
            .with_script_timeout(default_timeout())
            .with_command_timeout(default_timeout())
    }

    /// Engine with its own scratch directory; keep the `TempDir` alive
    pub async fn setup_test_service() -> Result<(TaskExecutionService, TempDir)> {
        let scratch = tempfile::tempdir()?;
        let service = TaskExecutionService::new(test_config(&scratch)).await?;
        Ok((service, scratch))
    }

    pub async fn setup_service_with(config: EngineConfig) -> Result<TaskExecutionService> {
        TaskExecutionService::new(config).await
    }

    pub fn poll_interval() -> Duration {
        Duration::from_millis(100)
    }

    pub fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn short_timeout() -> Duration {
        Duration::from_secs(1)
    }
}

pub mod scratch {
    use std::path::Path;

    pub fn scratch_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.file_name().to_string_lossy().to_string())
                    .filter(|name| name.starts_with("task_"))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub mod process {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    /// Signal 0 probes for existence without delivering anything
    pub fn is_alive(pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
}
