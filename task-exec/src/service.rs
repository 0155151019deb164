use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    config::EngineConfig,
    error::Error,
    executor::TaskExecutor,
    registry::TaskRegistry,
    types::{TaskContext, TaskId, TaskRequest, TaskSnapshot},
};

/// Entry point for callers submitting work to the engine
#[derive(Clone)]
pub struct TaskExecutionService {
    executor: Arc<TaskExecutor>,
    registry: Arc<TaskRegistry>,
}

impl TaskExecutionService {
    pub async fn new(config: EngineConfig) -> Result<Self, Error> {
        Self::with_registry(config, Arc::new(TaskRegistry::new())).await
    }

    /// Builds an engine around an explicitly owned registry
    pub async fn with_registry(
        config: EngineConfig,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self, Error> {
        let executor = TaskExecutor::new(config, Arc::clone(&registry)).await?;
        Ok(Self {
            executor: Arc::new(executor),
            registry,
        })
    }

    /// Registers the task and starts it in the background. Never waits for
    /// the task to run; must be called from within a Tokio runtime.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskId, Error> {
        let id = self.register(&request)?;

        let executor = Arc::clone(&self.executor);
        let task_id = id.clone();
        tokio::spawn(async move {
            executor.execute(&task_id, &request).await;
        });

        Ok(id)
    }

    /// Registers the task and drives it to a terminal state on the caller's task
    pub async fn run(&self, request: TaskRequest) -> Result<TaskSnapshot, Error> {
        let id = self.register(&request)?;
        self.executor.execute(&id, &request).await;
        self.status(&id)
    }

    pub fn status(&self, id: &TaskId) -> Result<TaskSnapshot, Error> {
        self.registry.get(id).map(|context| context.snapshot())
    }

    /// Flags the task; a running process is killed at the executor's next check
    pub fn cancel(&self, id: &TaskId) -> bool {
        self.registry.mark_cancelled(id)
    }

    /// Drops finished tasks older than `max_age`
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.registry.sweep(max_age)
    }

    /// Drops finished tasks older than the configured retention
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup(self.executor.config().retention)
    }

    /// Polls `status` until the task reaches a terminal state
    pub async fn wait(&self, id: &TaskId, poll: Duration) -> Result<TaskSnapshot, Error> {
        loop {
            let snapshot = self.status(id)?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        self.executor.config()
    }

    fn register(&self, request: &TaskRequest) -> Result<TaskId, Error> {
        let id = request.id.clone().unwrap_or_else(TaskId::generate);
        self.registry
            .register(TaskContext::new(id.clone(), request))?;

        info!(
            "Submitted task {} ({:?}, {})",
            id,
            request.kind.task_type(),
            request.security_level
        );
        debug!("Task {} owner: {:?}", id, request.owner);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SecurityLevel, TaskKind, TaskStatus};
    use serde_json::json;

    async fn service(dir: &tempfile::TempDir) -> Result<TaskExecutionService, Error> {
        TaskExecutionService::new(EngineConfig::default().with_scratch_dir(dir.path())).await
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() -> Result<(), Error> {
        let dir = tempfile::tempdir()?;
        let service = service(&dir).await?;

        let request = TaskRequest::new(
            TaskKind::command("rm -rf /", json!({})),
            SecurityLevel::Medium,
        )
        .with_id("fixed");

        let id = service.submit(request.clone())?;
        assert_eq!(id.as_str(), "fixed");
        assert!(matches!(
            service.submit(request),
            Err(Error::DuplicateTask(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn engines_do_not_share_registries() -> Result<(), Error> {
        let first_dir = tempfile::tempdir()?;
        let second_dir = tempfile::tempdir()?;
        let first = service(&first_dir).await?;
        let second = service(&second_dir).await?;

        let request = TaskRequest::new(
            TaskKind::command("rm -rf /", json!({})),
            SecurityLevel::Medium,
        );
        let snapshot = first.run(request).await?;

        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert!(matches!(second.status(&snapshot.id), Err(Error::NotFound(_))));
        Ok(())
    }
}
