use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    error::Error,
    types::{
        ErrorKind, ResourceUsage, TaskContext, TaskError, TaskId, TaskResult, TaskStatus,
    },
};

/// In-memory task contexts behind a single lock
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, TaskContext>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, context: TaskContext) -> Result<(), Error> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&context.id) {
            return Err(Error::DuplicateTask(context.id));
        }
        debug!("Registered task {}", context.id);
        tasks.insert(context.id.clone(), context);
        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Result<TaskContext, Error> {
        self.tasks
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    pub fn is_cancelled(&self, id: &TaskId) -> bool {
        self.tasks
            .lock()
            .get(id)
            .map_or(false, |context| context.cancel_requested)
    }

    /// Flags a non-terminal task as cancelled. The process, if any, keeps
    /// running until the executor reaches its next decision point.
    pub fn mark_cancelled(&self, id: &TaskId) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(context) = tasks.get_mut(id) else {
            return false;
        };
        if context.status.is_terminal() {
            return false;
        }

        context.cancel_requested = true;
        context.status = TaskStatus::Cancelled;
        context.ended_at = Some(Utc::now());
        context.error = Some(TaskError {
            kind: ErrorKind::Cancelled,
            message: "Task cancelled".to_string(),
            detail: None,
        });
        info!("Task {} cancelled", id);
        true
    }

    /// Moves a pending task to `Running` once its process exists
    pub fn mark_running(&self, id: &TaskId, pid: u32) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(id) {
            Some(context) if context.status.can_transition_to(TaskStatus::Running) => {
                context.status = TaskStatus::Running;
                context.pid = Some(pid);
                true
            }
            _ => false,
        }
    }

    /// Publishes the terminal state. Returns `false` when the task is gone
    /// or already terminal, in which case nothing changes.
    pub fn finish(
        &self,
        id: &TaskId,
        outcome: Result<TaskResult, TaskError>,
        usage: Option<ResourceUsage>,
    ) -> bool {
        let status = match &outcome {
            Ok(_) => TaskStatus::Completed,
            Err(error) => match error.kind {
                ErrorKind::ExecutionTimeout => TaskStatus::Timeout,
                ErrorKind::Cancelled => TaskStatus::Cancelled,
                _ => TaskStatus::Failed,
            },
        };

        let mut tasks = self.tasks.lock();
        let Some(context) = tasks.get_mut(id) else {
            return false;
        };
        if !context.status.can_transition_to(status) {
            debug!(
                "Task {} already {}, dropping {} outcome",
                id, context.status, status
            );
            return false;
        }

        context.status = status;
        context.ended_at = Some(Utc::now());
        context.usage = usage;
        match outcome {
            Ok(result) => context.result = Some(result),
            Err(error) => context.error = Some(error),
        }
        true
    }

    /// Removes terminal tasks that ended more than `max_age` ago
    pub fn sweep(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, context| {
            let expired = context.status.is_terminal()
                && context.ended_at.map_or(false, |ended| ended < cutoff);
            !expired
        });

        let removed = before - tasks.len();
        if removed > 0 {
            info!("Swept {} finished tasks", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
