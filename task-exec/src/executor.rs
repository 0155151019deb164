use serde_json::{json, Value};
use std::{io, process::ExitStatus, sync::Arc};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    config::EngineConfig,
    error::Error,
    languages::{PythonRuntime, ScriptRuntime},
    monitor::{ResourceMonitor, SystemProcessTable},
    policy::PolicyValidator,
    registry::TaskRegistry,
    sandbox::{CapturedOutput, RunningProcess, Sandbox},
    types::{ResourceUsage, TaskId, TaskKind, TaskRequest, TaskResult, TaskType},
};

/// Which signal ended the race for a running process
enum Race {
    Exited(io::Result<ExitStatus>),
    Deadline,
    Breach(Error),
    Cancelled,
}

/// Drives a registered task from `Pending` to a terminal state
pub struct TaskExecutor {
    config: EngineConfig,
    validator: PolicyValidator,
    sandbox: Sandbox,
    runtime: Box<dyn ScriptRuntime>,
    registry: Arc<TaskRegistry>,
}

impl TaskExecutor {
    pub async fn new(config: EngineConfig, registry: Arc<TaskRegistry>) -> Result<Self, Error> {
        config.validate()?;

        let sandbox = Sandbox::new(&config.scratch_dir, config.limits.clone()).await?;
        // A wrapper older than the longest deadline has no live task
        let max_age = config.script_timeout.max(config.command_timeout);
        sandbox.purge_stale(max_age).await?;

        Ok(Self {
            validator: PolicyValidator::new(config.policy.clone()),
            runtime: Box::new(PythonRuntime::new(Some(config.interpreter.clone()))),
            sandbox,
            config,
            registry,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Runs the task to completion and publishes its terminal state.
    /// Failures never escape; they are recorded on the task.
    pub async fn execute(&self, id: &TaskId, request: &TaskRequest) {
        let (outcome, usage) = match self.prepare(id, request).await {
            Ok((process, timeout)) => {
                self.supervise(id, request.kind.task_type(), process, timeout)
                    .await
            }
            Err(e) => (Err(e), None),
        };

        self.publish(id, outcome, usage);
    }

    /// Validation, cancellation checkpoint and launch
    async fn prepare(
        &self,
        id: &TaskId,
        request: &TaskRequest,
    ) -> Result<(RunningProcess, Duration), Error> {
        let argv = self.validator.validate(&request.kind, request.security_level)?;

        if self.registry.is_cancelled(id) {
            return Err(Error::Cancelled);
        }

        let (mut process, timeout) = match &request.kind {
            TaskKind::Script { body, parameters } => {
                let process = self
                    .sandbox
                    .launch_script(id, self.runtime.as_ref(), body, parameters)
                    .await?;
                (process, self.config.script_timeout)
            }
            TaskKind::Command { parameters, .. } => {
                let process = self.sandbox.launch_command(&argv, parameters).await?;
                (process, self.config.command_timeout)
            }
        };

        if !self.registry.mark_running(id, process.pid()) {
            // Cancelled while launching
            process.kill().await;
            return Err(Error::Cancelled);
        }

        info!(
            "Task {} running as process {} ({:?}, {})",
            id,
            process.pid(),
            request.kind.task_type(),
            request.security_level
        );
        Ok((process, timeout))
    }

    /// Races natural exit against the deadline and the resource monitor
    async fn supervise(
        &self,
        id: &TaskId,
        task_type: TaskType,
        mut process: RunningProcess,
        timeout: Duration,
    ) -> (Result<TaskResult, Error>, Option<ResourceUsage>) {
        let monitor = ResourceMonitor::new(
            process.pid(),
            self.config.limits.clone(),
            self.config.poll_interval,
            SystemProcessTable::new(),
        );
        let usage = monitor.usage();
        let mut monitor_handle = tokio::spawn(monitor.run());
        let mut monitor_live = true;

        let deadline_at = Instant::now() + timeout;
        let deadline = time::sleep_until(deadline_at);
        tokio::pin!(deadline);

        let mut cancel_check = time::interval(self.config.poll_interval);
        cancel_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let race = loop {
            tokio::select! {
                biased;
                joined = &mut monitor_handle, if monitor_live => {
                    monitor_live = false;
                    match joined {
                        Ok(Err(breach)) => break Race::Breach(breach),
                        Ok(Ok(())) => debug!("Monitor for task {} saw the process exit", id),
                        Err(e) => warn!("Monitor for task {} ended abnormally: {}", id, e),
                    }
                }
                status = process.wait() => break Race::Exited(status),
                _ = &mut deadline => break Race::Deadline,
                _ = cancel_check.tick() => {
                    if self.registry.is_cancelled(id) {
                        break Race::Cancelled;
                    }
                }
            }
        };

        // Never leave a poll loop running against a pid that may be reused
        monitor_handle.abort();

        let outcome = match race {
            Race::Exited(Ok(status)) => {
                let breach = usage.lock().breach.clone();
                match breach {
                    Some(reason) => {
                        process.discard();
                        Err(Error::ResourceExceeded(reason))
                    }
                    None => match process.collect(status, deadline_at, timeout).await {
                        Ok(output) => decode_output(task_type, output),
                        Err(e) => Err(e),
                    },
                }
            }
            Race::Exited(Err(e)) => {
                process.kill().await;
                process.discard();
                Err(Error::Io(e))
            }
            Race::Deadline => {
                warn!("Task {} exceeded its {:?} deadline", id, timeout);
                process.kill().await;
                process.discard();
                Err(Error::Timeout(timeout))
            }
            Race::Cancelled => {
                info!("Task {} cancelled, killing process {}", id, process.pid());
                process.kill().await;
                process.discard();
                Err(Error::Cancelled)
            }
            Race::Breach(breach) => {
                // Already killed by the monitor; reap it
                process.kill().await;
                process.discard();
                Err(breach)
            }
        };

        let usage = usage.lock().clone();
        (outcome, Some(usage))
    }

    fn publish(
        &self,
        id: &TaskId,
        outcome: Result<TaskResult, Error>,
        usage: Option<ResourceUsage>,
    ) {
        if self.registry.is_cancelled(id) {
            debug!("Task {} was cancelled, discarding its outcome", id);
            return;
        }

        let outcome = outcome.map_err(|e| {
            error!("Task {} failed: {}", id, e);
            e.into_task_error()
        });
        if outcome.is_ok() {
            info!("Task {} completed", id);
        }

        if !self.registry.finish(id, outcome, usage) {
            debug!("Task {} outcome not published", id);
        }
    }
}

/// Interprets what a finished process printed
pub(crate) fn decode_output(
    task_type: TaskType,
    output: CapturedOutput,
) -> Result<TaskResult, Error> {
    match task_type {
        TaskType::Script => decode_script_output(output),
        TaskType::Command => decode_command_output(output),
    }
}

fn decode_script_output(output: CapturedOutput) -> Result<TaskResult, Error> {
    let raw_output = if output.stdout.trim().is_empty() {
        output.stderr.clone()
    } else {
        output.stdout.clone()
    };

    let mut lines: Vec<&str> = output
        .stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();

    let last = lines.pop().ok_or_else(|| Error::OutputDecode {
        message: "Script produced no output".to_string(),
        output: raw_output.clone(),
    })?;

    let payload: Value = serde_json::from_str(last).map_err(|e| Error::OutputDecode {
        message: e.to_string(),
        output: raw_output.clone(),
    })?;

    if !payload.is_object() {
        return Err(Error::OutputDecode {
            message: "Result is not a JSON object".to_string(),
            output: raw_output,
        });
    }

    let success = payload
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    if !success {
        return Err(Error::ScriptFailed {
            message: payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Script reported failure")
                .to_string(),
            traceback: payload
                .get("traceback")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    Ok(TaskResult {
        payload,
        warnings: non_empty(output.stderr),
        console: non_empty(lines.join("\n")),
    })
}

fn decode_command_output(output: CapturedOutput) -> Result<TaskResult, Error> {
    if !output.status.success() {
        return Err(Error::NonZeroExit {
            code: output.status.code(),
            stderr: output.stderr,
        });
    }

    Ok(TaskResult {
        payload: json!({
            "success": true,
            "return_code": output.status.code(),
            "stdout": output.stdout,
            "stderr": output.stderr,
        }),
        warnings: None,
        console: None,
    })
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;
    use std::os::unix::process::ExitStatusExt;

    fn captured(code: i32, stdout: &str, stderr: &str) -> CapturedOutput {
        CapturedOutput {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn last_line_is_the_result_and_earlier_lines_are_console() {
        let output = captured(
            0,
            "working...\n\n{\"success\": true, \"output\": \"ok\"}\n",
            "DeprecationWarning: x\n",
        );

        let result = decode_output(TaskType::Script, output).unwrap();
        assert_eq!(result.payload, json!({"success": true, "output": "ok"}));
        assert_eq!(result.console.as_deref(), Some("working..."));
        assert_eq!(result.warnings.as_deref(), Some("DeprecationWarning: x\n"));
    }

    #[test]
    fn embedded_failure_flag_becomes_script_error() {
        let output = captured(
            1,
            "\n{\"success\": false, \"error\": \"boom\", \"traceback\": \"Traceback...\"}\n",
            "",
        );

        let err = decode_output(TaskType::Script, output).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserScriptError);
        let task_error = err.into_task_error();
        assert_eq!(task_error.message, "boom");
        assert_eq!(task_error.detail.as_deref(), Some("Traceback..."));
    }

    #[test]
    fn unparsable_output_is_a_decode_error() {
        for stdout in ["", "not json at all\n", "[1, 2, 3]\n"] {
            let err = decode_output(TaskType::Script, captured(0, stdout, "")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OutputDecodeError, "stdout: {:?}", stdout);
        }
    }

    #[test]
    fn command_exit_code_decides_success() {
        let ok = decode_output(TaskType::Command, captured(0, "a\nb\n", "")).unwrap();
        assert_eq!(ok.payload["return_code"], 0);
        assert_eq!(ok.payload["stdout"], "a\nb\n");

        let err = decode_output(TaskType::Command, captured(2, "", "no such file")).unwrap_err();
        assert!(matches!(err, Error::NonZeroExit { code: Some(2), .. }));
    }
}
