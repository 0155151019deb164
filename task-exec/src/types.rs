use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque task identifier, stable for the lifetime of a task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Policy tier, ordered from most to least permissive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
    Restricted,
}

impl Default for SecurityLevel {
    fn default() -> Self {
        SecurityLevel::Medium
    }
}

impl FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(SecurityLevel::Low),
            "medium" => Ok(SecurityLevel::Medium),
            "high" => Ok(SecurityLevel::High),
            "restricted" => Ok(SecurityLevel::Restricted),
            _ => Err(format!("Unknown security level: {}", s)),
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityLevel::Low => "low",
            SecurityLevel::Medium => "medium",
            SecurityLevel::High => "high",
            SecurityLevel::Restricted => "restricted",
        };
        f.write_str(name)
    }
}

/// The work a task performs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Script body run inside the generated wrapper
    Script {
        body: String,
        #[serde(default)]
        parameters: Value,
    },
    /// Whitelisted inspection command, run without a shell
    Command {
        command_line: String,
        #[serde(default)]
        parameters: Value,
    },
}

impl TaskKind {
    pub fn script(body: impl Into<String>, parameters: Value) -> Self {
        TaskKind::Script {
            body: body.into(),
            parameters,
        }
    }

    pub fn command(command_line: impl Into<String>, parameters: Value) -> Self {
        TaskKind::Command {
            command_line: command_line.into(),
            parameters,
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            TaskKind::Script { .. } => TaskType::Script,
            TaskKind::Command { .. } => TaskType::Command,
        }
    }

    pub fn parameters(&self) -> &Value {
        match self {
            TaskKind::Script { parameters, .. } | TaskKind::Command { parameters, .. } => {
                parameters
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Script,
    Command,
}

/// Task submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Caller-chosen id; generated when absent
    #[serde(default)]
    pub id: Option<TaskId>,
    pub kind: TaskKind,
    #[serde(default)]
    pub security_level: SecurityLevel,
    /// Submitting principal, passed through for audit only
    #[serde(default)]
    pub owner: Option<String>,
}

impl TaskRequest {
    pub fn new(kind: TaskKind, security_level: SecurityLevel) -> Self {
        Self {
            id: None,
            kind,
            security_level,
            owner: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// Transitions are monotonic: nothing leaves a terminal state and
    /// nothing returns to `Pending`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            // Validation and launch failures end a task before it runs
            TaskStatus::Pending => matches!(
                next,
                TaskStatus::Running | TaskStatus::Failed | TaskStatus::Cancelled
            ),
            TaskStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Classification of a task failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SecurityViolation,
    LaunchFailure,
    ResourceLimitExceeded,
    ExecutionTimeout,
    OutputDecodeError,
    UserScriptError,
    NonZeroExit,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    /// Traceback, stderr or raw output, kept verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Structured outcome of a successful task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub payload: Value,
    /// Anything the process wrote to stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<String>,
    /// Stdout lines printed before the result line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<String>,
}

/// Limits enforced on every launched process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Resident memory hard cap (bytes)
    pub max_memory_bytes: u64,
    /// CPU usage above this is logged, never enforced
    pub max_cpu_percent: f32,
    /// Largest file the child may write (bytes)
    pub max_file_size_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 512 * 1024 * 1024, // 512MB
            max_cpu_percent: 50.0,
            max_file_size_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// One poll of the OS process table
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

/// What the resource monitor observed over a process lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub peak_memory_bytes: u64,
    pub peak_cpu_percent: f32,
    pub samples: u64,
    pub cpu_excess_ticks: u64,
    /// Set by the monitor before it kills the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breach: Option<String>,
}

impl ResourceUsage {
    pub fn record(&mut self, sample: ResourceSample) {
        self.samples += 1;
        self.peak_memory_bytes = self.peak_memory_bytes.max(sample.memory_bytes);
        if sample.cpu_percent > self.peak_cpu_percent {
            self.peak_cpu_percent = sample.cpu_percent;
        }
    }
}

/// Registry entry for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub id: TaskId,
    pub task_type: TaskType,
    pub security_level: SecurityLevel,
    pub owner: Option<String>,
    pub status: TaskStatus,
    pub cancel_requested: bool,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    pub error: Option<TaskError>,
    pub usage: Option<ResourceUsage>,
}

impl TaskContext {
    pub fn new(id: TaskId, request: &TaskRequest) -> Self {
        Self {
            id,
            task_type: request.kind.task_type(),
            security_level: request.security_level,
            owner: request.owner.clone(),
            status: TaskStatus::Pending,
            cancel_requested: false,
            pid: None,
            started_at: Utc::now(),
            ended_at: None,
            result: None,
            error: None,
            usage: None,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let progress = match self.status {
            TaskStatus::Pending => Some(0),
            TaskStatus::Running => None,
            _ => Some(100),
        };

        TaskSnapshot {
            id: self.id.clone(),
            status: self.status,
            progress,
            result: self.result.clone(),
            error: self.error.clone(),
            pid: self.pid,
            owner: self.owner.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            usage: self.usage.clone(),
        }
    }
}

/// Point-in-time view of a task returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResourceUsage>,
}

pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_levels_are_ordered() {
        assert!(SecurityLevel::Low < SecurityLevel::Medium);
        assert!(SecurityLevel::Medium < SecurityLevel::High);
        assert!(SecurityLevel::High < SecurityLevel::Restricted);
        assert_eq!(
            "RESTRICTED".parse::<SecurityLevel>(),
            Ok(SecurityLevel::Restricted)
        );
        assert!("paranoid".parse::<SecurityLevel>().is_err());
    }

    #[test]
    fn terminal_states_never_transition() {
        let terminal = [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Timeout,
            TaskStatus::Cancelled,
        ];
        let all = [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Timeout,
            TaskStatus::Cancelled,
        ];

        for from in terminal {
            assert!(from.is_terminal());
            for to in all {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }

        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Timeout));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn task_kind_deserializes_from_tagged_json() {
        let kind: TaskKind = serde_json::from_str(
            r#"{"type": "command", "command_line": "ls -la", "parameters": {"path": "."}}"#,
        )
        .unwrap();

        match kind {
            TaskKind::Command {
                command_line,
                parameters,
            } => {
                assert_eq!(command_line, "ls -la");
                assert_eq!(parameters["path"], ".");
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }
}
