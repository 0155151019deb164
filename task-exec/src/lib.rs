//! # Task Execution Engine
//!
//! Runs untrusted script bodies and whitelisted inspection commands as
//! isolated child processes. Every task is checked by a lexical policy,
//! launched in a scratch directory, watched for memory and CPU usage and
//! raced against a wall-clock deadline. Outcomes are recorded in an
//! in-memory registry that callers poll.

mod config;
mod error;
mod executor;
mod languages;
mod monitor;
mod policy;
mod registry;
mod sandbox;
mod service;
mod types;

#[cfg(test)]
mod tests;

pub use config::{EngineConfig, PolicyConfig};
pub use error::Error;
pub use executor::TaskExecutor;
pub use languages::{PythonRuntime, ScriptRuntime};
pub use monitor::{ProcessTable, ResourceMonitor, SystemProcessTable};
pub use policy::{PolicyValidator, ALLOWED_COMMANDS, ALLOWED_MODULES, DENYLIST};
pub use registry::TaskRegistry;
pub use service::TaskExecutionService;
pub use types::{
    ErrorKind, ResourceLimits, ResourceSample, ResourceUsage, SecurityLevel, TaskContext,
    TaskError, TaskId, TaskKind, TaskRequest, TaskResult, TaskSnapshot, TaskStatus, TaskType,
};

/// Result type for task execution operations
pub type Result<T> = std::result::Result<T, Error>;
