//! Script runtimes that turn a task body into a runnable wrapper unit

mod python;

pub use python::PythonRuntime;

use serde_json::Value;
use std::path::{Path, PathBuf};
use which::which;

use crate::error::Error;

/// A runtime able to host script task bodies
pub trait ScriptRuntime: Send + Sync {
    /// File extension of the generated wrapper
    fn file_extension(&self) -> &str;

    /// Interpreter executable, resolved against `PATH` when not absolute
    fn run_command(&self) -> &str;

    /// Arguments passed to the interpreter
    fn run_args(&self, wrapper: &Path) -> Vec<String> {
        vec![wrapper.display().to_string()]
    }

    /// Extra environment for the interpreter
    fn env(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Renders the wrapper unit around a task body
    fn render_wrapper(&self, body: &str) -> Result<String, Error>;

    /// Bytes written to the child's stdin before it starts reading
    fn encode_parameters(&self, parameters: &Value) -> Result<Vec<u8>, Error> {
        let parameters = match parameters {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        Ok(serde_json::to_vec(&parameters)?)
    }
}

/// Resolves an executable name to an absolute path
pub(crate) fn resolve_command(cmd: &str) -> Result<PathBuf, Error> {
    let path = Path::new(cmd);
    if path.is_absolute() || cmd.starts_with("./") {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(Error::Launch(format!("Command not found: {}", cmd)))
        };
    }

    which(cmd).map_err(|_| Error::Launch(format!("Command not found: {}", cmd)))
}

#[cfg(test)]
pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| which(**tool).is_err())
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}
