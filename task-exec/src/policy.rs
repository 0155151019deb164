//! Lexical pre-execution policy.
//!
//! This is a cheap filter run before any process is spawned, not a security
//! boundary: obfuscated or indirect use of a blocked capability gets through.

use regex::Regex;
use std::sync::OnceLock;

use crate::{
    config::PolicyConfig,
    error::Error,
    types::{SecurityLevel, TaskKind},
};

/// Tokens rejected at `Restricted`
pub const DENYLIST: &[&str] = &[
    "import os",
    "import sys",
    "import subprocess",
    "exec(",
    "eval(",
    "__import__",
    "compile(",
    "open(",
    "file(",
    "input(",
    "raw_input(",
    "execfile(",
    "reload(",
];

/// Root modules importable at `High` and `Restricted`. Only roots are
/// listed: `import a.b` binds `a`, so a dotted entry would expose its parent.
pub const ALLOWED_MODULES: &[&str] = &[
    "json", "math", "datetime", "time", "pathlib", "requests", "urllib", "base64", "re",
    "string", "hashlib",
];

/// Read-only inspection commands allowed as the leading token
pub const ALLOWED_COMMANDS: &[&str] = &["ls", "dir", "echo", "cat", "type", "find", "grep"];

fn import_re() -> &'static Regex {
    static IMPORT_RE: OnceLock<Regex> = OnceLock::new();
    IMPORT_RE.get_or_init(|| {
        Regex::new(r"^(?:from\s+(\S+)\s+import\b|import\s+(.+))")
            .expect("import pattern is valid")
    })
}

#[derive(Debug, Clone, Default)]
pub struct PolicyValidator {
    config: PolicyConfig,
}

impl PolicyValidator {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Validates a task of either kind. Command tasks yield their argv.
    pub fn validate(&self, kind: &TaskKind, level: SecurityLevel) -> Result<Vec<String>, Error> {
        match kind {
            TaskKind::Script { body, .. } => {
                self.validate_script(body, level)?;
                Ok(Vec::new())
            }
            TaskKind::Command { command_line, .. } => self.validate_command(command_line, level),
        }
    }

    pub fn validate_script(&self, body: &str, level: SecurityLevel) -> Result<(), Error> {
        if self.applies_denylist(level) {
            if let Some(token) = DENYLIST.iter().find(|token| body.contains(*token)) {
                return Err(Error::SecurityViolation(format!(
                    "Restricted keyword found: {}",
                    token
                )));
            }
        }

        if level >= SecurityLevel::High {
            for module in imported_modules(body) {
                if !is_allowed_module(&module) {
                    return Err(Error::SecurityViolation(format!(
                        "Module not allowed: {}",
                        root_module(&module)
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn validate_command(
        &self,
        command_line: &str,
        level: SecurityLevel,
    ) -> Result<Vec<String>, Error> {
        if level >= SecurityLevel::High {
            return Err(Error::SecurityViolation(
                "System commands not allowed at this security level".to_string(),
            ));
        }

        let argv = shlex::split(command_line).ok_or_else(|| {
            Error::SecurityViolation("Malformed command line".to_string())
        })?;

        let program = argv
            .first()
            .ok_or_else(|| Error::SecurityViolation("Empty command".to_string()))?;

        if !ALLOWED_COMMANDS.contains(&program.as_str()) {
            return Err(Error::SecurityViolation(format!(
                "Command not allowed: {}",
                program
            )));
        }

        Ok(argv)
    }

    fn applies_denylist(&self, level: SecurityLevel) -> bool {
        level == SecurityLevel::Restricted
            || (self.config.medium_denylist && level >= SecurityLevel::Medium)
    }
}

/// Extracts every module named by an `import` or `from ... import` statement.
pub fn imported_modules(body: &str) -> Vec<String> {
    let mut modules = Vec::new();

    for line in body.lines() {
        for statement in line.split(';') {
            let statement = statement.trim();
            let Some(cap) = import_re().captures(statement) else {
                continue;
            };

            if let Some(module) = cap.get(1) {
                modules.push(module.as_str().to_string());
            } else if let Some(names) = cap.get(2) {
                for name in names.as_str().split(',') {
                    // `import a.b as c` names module `a.b`
                    let module = name.split_whitespace().next().unwrap_or_default();
                    modules.push(module.to_string());
                }
            }
        }
    }

    modules
}

fn root_module(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

fn is_allowed_module(module: &str) -> bool {
    ALLOWED_MODULES.contains(&root_module(module))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_modules_from_all_import_forms() {
        let body = "import json\nfrom datetime import datetime\nimport os.path as p, re\n  import math; import socket\nx = 1\n";
        assert_eq!(
            imported_modules(body),
            vec!["json", "datetime", "os.path", "re", "math", "socket"]
        );
    }

    #[test]
    fn only_the_root_module_is_checked() {
        assert!(is_allowed_module("urllib.parse"));
        assert!(is_allowed_module("json"));
        assert!(!is_allowed_module("os.path"));
        assert!(!is_allowed_module("os"));
        assert!(!is_allowed_module("ossaudiodev"));
        assert!(!is_allowed_module("jsonpickle"));
    }
}
