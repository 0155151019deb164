use crate::{error::Error, languages::ScriptRuntime};

/// Harness around the task body. Parameters arrive as JSON on stdin; the
/// body is a string literal executed in its own namespace so it never has
/// to be re-indented into the guarded region.
const WRAPPER_TEMPLATE: &str = r#"import json
import sys
import traceback

_raw = sys.stdin.read()
TASK_PARAMETERS = json.loads(_raw) if _raw.strip() else {}
_TASK_BODY = __TASK_BODY__

_namespace = {"__name__": "__task__", "TASK_PARAMETERS": TASK_PARAMETERS}

try:
    exec(compile(_TASK_BODY, "<task>", "exec"), _namespace)
    if "result" not in _namespace:
        _result = {"success": True, "output": "Script executed successfully"}
    elif isinstance(_namespace["result"], dict):
        _result = _namespace["result"]
    else:
        _result = {"success": True, "output": _namespace["result"]}
    _encoded = json.dumps(_result, default=str)
except Exception as e:
    _encoded = json.dumps({
        "success": False,
        "error": str(e),
        "traceback": traceback.format_exc(),
    })
    sys.stdout.write("\n" + _encoded + "\n")
    sys.stdout.flush()
    sys.exit(1)

sys.stdout.write("\n" + _encoded + "\n")
sys.stdout.flush()
"#;

pub struct PythonRuntime {
    interpreter: String,
}

impl PythonRuntime {
    pub fn new(interpreter: Option<String>) -> Self {
        Self {
            interpreter: interpreter.unwrap_or_else(|| "python3".to_string()),
        }
    }
}

impl ScriptRuntime for PythonRuntime {
    fn file_extension(&self) -> &str {
        "py"
    }

    fn run_command(&self) -> &str {
        &self.interpreter
    }

    fn env(&self) -> Vec<(String, String)> {
        vec![
            ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
            ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
        ]
    }

    fn render_wrapper(&self, body: &str) -> Result<String, Error> {
        // A JSON string is also a valid Python string literal
        let literal = serde_json::to_string(body)?;
        Ok(WRAPPER_TEMPLATE.replace("__TASK_BODY__", &literal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_is_embedded_as_a_single_literal() {
        let runtime = PythonRuntime::new(None);
        let body = "x = \"quoted\"\nresult = {'success': True}\n";
        let wrapper = runtime.render_wrapper(body).unwrap();

        assert!(wrapper.contains(r#"_TASK_BODY = "x = \"quoted\"\nresult = {'success': True}\n""#));
        assert!(!wrapper.contains("__TASK_BODY__"));
    }

    #[test]
    fn null_parameters_become_an_empty_object() {
        let runtime = PythonRuntime::new(None);
        assert_eq!(runtime.encode_parameters(&json!(null)).unwrap(), b"{}");
        assert_eq!(
            runtime.encode_parameters(&json!({"name": "Ada"})).unwrap(),
            br#"{"name":"Ada"}"#
        );
    }
}
