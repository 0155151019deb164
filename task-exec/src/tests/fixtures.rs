/// Script bodies exercising the wrapper
pub mod scripts {
    pub const GREETING: &str =
        r#"result = {"success": True, "output": TASK_PARAMETERS.get("name")}"#;
    pub const RETURNS_OK: &str = r#"result = {"success": True, "output": "ok"}"#;
    pub const NO_RESULT: &str = r#"x = 40 + 2"#;
    pub const SCALAR_RESULT: &str = r#"result = 6 * 7"#;
    pub const PRINTS_THEN_RESULT: &str = r#"print("step 1")
print("step 2")
result = {"success": True, "output": "done"}"#;
    pub const RAISES: &str = r#"def divide(a, b):
    return a / b

divide(1, 0)"#;
    pub const WRITES_STDERR: &str = r#"import sys
sys.stderr.write("careful\n")
result = {"success": True, "output": "warned"}"#;
    pub const SLEEPS: &str = r#"import time
time.sleep(30)
result = {"success": True}"#;
    pub const SHORT_SLEEP: &str = r#"import time
time.sleep(1)
result = {"success": True, "output": "woke"}"#;
    pub const ALLOCATES: &str = r#"import time
blob = b"x" * (200 * 1024 * 1024)
time.sleep(30)
result = {"success": True}"#;
    pub const EXITS_HARD: &str = r#"import os
os._exit(3)"#;
    pub const ALLOWED_IMPORTS: &str = r#"import json
import math
from datetime import datetime
import urllib.parse
result = {"success": True, "output": math.sqrt(16)}"#;
    pub const UNICODE_PARAMS: &str = r#"result = {"success": True, "output": TASK_PARAMETERS["greeting"][::-1]}"#;
}

/// Bodies rejected by the policy at the stricter tiers
pub mod violations {
    pub const EVAL: &str = r#"value = eval("1 + 1")"#;
    pub const OPEN_FILE: &str = r#"data = open("/etc/passwd").read()"#;
    pub const IMPORT_SUBPROCESS: &str = r#"import subprocess
subprocess.run(["id"])"#;
    pub const IMPORT_SOCKET: &str = r#"import socket"#;
    pub const FROM_SHUTIL: &str = r#"from shutil import rmtree"#;
    pub const IMPORT_OS_PATH: &str = r#"import os.path
result = {"success": True, "output": os.getcwd() + " pid=" + str(os.getpid())}"#;
    pub const FROM_OS_PATH: &str = r#"from os.path import os
result = {"success": True, "output": os.getpid()}"#;
}
