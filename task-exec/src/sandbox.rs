use nix::sys::resource::{setrlimit, Resource};
use serde_json::Value;
use std::{
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::SystemTime,
};
use tempfile::NamedTempFile;
use tokio::{
    fs,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, Command},
    task::JoinHandle,
    time::{self, Duration, Instant},
};
use tracing::{debug, warn};

use crate::{
    error::Error,
    languages::{resolve_command, ScriptRuntime},
    types::{ResourceLimits, TaskId},
};

/// Prefix shared by every wrapper file in the scratch directory
const SCRATCH_PREFIX: &str = "task_";

const CHILD_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// Launches task processes inside the engine's scratch directory
pub struct Sandbox {
    /// Working directory of every child
    pub root_dir: PathBuf,
    limits: ResourceLimits,
}

impl Sandbox {
    /// Creates the scratch directory if needed
    pub async fn new(root_dir: impl Into<PathBuf>, limits: ResourceLimits) -> Result<Self, Error> {
        let root_dir = root_dir.into();
        fs::create_dir_all(&root_dir).await.map_err(|e| {
            Error::Config(format!(
                "Failed to create scratch directory {}: {}",
                root_dir.display(),
                e
            ))
        })?;

        Ok(Sandbox { root_dir, limits })
    }

    /// Removes wrapper files untouched for at least `max_age`. Other engines
    /// may share the directory, so younger files are left alone.
    pub async fn purge_stale(&self, max_age: Duration) -> Result<usize, Error> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(SCRATCH_PREFIX) {
                continue;
            }
            let age = entry
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok());
            if !age.map_or(false, |age| age >= max_age) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale scratch file {:?}: {}", name, e),
            }
        }

        if removed > 0 {
            debug!("Removed {} stale scratch files", removed);
        }
        Ok(removed)
    }

    /// Writes the wrapper unit for a script task and starts the interpreter
    pub async fn launch_script(
        &self,
        id: &TaskId,
        runtime: &dyn ScriptRuntime,
        body: &str,
        parameters: &Value,
    ) -> Result<RunningProcess, Error> {
        let interpreter = resolve_command(runtime.run_command())?;
        let wrapper = runtime.render_wrapper(body)?;
        let stdin = runtime.encode_parameters(parameters)?;

        // Removed from disk when dropped, on every exit path
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}{}_", SCRATCH_PREFIX, file_safe(id.as_str())))
            .suffix(&format!(".{}", runtime.file_extension()))
            .tempfile_in(&self.root_dir)
            .map_err(|e| Error::Launch(format!("Failed to create scratch file: {}", e)))?;

        fs::write(scratch.path(), wrapper)
            .await
            .map_err(|e| Error::Launch(format!("Failed to write scratch file: {}", e)))?;

        let args = runtime.run_args(scratch.path());
        let env = runtime.env();
        let mut process = self.spawn(&interpreter, &args, &env, Some(stdin))?;
        process.scratch = Some(scratch);
        Ok(process)
    }

    /// Starts a validated command line directly, without a shell
    pub async fn launch_command(
        &self,
        argv: &[String],
        parameters: &Value,
    ) -> Result<RunningProcess, Error> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Launch("Empty command".to_string()))?;
        let program = resolve_command(program)?;

        let env = vec![(
            "TASK_PARAMETERS".to_string(),
            serde_json::to_string(parameters)?,
        )];
        self.spawn(&program, args, &env, None)
    }

    fn spawn(
        &self,
        program: &Path,
        args: &[String],
        env: &[(String, String)],
        input: Option<Vec<u8>>,
    ) -> Result<RunningProcess, Error> {
        debug!("Sandbox spawn - Program: {}", program.display());
        debug!("Sandbox spawn - Args: {:?}", args);
        debug!("Sandbox spawn - Root dir: {:?}", self.root_dir);

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k, v)))
            .env("PATH", CHILD_PATH)
            .env("HOME", &self.root_dir)
            .current_dir(&self.root_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let file_size = self.limits.max_file_size_bytes;

        // SAFETY: the closure only calls setrlimit, which is async-signal-safe
        unsafe {
            command.pre_exec(move || {
                setrlimit(Resource::RLIMIT_FSIZE, file_size, file_size).map_err(io::Error::from)
            });
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Launch(format!("Failed to spawn process: {}", e)))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Launch("Process exited before it was observed".to_string()))?;

        if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&bytes).await {
                    debug!("Failed to write parameters to process {}: {}", pid, e);
                }
                // Dropping stdin signals EOF
            });
        }

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        Ok(RunningProcess {
            pid,
            child,
            stdout,
            stderr,
            scratch: None,
        })
    }
}

fn drain<R>(mut reader: R) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    })
}

fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

/// Everything the process wrote, collected after exit
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// A started child with its output streams being drained
pub struct RunningProcess {
    pid: u32,
    child: Child,
    stdout: Option<JoinHandle<io::Result<Vec<u8>>>>,
    stderr: Option<JoinHandle<io::Result<Vec<u8>>>>,
    scratch: Option<NamedTempFile>,
}

impl RunningProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|file| file.path())
    }

    /// Resolves when the process exits. Safe to cancel and call again.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Force-kills the process and reaps it
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill process {}: {}", self.pid, e);
        }
    }

    /// Waits for both streams to close, bounded by `deadline`, then removes
    /// the scratch file.
    pub async fn collect(
        mut self,
        status: ExitStatus,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<CapturedOutput, Error> {
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();

        let drained = time::timeout_at(deadline, async {
            let stdout = join_stream(stdout).await?;
            let stderr = join_stream(stderr).await?;
            Ok::<_, Error>((stdout, stderr))
        })
        .await;

        self.discard();

        let (stdout, stderr) = drained.map_err(|_| Error::Timeout(timeout))??;
        Ok(CapturedOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        })
    }

    /// Stops output collection and removes the scratch file
    pub fn discard(&mut self) {
        for handle in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            handle.abort();
        }
        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = scratch.close() {
                warn!("Failed to remove scratch file for process {}: {}", self.pid, e);
            }
        }
    }
}

async fn join_stream(handle: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<Vec<u8>, Error> {
    match handle {
        Some(handle) => handle
            .await
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?
            .map_err(Error::Io),
        None => Ok(Vec::new()),
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        self.discard();
    }
}
