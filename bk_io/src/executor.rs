//! Build plan execution.
//!
//! Steps run one at a time in the plan's working directory, each as its own
//! process group so that cancelling a step also stops anything it spawned.
//! Output is captured per step. When every step has succeeded the plan's
//! artifacts are written. Nothing is rolled back on failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use bk_core::BuildError;
use bk_core::plan::{Artifact, BuildPlan, BuildStep};

use crate::progress::{InstallProgress, ProgressCallback};

/// Captured result of one build step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepOutput {
    pub index: usize,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Audit record of a completed install.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallResult {
    pub success: bool,
    pub formula: String,
    pub version: String,
    pub variant: String,
    pub steps: Vec<StepOutput>,
    pub artifacts: Vec<PathBuf>,
    pub caveats: Option<String>,
}

impl InstallResult {
    pub fn command_lines(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.command.as_str()).collect()
    }
}

/// Shared flag that stops a running build.
///
/// Clones observe the same flag. Cancelling kills the in-flight step's
/// process group; later steps never start.
#[derive(Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

enum Interrupt {
    Cancelled,
    Deadline(Duration),
}

/// Runs [`BuildPlan`]s.
#[derive(Clone, Default)]
pub struct Executor {
    cancellation: Option<Cancellation>,
    deadline: Option<Duration>,
    progress: Option<Arc<ProgressCallback>>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Limit on the wall-clock time of each step. No limit by default.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report(&self, event: InstallProgress) {
        if let Some(ref cb) = self.progress {
            cb(event);
        }
    }

    /// Run every step of `plan` in order, then write its artifacts.
    ///
    /// # Errors
    /// Stops at the first step that exits non-zero, cannot be spawned, is
    /// cancelled or runs past the deadline. Later steps do not run and no
    /// artifact is written.
    pub async fn execute(&self, plan: &BuildPlan) -> Result<InstallResult, BuildError> {
        let mut steps = Vec::with_capacity(plan.steps.len());

        for (index, step) in plan.steps.iter().enumerate() {
            let output = self.run_step(index, step, &plan.working_dir).await?;
            steps.push(output);
        }

        let mut artifacts = Vec::with_capacity(plan.artifacts.len());
        for artifact in &plan.artifacts {
            write_artifact(artifact)?;
            info!(path = %artifact.path.display(), "wrote artifact");
            artifacts.push(artifact.path.clone());
        }

        Ok(InstallResult {
            success: true,
            formula: plan.formula.clone(),
            version: plan.version.clone(),
            variant: plan.variant.clone(),
            steps,
            artifacts,
            caveats: None,
        })
    }

    async fn run_step(&self, index: usize, step: &BuildStep, working_dir: &Path) -> Result<StepOutput, BuildError> {
        let command = step.command_line();

        if self.cancellation.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(BuildError::Cancelled {
                step_index: index,
                command,
            });
        }

        info!(index, %command, "running step");
        self.report(InstallProgress::StepStarted {
            index,
            command: command.clone(),
        });

        let mut cmd = Command::new(&step.program);
        cmd.args(&step.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let started_at = Utc::now();
        let start = Instant::now();

        let mut child = cmd.spawn().map_err(|e| BuildError::SpawnFailed {
            step_index: index,
            command: command.clone(),
            message: e.to_string(),
        })?;
        let pid = child.id();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let finished = {
            let run = async {
                tokio::join!(child.wait(), read_pipe(stdout_pipe), read_pipe(stderr_pipe))
            };
            let interrupted = async {
                tokio::select! {
                    _ = wait_cancelled(self.cancellation.as_ref()) => Interrupt::Cancelled,
                    deadline = wait_deadline(self.deadline) => Interrupt::Deadline(deadline),
                }
            };

            tokio::select! {
                done = run => Ok(done),
                interrupt = interrupted => Err(interrupt),
            }
        };

        let (status, stdout, stderr) = match finished {
            Ok(done) => done,
            Err(interrupt) => {
                kill_process_group(pid, &mut child);
                let _ = child.wait().await;
                return Err(match interrupt {
                    Interrupt::Cancelled => {
                        warn!(index, %command, "step cancelled");
                        BuildError::Cancelled {
                            step_index: index,
                            command,
                        }
                    }
                    Interrupt::Deadline(deadline) => {
                        warn!(index, %command, ?deadline, "step exceeded deadline");
                        BuildError::DeadlineExceeded {
                            step_index: index,
                            command,
                            deadline,
                        }
                    }
                });
            }
        };

        let status = status.map_err(|e| BuildError::SpawnFailed {
            step_index: index,
            command: command.clone(),
            message: e.to_string(),
        })?;
        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if !status.success() {
            warn!(index, %command, code = ?status.code(), "step failed");
            let mut output = stdout;
            output.push_str(&stderr);
            return Err(BuildError::StepFailed {
                step_index: index,
                command,
                output,
            });
        }

        debug!(index, ?duration, "step finished");
        self.report(InstallProgress::StepCompleted { index, duration });

        Ok(StepOutput {
            index,
            command,
            stdout,
            stderr,
            started_at,
            duration,
        })
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

async fn wait_cancelled(cancellation: Option<&Cancellation>) {
    match cancellation {
        Some(c) => c.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Duration>) -> Duration {
    match deadline {
        Some(d) => {
            tokio::time::sleep(d).await;
            d
        }
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>, child: &mut tokio::process::Child) {
    match pid {
        // SAFETY: killpg only sends a signal; the group was created for this step
        Some(pid) => unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        },
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>, child: &mut tokio::process::Child) {
    let _ = child.start_kill();
}

fn write_artifact(artifact: &Artifact) -> Result<(), BuildError> {
    let err = |e: std::io::Error| BuildError::ArtifactWrite {
        path: artifact.path.clone(),
        message: e.to_string(),
    };

    if let Some(parent) = artifact.path.parent() {
        fs::create_dir_all(parent).map_err(err)?;
    }
    fs::write(&artifact.path, &artifact.contents).map_err(err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&artifact.path, fs::Permissions::from_mode(artifact.mode)).map_err(err)?;
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn sh(script: &str) -> BuildStep {
        BuildStep::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    fn plan(dir: &Path, steps: Vec<BuildStep>, artifacts: Vec<Artifact>) -> BuildPlan {
        BuildPlan {
            formula: "foo".to_string(),
            version: "1.0".to_string(),
            variant: "stable".to_string(),
            working_dir: dir.to_path_buf(),
            steps,
            artifacts,
        }
    }

    #[tokio::test]
    async fn runs_steps_in_order_and_captures_output() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(
            tmp.path(),
            vec![sh("echo one; pwd"), sh("echo two >&2")],
            vec![],
        );

        let result = Executor::new().execute(&plan).await.unwrap();

        assert!(result.success);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].index, 0);
        assert!(result.steps[0].stdout.starts_with("one\n"));
        let pwd = result.steps[0].stdout.lines().nth(1).unwrap();
        assert_eq!(
            fs::canonicalize(pwd).unwrap(),
            fs::canonicalize(tmp.path()).unwrap()
        );
        assert_eq!(result.steps[1].stderr, "two\n");
        assert!(result.steps[0].started_at <= result.steps[1].started_at);
        assert_eq!(result.steps[1].command, "sh -c 'echo two >&2'");
    }

    #[tokio::test]
    async fn failing_step_stops_the_build() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(
            tmp.path(),
            vec![
                sh("echo a >> log"),
                sh("echo b >> log; echo 'config.log: missing pcre' >&2; exit 3"),
                sh("echo c >> log"),
            ],
            vec![Artifact {
                path: tmp.path().join("foo.plist"),
                contents: "x".to_string(),
                mode: 0o644,
            }],
        );

        let err = Executor::new().execute(&plan).await.unwrap_err();

        match err {
            BuildError::StepFailed {
                step_index,
                command,
                output,
            } => {
                assert_eq!(step_index, 1);
                assert!(command.contains("exit 3"));
                assert!(output.contains("missing pcre"));
            }
            other => panic!("expected StepFailed, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(tmp.path().join("log")).unwrap(), "a\nb\n");
        assert!(!tmp.path().join("foo.plist").exists());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_failure() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(
            tmp.path(),
            vec![BuildStep::new("brewkit-no-such-program", vec![])],
            vec![],
        );

        let err = Executor::new().execute(&plan).await.unwrap_err();
        assert!(matches!(err, BuildError::SpawnFailed { step_index: 0, .. }));
    }

    #[tokio::test]
    async fn deadline_kills_the_step() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(tmp.path(), vec![sh("sleep 10"), sh("touch after")], vec![]);

        let start = Instant::now();
        let err = Executor::new()
            .with_deadline(Duration::from_millis(200))
            .execute(&plan)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BuildError::DeadlineExceeded {
                step_index: 0,
                command: "sh -c 'sleep 10'".to_string(),
                deadline: Duration::from_millis(200),
            }
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!tmp.path().join("after").exists());
    }

    #[tokio::test]
    async fn cancellation_kills_the_whole_process_group() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(
            tmp.path(),
            vec![sh("(sleep 1; touch marker) & wait")],
            vec![],
        );

        let cancellation = Cancellation::new();
        let trigger = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = Executor::new()
            .with_cancellation(cancellation)
            .execute(&plan)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Cancelled { step_index: 0, .. }));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!tmp.path().join("marker").exists());
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(tmp.path(), vec![sh("touch ran")], vec![]);

        let cancellation = Cancellation::new();
        cancellation.cancel();

        let err = Executor::new()
            .with_cancellation(cancellation)
            .execute(&plan)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Cancelled { step_index: 0, .. }));
        assert!(!tmp.path().join("ran").exists());
    }

    #[tokio::test]
    async fn artifacts_are_written_with_their_mode() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("prefix/org.brewkit.foo.service");
        let plan = plan(
            tmp.path(),
            vec![sh("true")],
            vec![Artifact {
                path: path.clone(),
                contents: "[Unit]\n".to_string(),
                mode: 0o644,
            }],
        );

        let result = Executor::new().execute(&plan).await.unwrap();

        assert_eq!(result.artifacts, vec![path.clone()]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "[Unit]\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn progress_events_follow_steps() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(tmp.path(), vec![sh("true"), sh("true")], vec![]);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: Arc<ProgressCallback> = Arc::new(Box::new(move |event: InstallProgress| {
            sink.lock().unwrap().push(event);
        }));

        Executor::new().with_progress(callback).execute(&plan).await.unwrap();

        let events = events.lock().unwrap();
        let started: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                InstallProgress::StepStarted { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![0, 1]);
        assert!(matches!(events.last(), Some(InstallProgress::StepCompleted { index: 1, .. })));
    }

    #[test]
    fn install_result_serializes_to_json() {
        let result = InstallResult {
            success: true,
            formula: "foo".to_string(),
            version: "1.0".to_string(),
            variant: "stable".to_string(),
            steps: vec![StepOutput {
                index: 0,
                command: "make".to_string(),
                stdout: "ok\n".to_string(),
                stderr: String::new(),
                started_at: Utc::now(),
                duration: Duration::from_millis(1500),
            }],
            artifacts: vec![PathBuf::from("/usr/local/org.brewkit.foo.plist")],
            caveats: None,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["steps"][0]["command"], "make");
        assert_eq!(json["steps"][0]["duration"]["secs"], 1);

        let back: InstallResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
