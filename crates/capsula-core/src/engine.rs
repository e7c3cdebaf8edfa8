//! Narrow interface to a docker(1) compatible container engine.
//!
//! Only five engine operations are needed: `images -q`, `build`,
//! `volume inspect`, `volume create` and `run`. [`Engine`] abstracts them so
//! that provisioning can be exercised against a stub; [`CliEngine`] drives
//! the real binary through `tokio::process`.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

/// Outcome of an existence check.
///
/// `Failed` keeps "the engine could not tell us" apart from "the engine said
/// no"; each provisioner decides how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The object exists.
    Present,
    /// The engine reported that the object does not exist.
    Absent,
    /// The query itself failed.
    Failed(String),
}

/// Parameters of an image build.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    /// Tag to assign to the built image.
    pub image: &'a str,
    /// Dockerfile name, relative to `context_dir`.
    pub dockerfile: &'a str,
    /// Build context directory (also the working directory of the build).
    pub context_dir: &'a Path,
}

/// Container engine operations used by the provisioners and the launcher.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Name or path of the engine binary.
    fn binary(&self) -> &str;

    /// Check whether an image with the given name exists.
    async fn image_exists(&self, image: &str) -> Probe;

    /// Build an image, forwarding every output line (stdout and stderr
    /// interleaved) to `output`. The sender is dropped when the build ends.
    async fn build(&self, request: &BuildRequest<'_>, output: UnboundedSender<String>)
        -> Result<()>;

    /// Check whether a volume with the given name exists.
    async fn volume_exists(&self, volume: &str) -> Probe;

    /// Create a named volume.
    async fn volume_create(&self, volume: &str) -> Result<()>;

    /// Execute `run` with inherited standard streams and return the exit code.
    async fn run(&self, args: &[String]) -> Result<i32>;
}

/// [`Engine`] implementation invoking the engine's command-line interface.
#[derive(Debug, Clone)]
pub struct CliEngine {
    binary: String,
}

impl CliEngine {
    /// Create an engine driving `binary` (e.g. `docker` or `/usr/bin/podman`).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command<S: AsRef<str>>(&self, args: &[S], cwd: Option<&Path>) -> Command {
        let line = shell_words::join(
            std::iter::once(self.binary.as_str()).chain(args.iter().map(AsRef::as_ref)),
        );
        match cwd {
            Some(dir) => tracing::debug!(command = %line, cwd = %dir.display(), "Executing command"),
            None => tracing::debug!(command = %line, "Executing command"),
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(args.iter().map(AsRef::as_ref));
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn failure(&self, subcommand: &str, status: ExitStatus, stderr: &[u8]) -> CoreError {
        let stderr = String::from_utf8_lossy(stderr);
        let detail = stderr.trim();
        CoreError::CommandFailed {
            command: format!("{} {}", self.binary, subcommand),
            status: status.to_string(),
            detail: (!detail.is_empty()).then(|| detail.to_string()),
        }
    }
}

#[async_trait]
impl Engine for CliEngine {
    fn binary(&self) -> &str {
        &self.binary
    }

    async fn image_exists(&self, image: &str) -> Probe {
        let output = self
            .command(&["images", "-q", image], None)
            .stdin(Stdio::null())
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => {
                if String::from_utf8_lossy(&out.stdout).trim().is_empty() {
                    Probe::Absent
                } else {
                    Probe::Present
                }
            }
            Ok(out) => Probe::Failed(self.failure("images", out.status, &out.stderr).to_string()),
            Err(e) => Probe::Failed(e.to_string()),
        }
    }

    async fn build(
        &self,
        request: &BuildRequest<'_>,
        output: UnboundedSender<String>,
    ) -> Result<()> {
        let mut child = self
            .command(
                &[
                    "build",
                    "--progress",
                    "plain",
                    "-t",
                    request.image,
                    "-f",
                    request.dockerfile,
                    ".",
                ],
                Some(request.context_dir),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("build stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("build stderr not captured"))?;

        let (out, err, status) = tokio::join!(
            forward_lines(stdout, &output),
            forward_lines(stderr, &output),
            child.wait()
        );
        let status = status?;

        if !status.success() {
            // BuildKit reports on stderr, the legacy builder on stdout.
            let err = err.unwrap_or_else(|e| VecDeque::from([e.to_string()]));
            let tail = if err.is_empty() { out.unwrap_or_default() } else { err };
            let tail = Vec::from(tail).join("\n");
            return Err(self.failure("build", status, tail.as_bytes()));
        }
        if let Some(e) = out.err().or(err.err()) {
            tracing::debug!(error = %e, "Build output stream ended early");
        }
        Ok(())
    }

    async fn volume_exists(&self, volume: &str) -> Probe {
        let output = self
            .command(&["volume", "inspect", volume], None)
            .stdin(Stdio::null())
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => Probe::Present,
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr).to_lowercase();
                if stderr.contains("no such volume") || stderr.contains("not found") {
                    Probe::Absent
                } else {
                    Probe::Failed(self.failure("volume inspect", out.status, &out.stderr).to_string())
                }
            }
            Err(e) => Probe::Failed(e.to_string()),
        }
    }

    async fn volume_create(&self, volume: &str) -> Result<()> {
        let out = self
            .command(&["volume", "create", volume], None)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !out.status.success() {
            return Err(self.failure("volume create", out.status, &out.stderr));
        }
        Ok(())
    }

    async fn run(&self, args: &[String]) -> Result<i32> {
        let status = self
            .command(args, None)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        Ok(exit_code(status))
    }
}

/// Number of trailing output lines kept per stream for error reports.
const BUILD_TAIL_LINES: usize = 20;

/// Forward every line of `reader` and return the last few non-empty ones.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected; build
/// output is informational and must never fail the build itself.
async fn forward_lines<R>(
    reader: R,
    output: &UnboundedSender<String>,
) -> std::io::Result<VecDeque<String>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut tail = VecDeque::with_capacity(BUILD_TAIL_LINES);
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        if !line.trim().is_empty() {
            if tail.len() == BUILD_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());
        }
        // Receiver may be gone; the build still has to run to completion.
        let _ = output.send(line);
    }
    Ok(tail)
}

/// Map an exit status to a shell-style exit code (`128 + n` for signal `n`).
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(test)]
pub(crate) mod stub {
    //! Recording in-memory engine for provisioning tests.

    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Debug)]
    pub(crate) struct StubEngine {
        pub image: Mutex<Probe>,
        pub volume: Mutex<Probe>,
        pub build_lines: Vec<String>,
        pub build_error: Option<String>,
        pub create_error: Option<String>,
        pub run_code: i32,
        pub calls: Mutex<Vec<String>>,
        pub last_context: Mutex<Option<PathBuf>>,
    }

    impl Default for StubEngine {
        fn default() -> Self {
            Self {
                image: Mutex::new(Probe::Absent),
                volume: Mutex::new(Probe::Absent),
                build_lines: vec!["#1 [internal] load build definition".into(), String::new()],
                build_error: None,
                create_error: None,
                run_code: 0,
                calls: Mutex::new(Vec::new()),
                last_context: Mutex::new(None),
            }
        }
    }

    impl StubEngine {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Engine for StubEngine {
        fn binary(&self) -> &str {
            "stub"
        }

        async fn image_exists(&self, image: &str) -> Probe {
            self.record(format!("images -q {image}"));
            self.image.lock().unwrap().clone()
        }

        async fn build(
            &self,
            request: &BuildRequest<'_>,
            output: UnboundedSender<String>,
        ) -> Result<()> {
            let dockerfile = request.context_dir.join(request.dockerfile);
            assert!(dockerfile.exists(), "build context must contain the Dockerfile");
            self.record(format!("build {}", request.image));
            *self.last_context.lock().unwrap() = Some(request.context_dir.to_path_buf());
            for line in &self.build_lines {
                let _ = output.send(line.clone());
            }
            if let Some(msg) = &self.build_error {
                return Err(CoreError::CommandFailed {
                    command: "stub build".into(),
                    status: "exit status: 1".into(),
                    detail: Some(msg.clone()),
                });
            }
            *self.image.lock().unwrap() = Probe::Present;
            Ok(())
        }

        async fn volume_exists(&self, volume: &str) -> Probe {
            self.record(format!("volume inspect {volume}"));
            self.volume.lock().unwrap().clone()
        }

        async fn volume_create(&self, volume: &str) -> Result<()> {
            self.record(format!("volume create {volume}"));
            if let Some(msg) = &self.create_error {
                return Err(CoreError::CommandFailed {
                    command: "stub volume create".into(),
                    status: "exit status: 1".into(),
                    detail: Some(msg.clone()),
                });
            }
            *self.volume.lock().unwrap() = Probe::Present;
            Ok(())
        }

        async fn run(&self, args: &[String]) -> Result<i32> {
            self.record(args.join(" "));
            Ok(self.run_code)
        }
    }
}
