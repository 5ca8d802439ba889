use crate::error::{ErrorKind, Result};
use crate::{BuildSandbox, ExecOptions, ExecOutput, command_line};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Present only inside a ChromiumOS SDK chroot.
const CHROOT_MARKER: &str = "/etc/cros_chroot_version";

/// How commands reach the chroot.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Launcher {
    /// Already inside the chroot; run commands directly.
    Inside,
    /// Enter the chroot through `cros_sdk` on every invocation.
    CrosSdk { path: PathBuf },
}

/// The ChromiumOS SDK chroot of one source checkout.
#[derive(Clone, Debug)]
pub struct ChrootSandbox {
    source_root: PathBuf,
    chroot: PathBuf,
    launcher: Launcher,
}
impl ChrootSandbox {
    /// Find a way into the chroot for the checkout at `source_root`.
    ///
    /// `chroot` defaults to `<source_root>/chroot`.
    pub fn discover(source_root: impl Into<PathBuf>, chroot: Option<PathBuf>) -> Result<Self> {
        let source_root = source_root.into();
        if !source_root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(source_root));
        }
        let chroot = chroot.unwrap_or_else(|| source_root.join("chroot"));

        if Path::new(CHROOT_MARKER).exists() {
            tracing::debug!("Running inside the SDK chroot; commands will run directly");
            return Ok(Self { source_root, chroot, launcher: Launcher::Inside });
        }
        let bundled = source_root.join("chromite/bin/cros_sdk");
        if bundled.is_file() {
            return Ok(Self { source_root, chroot, launcher: Launcher::CrosSdk { path: bundled } });
        }
        tracing::info!(checkout = %source_root.display(), "cros_sdk not found in checkout; searching PATH");
        match which::which("cros_sdk") {
            Ok(path) => Ok(Self { source_root, chroot, launcher: Launcher::CrosSdk { path } }),
            Err(_) => exn::bail!(ErrorKind::CrosSdkNotFound),
        }
    }

    fn command(&self, command: &str, args: &[String], options: &ExecOptions) -> Command {
        match &self.launcher {
            Launcher::Inside => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                if let Some(dir) = &options.working_dir {
                    cmd.current_dir(dir);
                }
                cmd
            },
            Launcher::CrosSdk { path } => {
                let mut cmd = Command::new(path);
                if let Some(dir) = &options.working_dir {
                    cmd.arg("--working-dir").arg(dir);
                }
                cmd.arg("--").arg(command).args(args);
                cmd.current_dir(&self.source_root);
                cmd
            },
        }
    }
}

#[async_trait]
impl BuildSandbox for ChrootSandbox {
    fn name(&self) -> &str {
        "chroot"
    }

    fn host_path(&self, sandbox_path: &Path) -> PathBuf {
        match self.launcher {
            Launcher::Inside => sandbox_path.to_path_buf(),
            Launcher::CrosSdk { .. } => self.chroot.join(sandbox_path.strip_prefix("/").unwrap_or(sandbox_path)),
        }
    }

    async fn exec(&self, command: &str, args: &[String], options: ExecOptions) -> Result<ExecOutput> {
        let rendered = command_line(command, args);
        tracing::debug!(sandbox = self.name(), command = %rendered, "Running command");

        let mut cmd = self.command(command, args, &options);
        // Dropping the child (e.g. when cancelled below) kills the build.
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        let child = cmd.spawn().or_raise(|| ErrorKind::Spawn(rendered.clone()))?;

        let output = match &options.cancel {
            Some(token) => tokio::select! {
                output = child.wait_with_output() => output,
                () = token.cancelled() => {
                    tracing::info!(command = %rendered, "Command cancelled; killing process");
                    exn::bail!(ErrorKind::Cancelled);
                },
            },
            None => child.wait_with_output().await,
        }
        .or_raise(|| ErrorKind::Io(rendered.clone()))?;

        tracing::debug!(command = %rendered, exit_code = ?output.status.code(), "Command finished");
        Ok(ExecOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
