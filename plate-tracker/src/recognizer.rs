use std::process::Stdio;

use tokio::process::{Child, ChildStdout, Command};
use tracing::{info, warn};

use crate::config::RecognizerConfig;
use crate::error::SupervisorError;

/// The external `alpr` process whose stdout feeds the tracker.
pub struct Recognizer {
    child: Child,
}

impl Recognizer {
    /// Build the recognizer command line: JSON output, one candidate per plate by default.
    pub fn command(config: &RecognizerConfig) -> Command {
        let mut command = Command::new(&config.location);
        command
            .arg("-c")
            .arg(&config.country)
            .arg("-n")
            .arg(config.top_n.to_string())
            .arg("-j")
            .arg(&config.stream)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }

    /// Start the recognizer and take its stdout.
    pub fn spawn(config: &RecognizerConfig) -> Result<(Self, ChildStdout), SupervisorError> {
        let command = config.location.clone();
        let mut child = Self::command(config)
            .spawn()
            .map_err(|source| SupervisorError::SpawnError { command, source })?;

        let stdout = child.stdout.take().ok_or(SupervisorError::MissingStdout)?;
        info!(
            command = %config.location,
            pid = child.id(),
            stream = %config.stream,
            "recognizer started"
        );

        Ok((Self { child }, stdout))
    }

    /// Reap a recognizer whose output ended on its own. Any exit other than success is
    /// returned as [`SupervisorError::Exited`].
    pub async fn finish(mut self) -> Result<(), SupervisorError> {
        match self.child.wait().await {
            Ok(status) if status.success() => {
                info!(%status, "recognizer exited");
                Ok(())
            }
            Ok(status) => Err(SupervisorError::Exited(status)),
            Err(e) => Err(SupervisorError::WaitError(e)),
        }
    }

    /// Kill the recognizer and reap it. A process that already exited is not an error: it
    /// may have received the same signal as the tracker.
    pub async fn shutdown(mut self) -> Result<(), SupervisorError> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                warn!(%status, "recognizer already exited");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => return Err(SupervisorError::WaitError(e)),
        }

        if let Err(e) = self.child.kill().await {
            return Err(SupervisorError::KillError(e));
        }
        info!("recognizer stopped");

        Ok(())
    }
}
