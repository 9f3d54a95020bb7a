//! External `pandoc` backend.
//!
//! Spawns pandoc once per document with the fixed option set and captures the
//! Markdown from stdout. Pandoc writes extracted media itself.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, instrument};

use folio_shared::{FolioError, Result};

use crate::{ConvertOptions, ConvertOutput, DocumentConverter};

/// Converter that shells out to pandoc.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    program: String,
}

impl PandocConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Program name or path that gets executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, source: &Path, options: &ConvertOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(source)
            .args(options.pandoc_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out conversion drops the future; take the process down with it.
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: &Path, e: std::io::Error) -> FolioError {
        if e.kind() == ErrorKind::NotFound {
            FolioError::dependency_missing(&self.program, format!("could not be started: {e}"))
        } else {
            FolioError::conversion(source, format!("failed to run `{}`: {e}", self.program))
        }
    }
}

impl DocumentConverter for PandocConverter {
    fn name(&self) -> &'static str {
        "pandoc"
    }

    fn ensure_available(&self) -> Result<()> {
        match which::which(&self.program) {
            Ok(path) => {
                debug!(program = %self.program, path = %path.display(), "converter found");
                Ok(())
            }
            Err(e) => Err(FolioError::dependency_missing(
                &self.program,
                format!("was not found on PATH ({e}). Install pandoc: https://pandoc.org/installing.html"),
            )),
        }
    }

    async fn describe(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(Path::new(&self.program), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .next()
            .unwrap_or(self.program.as_str())
            .trim()
            .to_string())
    }

    #[instrument(skip_all, fields(source = %source.display()))]
    async fn convert(&self, source: &Path, options: &ConvertOptions) -> Result<ConvertOutput> {
        let mut cmd = self.command(source, options);
        debug!(command = ?cmd.as_std(), "running pandoc");

        let output = cmd.output().await.map_err(|e| self.spawn_error(source, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = output
                .status
                .code()
                .map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
            return Err(FolioError::conversion(
                source,
                format!("{} exited with {status}: {}", self.program, stderr.trim()),
            ));
        }

        let markdown = String::from_utf8(output.stdout).map_err(|e| {
            FolioError::conversion(source, format!("converter produced non-UTF-8 output: {e}"))
        })?;

        debug!(len = markdown.len(), "pandoc conversion complete");
        Ok(ConvertOutput { markdown })
    }
}
