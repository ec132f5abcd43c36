//! External scoring programs.

use std::ffi::OsString;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Settings;

use super::batch::Deadline;
use super::{BenchmarkError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Trailing bytes of stderr kept in failure messages.
const STDERR_TAIL: usize = 2000;

/// A configured evaluator command line.
#[derive(Debug, Clone)]
pub struct Evaluator {
    name: String,
    command: Vec<String>,
}

impl Evaluator {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }

    /// The evaluator configured under `[evaluators]` as `name`.
    pub fn from_settings(settings: &Settings, name: &str) -> Result<Self> {
        let command = settings
            .evaluator(name)
            .ok_or_else(|| BenchmarkError::MissingEvaluator(name.to_string()))?;
        Ok(Self::new(name, command.to_vec()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the evaluator with `args` appended and return its stdout.
    ///
    /// Once `deadline` expires the process is killed and
    /// [`BenchmarkError::Timeout`] is returned.
    pub fn run(&self, args: &[OsString], deadline: Deadline) -> Result<String> {
        let (program, base) = self
            .command
            .split_first()
            .ok_or_else(|| BenchmarkError::MissingEvaluator(self.name.clone()))?;

        debug!(evaluator = %self.name, ?args, "starting evaluator");
        let mut child = Command::new(program)
            .args(base)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BenchmarkError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        // Pipes are drained on their own threads while the child is polled.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if deadline.expired() {
                kill(&mut child);
                warn!(evaluator = %self.name, "deadline expired; evaluator killed");
                return Err(BenchmarkError::Timeout(self.name.clone()));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);
        if !status.success() {
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let start = (start..stderr.len())
                .find(|&i| stderr.is_char_boundary(i))
                .unwrap_or(stderr.len());
            return Err(BenchmarkError::EvaluatorFailed {
                name: self.name.clone(),
                status: status.to_string(),
                stderr: stderr[start..].trim().to_string(),
            });
        }
        debug!(evaluator = %self.name, "evaluator finished");
        Ok(stdout)
    }
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn kill(child: &mut Child) {
    // The process may already have exited between the poll and the kill.
    let _ = child.kill();
    let _ = child.wait();
}
