use crate::error::{QueryError, QueryResult};
use crate::outcome::{ErrorInfo, QueryOutcome};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// A backend query answered by running a subprocess
///
/// The command may print a JSON `{ "data": ..., "error": ... }` outcome on
/// stdout. Any other output is taken as plain data on a zero exit status, or
/// turned into an error from stderr otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandQuery {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl CommandQuery {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stdin: None,
        }
    }

    /// Feed `input` to the command's stdin
    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Run the command once
    ///
    /// The child is killed if the returned future is dropped, so a timed-out
    /// attempt does not leave the process running.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty, cannot be spawned, or its
    /// pipes fail
    pub async fn run(&self) -> anyhow::Result<QueryOutcome<Value>> {
        Ok(self.run_process().await?)
    }

    async fn run_process(&self) -> QueryResult<QueryOutcome<Value>> {
        debug!("Command: {} with args: {:?}", self.program, self.args);

        if self.program.is_empty() {
            return Err(QueryError::Command("Command cannot be empty".to_string()));
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                QueryError::Command(format!("Failed to spawn command '{}': {e}", self.program))
            })?;

        if let Some(input) = &self.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| QueryError::Command("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| QueryError::Command("Failed to capture stderr".to_string()))?;

        let (stdout, stderr, status) = tokio::try_join!(
            read_stream(BufReader::new(stdout)),
            read_stream(BufReader::new(stderr)),
            async { child.wait().await.map_err(QueryError::from) },
        )?;

        debug!(
            "Command {} exited with {} ({} bytes stdout, {} bytes stderr)",
            self.program,
            status,
            stdout.len(),
            stderr.len()
        );

        Ok(interpret_output(&stdout, &stderr, status.success(), status.code()))
    }
}

/// Turn captured process output into an outcome
fn interpret_output(
    stdout: &str,
    stderr: &str,
    success: bool,
    exit_code: Option<i32>,
) -> QueryOutcome<Value> {
    let trimmed = stdout.trim();
    let parsed = serde_json::from_str::<Value>(trimmed).ok();

    if let Some(value) = &parsed {
        if is_outcome_shaped(value) {
            if let Ok(outcome) = serde_json::from_value::<QueryOutcome<Value>>(value.clone()) {
                return outcome;
            }
        }
    }

    if success {
        return QueryOutcome::success(parsed.unwrap_or_else(|| Value::String(trimmed.to_string())));
    }

    let message = match stderr.trim() {
        "" => match exit_code {
            Some(code) => format!("Command exited with status {code}"),
            None => "Command terminated by signal".to_string(),
        },
        text => text.to_string(),
    };
    QueryOutcome::failure(ErrorInfo::new(message))
}

fn is_outcome_shaped(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        !map.is_empty()
            && map.keys().all(|key| key == "data" || key == "error")
    })
}

/// Read all lines from a stream asynchronously
async fn read_stream<R: AsyncRead + Unpin>(reader: BufReader<R>) -> QueryResult<String> {
    let mut lines = reader.lines();
    let mut output = String::new();

    while let Some(line) = lines.next_line().await? {
        output.push_str(&line);
        output.push('\n');
    }

    Ok(output)
}
