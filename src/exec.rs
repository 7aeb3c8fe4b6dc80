//! Running external programs
//!
//! Thin wrappers over `tokio::process::Command` that log the invocation,
//! capture output, and turn a non-zero exit into a [`ToolError::Failed`].
//! Children are spawned with `kill_on_drop` so an interrupted phase does not
//! leave them running.

use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::debug;

use crate::error::{ToolError, ToolResult};

/// Render a command as a single shell-like line for logs and errors
pub fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    let mut line = std_cmd.get_program().to_string_lossy().into_owned();
    for arg in std_cmd.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

fn program(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

fn check(command: String, output: Output) -> ToolResult<Output> {
    if output.status.success() {
        return Ok(output);
    }
    Err(ToolError::Failed {
        command,
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Run a command to completion, capturing stdout and stderr.
pub async fn output(mut cmd: Command) -> ToolResult<Output> {
    let line = describe(&cmd);
    let program = program(&cmd);
    debug!(command = %line, "running");

    let output = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ToolError::Spawn { program, source })?;

    check(line, output)
}

/// Run a command and return its trimmed stdout as a string.
pub async fn stdout(cmd: Command) -> ToolResult<String> {
    let output = output(cmd).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run `producer | consumer`, connecting the two through an OS pipe.
///
/// Nothing passes through this process, so the stream is never buffered in
/// memory. Both children's stderr is drained while they run. The producer's
/// failure is reported first; the consumer's output is returned.
pub async fn pipe(mut producer: Command, mut consumer: Command) -> ToolResult<Output> {
    let producer_line = describe(&producer);
    let consumer_line = describe(&consumer);
    debug!(producer = %producer_line, consumer = %consumer_line, "running pipeline");

    let producer_program = program(&producer);
    let mut upstream = producer
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: producer_program.clone(),
            source,
        })?;
    let stream: Stdio = upstream
        .stdout
        .take()
        .ok_or_else(|| ToolError::unexpected_output(&producer_program, "stdout was not captured"))?
        .try_into()?;

    let consumer_program = program(&consumer);
    let downstream = consumer
        .stdin(stream)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: consumer_program,
            source,
        })?;
    // Release our handle on the read end so the producer sees EPIPE if the
    // consumer exits early
    drop(consumer);

    let (upstream, downstream) =
        tokio::join!(upstream.wait_with_output(), downstream.wait_with_output());
    check(producer_line, upstream?)?;
    check(consumer_line, downstream?)
}
