use std::{
    io::Read,
    process::{Command, ExitStatus, Stdio},
    thread,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn {program}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("Failed to wait for a child proccess")]
    Wait(#[from] std::io::Error),
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` to completion, killing it after `timeout`.
/// A non-zero exit status is an error carrying the captured stderr.
pub fn run(command: &mut Command, timeout: Duration) -> Result<CommandOutput, CommandError> {
    let program = command.get_program().to_string_lossy().into_owned();

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

    // drain both pipes while waiting so a chatty child can't block on a full pipe
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    debug!("Waiting on {program} ({})", child.id());
    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            warn!("{program} ran into timeout, killing it");
            child.kill()?;
            child.wait()?;

            return Err(CommandError::Timeout { program, timeout });
        }
    };

    let output = CommandOutput {
        stdout: stdout.map(collect).unwrap_or_default(),
        stderr: stderr.map(collect).unwrap_or_default(),
    };

    if status.success() {
        Ok(output)
    } else {
        Err(CommandError::Failed {
            program,
            status,
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();

        if let Err(error) = pipe.read_to_string(&mut buffer) {
            warn!("Failed to read child output: {error}");
        }

        buffer
    })
}

fn collect(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
