//! Line protocol between stdin, the engine and stdout.

use std::io::Write;

use arbor_core::{Command, Engine, EngineEvent, LaunchParams, OutputEvent, OutputReceiver};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::CLI_TARGET;
use crate::errors::CliError;

/// Drives `engine` until stdin closes and every in-flight task settles.
///
/// Blank lines are ignored. At end of input the engine is asked to shut
/// down; output keeps flowing until the engine drops its output channel.
pub(crate) async fn run_session<R, W>(
    engine: Engine,
    mut outputs: OutputReceiver,
    launch: LaunchParams,
    input: R,
    stdout: &mut W,
) -> Result<(), CliError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let handle = engine.handle();
    let engine_task = tokio::spawn(engine.run());
    handle.send(EngineEvent::Startup(launch));

    let mut lines = input.lines();
    let mut input_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.map_err(CliError::ReadInput)? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        handle.send(EngineEvent::UserInteraction);
                        handle.submit(Command::new(line));
                    }
                    None => {
                        tracing::debug!(target: CLI_TARGET, "input closed; shutting down");
                        input_open = false;
                        handle.send(EngineEvent::Shutdown);
                    }
                }
            }
            event = outputs.recv() => match event {
                Some(event) => write_event(stdout, &event)?,
                None => break,
            },
        }
    }

    if let Err(error) = engine_task.await {
        tracing::warn!(target: CLI_TARGET, %error, "engine task ended abnormally");
    }
    Ok(())
}

fn write_event<W: Write>(stdout: &mut W, event: &OutputEvent) -> Result<(), CliError> {
    serde_json::to_writer(&mut *stdout, event).map_err(CliError::SerialiseOutput)?;
    writeln!(stdout).map_err(CliError::WriteOutput)?;
    stdout.flush().map_err(CliError::WriteOutput)
}
