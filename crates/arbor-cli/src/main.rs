//! CLI entrypoint for the arbor graph database client.
//!
//! The binary delegates to [`arbor_cli::run`], which loads configuration,
//! installs telemetry, starts the engine and streams engine output as JSON
//! lines while reading one command per stdin line.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    arbor_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
