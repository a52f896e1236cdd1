//! Command-line front end for the arbor engine.
//!
//! The binary loads configuration, installs telemetry, starts an
//! [`arbor_core::Engine`] over the HTTP driver and then behaves as a line
//! protocol: each stdin line is one command, each engine output event is
//! one JSON line on stdout. Rendering is left to whatever consumes that
//! stream.

mod cli;
mod config;
mod errors;
mod session;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use arbor_config::Config;
use arbor_core::{
    ClientSettings, Engine, HttpDiscovery, HttpDriver, HttpRestClient, LaunchParams,
    OutputReceiver, initialise_telemetry,
};
use clap::Parser;
use clap::error::ErrorKind;
use tokio::io::AsyncBufRead;

use crate::cli::Cli;
use crate::config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
use crate::errors::CliError;

const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cli");

/// Runs the CLI against the process stdin.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    run_with_input(args, input, stdout, stderr, &OrthoConfigLoader)
}

fn run_with_input<I, R, W, E>(
    args: I,
    input: R,
    stdout: &mut W,
    stderr: &mut E,
    loader: &dyn ConfigLoader,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: AsyncBufRead + Unpin,
    W: Write,
    E: Write,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);

    let cli = match Cli::try_parse_from(&split.cli_arguments) {
        Ok(cli) => cli,
        Err(error)
            if matches!(
                error.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            return match write!(stdout, "{error}") {
                Ok(()) => ExitCode::SUCCESS,
                Err(_) => ExitCode::FAILURE,
            };
        }
        Err(error) => return report(stderr, &CliError::CliUsage(error)),
    };

    let bootstrap = match bootstrap(loader, &split.config_arguments, &cli) {
        Ok(bootstrap) => bootstrap,
        Err(error) => return report(stderr, &error),
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => return report(stderr, &CliError::Runtime(error)),
    };

    let result = runtime.block_on(async move {
        let Bootstrap {
            engine,
            outputs,
            launch,
        } = bootstrap;
        session::run_session(engine, outputs, launch, input, stdout).await
    });
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report(stderr, &error),
    }
}

struct Bootstrap {
    engine: Engine,
    outputs: OutputReceiver,
    launch: LaunchParams,
}

fn bootstrap(
    loader: &dyn ConfigLoader,
    config_arguments: &[OsString],
    cli: &Cli,
) -> Result<Bootstrap, CliError> {
    let config: Config = loader.load(config_arguments)?;
    config.validate()?;
    initialise_telemetry(&config)?;

    let launch = match cli.launch.as_deref() {
        Some(query) => LaunchParams::parse(query)?,
        None => LaunchParams::default(),
    };

    let driver = HttpDriver::new(config.http_endpoint().cloned())?;
    let rest = HttpRestClient::new(config.http_endpoint().cloned())?;
    let mut builder = Engine::builder(Arc::new(driver))
        .settings(ClientSettings::from_config(&config))
        .rest_client(Arc::new(rest));
    if let Some(endpoint) = config.discovery_endpoint() {
        builder = builder.discovery(Arc::new(HttpDiscovery::new()?), Some(endpoint.clone()));
    }
    tracing::debug!(
        target: CLI_TARGET,
        discovery = config.discovery_endpoint().map(ToString::to_string),
        http = config.http_endpoint().map(ToString::to_string),
        "engine configured"
    );
    let (engine, outputs) = builder.build();
    Ok(Bootstrap {
        engine,
        outputs,
        launch,
    })
}

fn report<E: Write>(stderr: &mut E, error: &CliError) -> ExitCode {
    tracing::error!(target: CLI_TARGET, %error, "arbor exited with an error");
    let _ = writeln!(stderr, "arbor: {error}");
    ExitCode::FAILURE
}
