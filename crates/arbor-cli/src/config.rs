//! Configuration loading helpers for the arbor CLI.
//!
//! Leading arguments that name configuration flags are handed to
//! `ortho-config`; everything from the first other token on is parsed by
//! `clap` as CLI arguments.

use std::ffi::{OsStr, OsString};

use arbor_config::Config;
use ortho_config::OrthoConfig;

use crate::errors::CliError;

/// CLI flags recognised by the configuration loader.
///
/// Keep in sync with the fields of [`arbor_config::Config`]. Boolean fields
/// are configured through the file or the environment only.
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--cmd-char",
    "--max-history",
    "--poll-interval-secs",
    "--count-latency-threshold-ms",
    "--app-name",
    "--discovery-endpoint",
    "--http-endpoint",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the filtered configuration arguments.
    ///
    /// Configuration flags must appear before any CLI flag; later ones are
    /// parsed as CLI arguments.
    fn load(&self, args: &[OsString]) -> Result<Config, CliError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, CliError> {
        Config::load_from_iter(args.iter().cloned()).map_err(CliError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

fn process_config_flag(argument: &OsStr) -> FlagAction {
    let argument_text = argument.to_string_lossy();
    if !argument_text.starts_with("--") {
        return FlagAction::Skip;
    }
    let (flag, has_inline_value) = match argument_text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (argument_text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !has_inline_value,
        }
    } else {
        FlagAction::Skip
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) cli_arguments: Vec<OsString>,
}

/// Separates leading configuration flags from the CLI arguments. Both
/// halves keep the program name.
pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            cli_arguments: Vec::new(),
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut remaining = rest.iter().peekable();
    while let Some(argument) = remaining.peek() {
        match process_config_flag(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push((*argument).clone());
                remaining.next();
                if needs_value {
                    if let Some(value) = remaining.next() {
                        config_arguments.push(value.clone());
                    }
                }
            }
            FlagAction::Skip => break,
        }
    }

    let mut cli_arguments = vec![program.clone()];
    cli_arguments.extend(remaining.cloned());
    ConfigArgumentSplit {
        config_arguments,
        cli_arguments,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn args(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case("--log-filter=debug", FlagAction::Include { needs_value: false })]
    #[case("--log-filter", FlagAction::Include { needs_value: true })]
    #[case("--launch", FlagAction::Skip)]
    #[case("connect", FlagAction::Skip)]
    fn classifies_flags(#[case] argument: &str, #[case] expected: FlagAction) {
        assert_eq!(process_config_flag(OsStr::new(argument)), expected);
    }

    #[rstest]
    fn splits_leading_config_flags() {
        let split = split_config_arguments(&args(&[
            "arbor",
            "--cmd-char",
            "!",
            "--log-format=compact",
            "--launch",
            "db=movies",
        ]));
        assert_eq!(
            split.config_arguments,
            args(&["arbor", "--cmd-char", "!", "--log-format=compact"])
        );
        assert_eq!(split.cli_arguments, args(&["arbor", "--launch", "db=movies"]));
    }

    #[rstest]
    fn config_flags_after_cli_flags_stay_with_the_cli() {
        let split = split_config_arguments(&args(&["arbor", "--launch", "x", "--log-filter", "y"]));
        assert_eq!(split.config_arguments, args(&["arbor"]));
        assert_eq!(split.cli_arguments.len(), 5);
    }

    #[rstest]
    fn empty_arguments_split_to_nothing() {
        let split = split_config_arguments(&[]);
        assert!(split.config_arguments.is_empty());
        assert!(split.cli_arguments.is_empty());
    }
}
