//! Launch parameters supplied as a URL query string.

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

use crate::driver::Credentials;

/// Errors raised while reading launch parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LaunchError {
    /// The connection URL does not parse.
    #[error("invalid connection URL '{url}': {message}")]
    InvalidConnectUrl {
        /// Value as supplied.
        url: String,
        /// Parser detail.
        message: String,
    },
    /// The discovery URL does not parse.
    #[error("invalid discovery URL '{url}': {message}")]
    InvalidDiscoveryUrl {
        /// Value as supplied.
        url: String,
        /// Parser detail.
        message: String,
    },
}

/// One `cmd`/`arg` pair. Only `play`, `edit`, `param` and `params` are
/// runnable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupCommand {
    /// Opens a guide.
    Play(String),
    /// Places text in the editor.
    Edit(String),
    /// Sets one parameter.
    Param(String),
    /// Sets or replaces parameters.
    Params(String),
    /// Anything else; reported, never executed.
    Unsupported {
        /// Command name.
        command: String,
        /// Its argument.
        argument: String,
    },
}

impl StartupCommand {
    fn new(command: &str, argument: String) -> Self {
        match command {
            "play" => Self::Play(argument),
            "edit" => Self::Edit(argument),
            "param" => Self::Param(argument),
            "params" => Self::Params(argument),
            other => Self::Unsupported {
                command: other.to_owned(),
                argument,
            },
        }
    }

    /// Directive text to submit, for commands that run as directives.
    #[must_use]
    pub fn directive(&self, prefix: char) -> Option<String> {
        match self {
            Self::Play(argument) => Some(format!("{prefix}play {argument}")),
            Self::Param(argument) => Some(format!("{prefix}param {argument}")),
            Self::Params(argument) => Some(format!("{prefix}params {argument}")),
            Self::Edit(_) | Self::Unsupported { .. } => None,
        }
    }
}

/// Parsed launch parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchParams {
    /// Host forced through `connectURL` or `dbms`, without credentials.
    pub connect_host: Option<String>,
    /// Username embedded in the connection URL.
    pub username: Option<String>,
    /// Password embedded in the connection URL.
    pub password: Option<String>,
    /// Target database.
    pub database: Option<String>,
    /// Alternate discovery source.
    pub discovery_url: Option<Url>,
    /// Startup commands in the order given.
    pub commands: Vec<StartupCommand>,
    /// Identity provider that issued `access_token`.
    pub idp_id: Option<String>,
    /// Token obtained through single sign-on.
    pub access_token: Option<String>,
}

impl LaunchParams {
    /// Parses a query string, with or without its leading `?`.
    ///
    /// `cmd` and `arg` are paired in order; a `cmd` without an `arg` gets an
    /// empty argument.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when a URL-valued parameter does not parse.
    pub fn parse(query: &str) -> Result<Self, LaunchError> {
        let query = query.trim().trim_start_matches('?');
        let mut params = Self::default();
        let mut commands = Vec::new();
        let mut arguments = Vec::new();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "connectURL" | "dbms" => params.read_connect_url(&value)?,
                "db" => params.database = Some(value),
                "discoveryURL" => {
                    let url = Url::parse(&value).map_err(|error| LaunchError::InvalidDiscoveryUrl {
                        url: value.clone(),
                        message: error.to_string(),
                    })?;
                    params.discovery_url = Some(url);
                }
                "cmd" => commands.push(value),
                "arg" => arguments.push(value),
                "idp_id" => params.idp_id = Some(value),
                "access_token" => params.access_token = Some(value),
                _ => {}
            }
        }

        let mut arguments = arguments.into_iter();
        params.commands = commands
            .iter()
            .map(|command| StartupCommand::new(command, arguments.next().unwrap_or_default()))
            .collect();
        Ok(params)
    }

    fn read_connect_url(&mut self, value: &str) -> Result<(), LaunchError> {
        let with_scheme = if value.contains("://") {
            value.to_owned()
        } else {
            format!("neo4j://{value}")
        };
        let url = Url::parse(&with_scheme).map_err(|error| LaunchError::InvalidConnectUrl {
            url: value.to_owned(),
            message: error.to_string(),
        })?;
        let Some(host) = url.host_str().filter(|host| !host.is_empty()) else {
            return Err(LaunchError::InvalidConnectUrl {
                url: value.to_owned(),
                message: "missing host".to_owned(),
            });
        };

        let decode = |text: &str| percent_decode_str(text).decode_utf8_lossy().into_owned();
        if !url.username().is_empty() {
            self.username = Some(decode(url.username()));
        }
        self.password = url.password().map(decode);
        self.connect_host = Some(match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        });
        Ok(())
    }

    /// Credentials carried by the launch parameters. A single sign-on token
    /// wins over an embedded password.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        if let (Some(_), Some(token)) = (&self.idp_id, &self.access_token) {
            return Some(Credentials::bearer(token));
        }
        let username = self.username.as_ref()?;
        Some(Credentials::basic(username, self.password.clone().unwrap_or_default()))
    }

    /// Whether every startup command is one of the safe set.
    #[must_use]
    pub fn all_commands_supported(&self) -> bool {
        self.commands.iter().all(|command| {
            !matches!(command, StartupCommand::Unsupported { .. })
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::driver::AuthMethod;

    #[rstest]
    fn reads_connection_url_with_embedded_credentials() {
        let params = LaunchParams::parse(
            "?connectURL=neo4j%2Bs%3A%2F%2Fann%3Ap%2540ss%40db.example%3A7687&db=movies",
        )
        .expect("parse");
        assert_eq!(params.connect_host.as_deref(), Some("neo4j+s://db.example:7687"));
        assert_eq!(params.username.as_deref(), Some("ann"));
        assert_eq!(params.password.as_deref(), Some("p@ss"));
        assert_eq!(params.database.as_deref(), Some("movies"));
        assert_eq!(
            params.credentials(),
            Some(Credentials::basic("ann", "p@ss"))
        );
    }

    #[rstest]
    fn bare_hosts_default_to_the_routing_scheme() {
        let params = LaunchParams::parse("dbms=localhost:7687").expect("parse");
        assert_eq!(params.connect_host.as_deref(), Some("neo4j://localhost:7687"));
        assert_eq!(params.credentials(), None);
    }

    #[rstest]
    fn pairs_commands_with_arguments_in_order() {
        let params =
            LaunchParams::parse("cmd=play&arg=movies&cmd=edit&arg=RETURN%201&cmd=server&arg=disconnect&cmd=params")
                .expect("parse");
        assert_eq!(
            params.commands,
            vec![
                StartupCommand::Play("movies".to_owned()),
                StartupCommand::Edit("RETURN 1".to_owned()),
                StartupCommand::Unsupported {
                    command: "server".to_owned(),
                    argument: "disconnect".to_owned(),
                },
                StartupCommand::Params(String::new()),
            ]
        );
        assert!(!params.all_commands_supported());
        assert_eq!(
            params.commands.first().and_then(|command| command.directive(':')),
            Some(":play movies".to_owned())
        );
    }

    #[rstest]
    fn sso_token_becomes_bearer_credentials() {
        let params = LaunchParams::parse("connectURL=neo4j://db:7687&idp_id=okta&access_token=abc")
            .expect("parse");
        let credentials = params.credentials().expect("credentials");
        assert_eq!(credentials.method, AuthMethod::Bearer);
        assert_eq!(credentials.password, "abc");
    }

    #[rstest]
    #[case("discoveryURL=not%20a%20url")]
    #[case("connectURL=neo4j%3A%2F%2F")]
    fn rejects_malformed_urls(#[case] query: &str) {
        assert!(LaunchParams::parse(query).is_err());
    }
}
