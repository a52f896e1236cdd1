//! CLI argument definitions for the arbor client.

use clap::Parser;

/// Command-line interface for the arbor graph database client.
#[derive(Parser, Debug)]
#[command(name = "arbor", version, about)]
pub(crate) struct Cli {
    /// Launch parameters as a URL query string, for example
    /// `connectURL=neo4j://localhost:7687&cmd=play&arg=movies`.
    #[arg(long, value_name = "QUERY")]
    pub(crate) launch: Option<String>,
}
