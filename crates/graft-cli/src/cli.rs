use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "graft",
    about = "Graft: content-addressed object graph storage",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Configuration file (defaults to ./graft.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Local cache directory, overriding the configuration
    #[arg(long, global = true)]
    pub local: Option<PathBuf>,

    /// Object server URL, overriding the configuration
    #[arg(long, global = true)]
    pub remote: Option<String>,

    /// Namespace on the object server
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Bearer token for the object server
    #[arg(long, global = true)]
    pub token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the object server
    Serve(ServeArgs),
    /// Store a JSON document as a graph
    Send(SendArgs),
    /// Rebuild a stored graph and print it as JSON
    Receive(ReceiveArgs),
    /// Print the content hash a JSON document would have
    Id(IdArgs),
    /// Show one stored fragment
    Show(ShowArgs),
    /// List the descendants recorded in a root's closure
    Closure(ClosureArgs),
    /// Summarize the local cache
    Stats(StatsArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Listen address, overriding the server configuration
    #[arg(long)]
    pub bind: Option<String>,
    /// Directory for per-namespace SQLite files; memory only if omitted
    #[arg(long)]
    pub storage: Option<PathBuf>,
    /// Server configuration file
    #[arg(long)]
    pub server_config: Option<PathBuf>,
}

#[derive(Args)]
pub struct SendArgs {
    /// JSON document; `-` reads standard input
    pub input: String,
    /// Store locally only
    #[arg(long)]
    pub local_only: bool,
}

#[derive(Args)]
pub struct ReceiveArgs {
    pub hash: String,
    /// Write the document here instead of standard output
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct IdArgs {
    pub input: String,
}

#[derive(Args)]
pub struct ShowArgs {
    pub hash: String,
}

#[derive(Args)]
pub struct ClosureArgs {
    pub hash: String,
    /// Only list entries missing from the local cache
    #[arg(long)]
    pub missing: bool,
}

#[derive(Args)]
pub struct StatsArgs {}
