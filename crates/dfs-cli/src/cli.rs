use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dfs",
    about = "Simple distributed file system: metadata service, block nodes, and client",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with [meta], [data], and [client] tables
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Metadata service address (overrides the config file)
    #[arg(long, global = true)]
    pub meta: Option<String>,

    /// User name for ownership and delete permission
    #[arg(short, long, global = true)]
    pub user: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the metadata service
    MetaServer(MetaServerArgs),
    /// Run a block storage node
    DataServer(DataServerArgs),
    /// List a directory
    Ls(LsArgs),
    /// Create a directory (and missing parents)
    Mkdir(PathArg),
    /// Create an empty file
    Touch(PathArg),
    /// Upload a local file
    Put(PutArgs),
    /// Write text into a file
    Write(WriteArgs),
    /// Print a file's content
    Cat(CatArgs),
    /// Download a file to local disk
    Get(GetArgs),
    /// Delete a file
    Rm(PathArg),
    /// Delete a directory and its contents
    Rmdir(PathArg),
    /// Copy a file
    Cp(TwoPaths),
    /// Move or rename a file or directory
    Mv(TwoPaths),
    /// Show entry metadata
    Info(PathArg),
    /// Show the size of a file or directory
    Size(PathArg),
}

#[derive(Args)]
pub struct MetaServerArgs {
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Namespace log file
    #[arg(long, conflicts_with = "in_memory")]
    pub db: Option<PathBuf>,
    /// Keep the namespace in memory only
    #[arg(long)]
    pub in_memory: bool,
}

#[derive(Args)]
pub struct DataServerArgs {
    #[arg(long)]
    pub node_id: Option<String>,
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Address clients should use to reach this node
    #[arg(long)]
    pub advertise: Option<String>,
    /// Directory for block files
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Args)]
pub struct LsArgs {
    #[arg(default_value = "/")]
    pub path: String,
}

#[derive(Args)]
pub struct PathArg {
    pub path: String,
}

#[derive(Args)]
pub struct TwoPaths {
    pub src: String,
    pub dst: String,
}

#[derive(Args)]
pub struct PutArgs {
    pub local: PathBuf,
    pub remote: String,
}

#[derive(Args)]
pub struct WriteArgs {
    pub remote: String,
    pub text: String,
}

#[derive(Args)]
pub struct CatArgs {
    pub remote: String,
    #[arg(long, default_value = "0")]
    pub offset: i64,
    /// Bytes to read; everything when omitted
    #[arg(long)]
    pub length: Option<usize>,
}

#[derive(Args)]
pub struct GetArgs {
    pub remote: String,
    pub local: PathBuf,
}
