use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "burrow", about = "Dual-protocol SOCKS5 and HTTP forward proxy")]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the proxy endpoints until interrupted
    Serve(ServeArgs),
    /// Check configuration and that the proxy can bind on this system
    Check(CheckArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Load this config file instead of the default search paths
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Ignore all config files; use built-in defaults plus environment
    #[arg(long, conflicts_with = "config")]
    pub no_config: bool,

    /// Bind the SOCKS5 endpoint here (enables it even if disabled in config)
    #[arg(long = "socks-listen", value_name = "ADDR")]
    pub socks_listen: Option<SocketAddr>,

    /// Bind the HTTP endpoint here (enables it even if disabled in config)
    #[arg(long = "http-listen", value_name = "ADDR")]
    pub http_listen: Option<SocketAddr>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Check this config file instead of the default search paths
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
}
