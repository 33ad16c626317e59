// Commandline argument parser using clap for the taglog listener

use clap::Parser;
use std::path::PathBuf;

/// Arguments for the UDP listener binary.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct ListenerArgs {
    /// IP address to listen on
    #[arg(long = "ip", default_value = "127.0.0.1")]
    pub ip: String,

    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value_t = 5005)]
    pub port: u16,

    /// Directory under which per-day log directories are created
    #[arg(short = 'l', long = "log-root", default_value = "logs")]
    pub log_root: PathBuf,
}
