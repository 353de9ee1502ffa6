use std::path::PathBuf;

use clap::Parser;

/// Command-line configuration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on (NetBIOS session service)
    #[arg(short, long, default_value = "139")]
    pub port: u16,

    /// Directory exported as the share root
    #[arg(long, default_value = ".")]
    pub root_dir: PathBuf,

    /// Refuse all write access on the share
    #[arg(long)]
    pub read_only: bool,

    /// Maximum SMB packet size in bytes (sizes reply pagination)
    #[arg(long, default_value = "4356")]
    pub max_xmit: usize,
}
