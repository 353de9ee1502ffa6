use args::Args;
use clap::Parser;
use log::{LevelFilter, error, info};
use server::{Server, ServerConfig};
use std::sync::Arc;

mod args;
mod netbios;
mod server;
mod smb;

#[tokio::main]
async fn main() {
    env_logger::builder()
        .filter_level(LevelFilter::Debug)
        .init();

    let args = Args::parse();

    if !args.root_dir.exists() {
        error!("Root directory {:?} does not exist", args.root_dir);
        std::process::exit(1);
    }

    if !args.root_dir.is_dir() {
        error!("Root directory {:?} is not a directory", args.root_dir);
        std::process::exit(1);
    }

    if args.max_xmit < 512 {
        error!(
            "Max packet size {} is below the 512-byte minimum",
            args.max_xmit
        );
        std::process::exit(1);
    }

    let root_dir = match args.root_dir.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            error!(
                "Failed to canonicalize root directory {:?}: {}",
                args.root_dir, e
            );
            std::process::exit(1);
        }
    };

    info!("Share root directory: {:?}", root_dir);
    info!("Max packet size: {} bytes", args.max_xmit);
    if args.read_only {
        info!("Share is exported read-only");
    }

    let server = Server {
        config: Arc::new(ServerConfig {
            root_dir,
            read_only: args.read_only,
            max_xmit: args.max_xmit,
        }),
    };

    info!("Starting SMB server on {}:{}", args.host, args.port);

    if let Err(e) = server.run(&args.host, args.port).await {
        error!("Server terminated: {e:#}");
        std::process::exit(1);
    }
}
