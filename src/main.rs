//! dbg - interactive debugger front-end
//!
//! Drives a debug adapter from a terminal prompt, or from one remote
//! websocket client with `--listen`.

use clap::Parser;
use dbg_frontend::cli::{self, Cli};
use dbg_frontend::common::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.listen.is_some() {
        if let Some(path) = logging::init_remote() {
            eprintln!("Logging to {}", path.display());
        }
    } else {
        logging::init_local();
    }

    match cli::run(cli).await {
        Ok(status) => std::process::exit(status.code()),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
