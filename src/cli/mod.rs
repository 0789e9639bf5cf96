//! Command-line arguments and startup
//!
//! Everything that can fail before the session exists (configuration, the
//! listener, starting the target) is a setup error and ends the process with
//! status 1.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use crate::commands::debug_commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::engine::DapEngine;
use crate::session::shutdown::ExitStatus;
use crate::session::Session;

#[derive(Parser, Debug)]
#[command(name = "dbg", about = "Interactive debugger front-end")]
#[command(version, long_about = None)]
pub struct Cli {
    /// Program to launch under the debugger
    #[arg(required_unless_present = "attach", conflicts_with = "attach")]
    pub program: Option<PathBuf>,

    /// Arguments to pass to the program
    #[arg(last = true)]
    pub args: Vec<String>,

    /// Attach to a running process instead of launching one
    #[arg(long, short = 'p', value_name = "PID")]
    pub attach: Option<u32>,

    /// Serve one websocket client on ADDR instead of the terminal prompt
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Debug adapter to use (default from config, lldb-dap)
    #[arg(long)]
    pub adapter: Option<String>,

    /// Configuration file (default: platform config directory)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Start the target and run the session to completion
pub async fn run(cli: Cli) -> Result<ExitStatus> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Bind first so an unusable address fails before the target starts
    let listener = match &cli.listen {
        Some(addr) => Some(
            TcpListener::bind(addr)
                .await
                .map_err(|source| Error::Bind {
                    addr: addr.clone(),
                    source,
                })?,
        ),
        None => None,
    };

    let adapter = cli.adapter.as_deref();
    let engine = match (cli.attach, cli.program) {
        (Some(pid), _) => {
            let engine = DapEngine::attach(&config, adapter, pid).await?;
            println!("Attached to process {}", pid);
            engine
        }
        (None, Some(program)) => {
            let program = program.canonicalize().unwrap_or(program);
            let engine = DapEngine::launch(&config, adapter, &program, cli.args).await?;
            println!("Started debugging: {}", program.display());
            engine
        }
        (None, None) => return Err(Error::MissingArgument("program or --attach")),
    };

    let session = Session::new(engine, debug_commands(), &config);
    match listener {
        Some(listener) => {
            let addr = listener.local_addr()?;
            eprintln!("Listening on {}", addr);
            tracing::info!(%addr, "Waiting for a remote client");
            session.run_remote(listener).await
        }
        None => session.run_local().await,
    }
}
