//! ctrlk CLI - C/C++ indexing daemon and its client.
//!
//! Usage:
//!   ctrlk serve                          # Run the daemon in the foreground
//!   ctrlk register <library-path>        # Register the project at --project
//!   ctrlk parse [file]                   # Reindex a file, or scan everything
//!   ctrlk match <prefix>                 # Indexed symbol names
//!   ctrlk usr <file> <line> <column>     # Symbol under a position of a live buffer
//!   ctrlk scope <file> <line>            # Scope of a line of a live buffer

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ctrlk::daemon::{default_socket_path, is_daemon_running, send_request, start_daemon, Request, Response};
use ctrlk::ProjectRegistry;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ctrlk")]
#[command(about = "ctrlk - C/C++ indexing daemon", long_about = None)]
struct Cli {
    /// Project root, or any path inside it (default: current directory)
    #[arg(short, long, default_value = ".")]
    project: PathBuf,

    /// Daemon socket (default: per-user socket in the runtime directory)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Serve,

    /// Register the project with the daemon
    Register {
        /// Directory of the libclang-compatible library installation
        library_path: PathBuf,
    },

    /// Reindex one file, or the whole project when no file is given
    Parse { file: Option<PathBuf> },

    /// Number of pending bulk indexing jobs
    QueueSize,

    /// Wait until bulk indexing has finished
    Wait,

    /// Raw index entries whose key starts with a prefix
    Search { starts_with: String },

    /// Indexed symbol names starting with a prefix
    Match {
        prefix: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Builtin header directory in use
    BuiltinPath,

    /// Compiler invocation for a file
    FileArgs { file: PathBuf },

    /// Parse an unsaved buffer read from stdin
    ParseCurrent {
        file: PathBuf,

        /// Compiler argv as a JSON array of strings
        #[arg(short, long)]
        invocation: String,
    },

    /// Drop the live session of a buffer
    Unload { file: PathBuf },

    /// Declaration referenced at a position of a live buffer
    Usr { file: PathBuf, line: usize, column: usize },

    /// Scope of a line of a live buffer
    Scope { file: PathBuf, line: usize },

    /// Check whether the daemon is running
    Status,

    /// Stop the daemon
    Shutdown,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ctrlk=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let socket = cli.socket.unwrap_or_else(default_socket_path);
    let project = cli.project.canonicalize().unwrap_or(cli.project);

    let request = match cli.command {
        Commands::Serve => {
            init_tracing();
            if is_daemon_running(&socket) {
                bail!("daemon already running on {}", socket.display());
            }
            return start_daemon(&socket, Arc::new(ProjectRegistry::new()));
        }
        Commands::Status => {
            let running = is_daemon_running(&socket)
                && matches!(send_request(&socket, &Request::Ping), Ok(Response::Pong));
            println!("{}", if running { "running" } else { "stopped" });
            return Ok(());
        }
        Commands::Register { library_path } => Request::Register {
            project_root: project,
            library_path,
        },
        Commands::Parse { file } => Request::Reparse { project, file },
        Commands::QueueSize => Request::QueueSize { project },
        Commands::Wait => Request::Wait { project },
        Commands::Search { starts_with } => Request::Search { project, starts_with },
        Commands::Match { prefix, limit } => Request::Match { project, prefix, limit },
        Commands::BuiltinPath => Request::BuiltinHeaderPath { project },
        Commands::FileArgs { file } => Request::FileArgs { project, file },
        Commands::ParseCurrent { file, invocation } => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("reading buffer from stdin")?;
            Request::ParseCurrentFile {
                project,
                invocation,
                file,
                content,
            }
        }
        Commands::Unload { file } => Request::UnloadCurrentFile { project, file },
        Commands::Usr { file, line, column } => Request::UsrUnderCursor {
            project,
            file,
            line,
            column,
        },
        Commands::Scope { file, line } => Request::CurrentScope { project, file, line },
        Commands::Shutdown => Request::Shutdown,
    };

    match send_request(&socket, &request)? {
        Response::Ok { data } => {
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
        Response::Error { message } => bail!(message),
        Response::Pong => {
            println!("pong");
            Ok(())
        }
        Response::Goodbye => {
            println!("daemon stopped");
            Ok(())
        }
    }
}
