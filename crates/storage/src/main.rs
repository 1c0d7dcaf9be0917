//! Filemanager CLI
//!
//! Drives the storage layer from the command line, one request per
//! invocation, or as a JSON-lines service over stdin/stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use protocol::{Request, Response};
use storage::config::{default_config_path, Config};
use storage::{FileManager, Router};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Filemanager - confined file operations on local disk or object storage.
#[derive(Parser, Debug)]
#[command(name = "filemanager")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List the children of a directory
    List {
        /// Directory path (defaults to the root)
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show metadata for an entry
    Stat {
        /// Entry path
        path: String,
    },

    /// Print a file to stdout
    Cat {
        /// File path
        path: String,
    },

    /// Write a file from a local file or stdin
    Put {
        /// Destination path
        path: String,

        /// Read contents from this local file instead of stdin
        #[arg(long, short, value_name = "FILE")]
        from: Option<PathBuf>,
    },

    /// Create a directory
    Mkdir {
        /// Directory path
        path: String,
    },

    /// Rename an entry inside its directory
    Rename {
        /// Entry path
        path: String,

        /// New name (a single path segment)
        new_name: String,
    },

    /// Move an entry
    Mv {
        /// Source path
        source: String,

        /// Destination path
        destination: String,

        /// Replace an existing destination
        #[arg(long)]
        overwrite: bool,
    },

    /// Copy an entry, recursively for directories
    Cp {
        /// Source path
        source: String,

        /// Destination path
        destination: String,

        /// Replace an existing destination
        #[arg(long)]
        overwrite: bool,
    },

    /// Delete an entry, recursively for directories
    Rm {
        /// Entry path
        path: String,
    },

    /// Print the directory tree below a path
    Tree {
        /// Tree root (defaults to the root)
        #[arg(default_value = "/")]
        path: String,

        /// Maximum depth to expand
        #[arg(long, short)]
        depth: Option<usize>,
    },

    /// Show size, file and folder totals for a directory
    Summarize {
        /// Directory path (defaults to the root)
        #[arg(default_value = "/")]
        path: String,
    },

    /// Serve JSON requests from stdin, one per line
    Stdio,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Initialize tracing on stderr, stdout carries responses
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.log_level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::InitConfig { force } = cli.command {
        return init_config(&config_path, force);
    }

    // Validate configuration
    config.validate()?;
    tracing::debug!("Using config file: {:?}", config_path);

    let manager = FileManager::from_config(&config)?;
    let router = Router::new(Arc::new(manager));

    // Ctrl-C cancels whatever is in flight
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling");
            token.cancel();
        }
    });
    let ctx = router.manager().context().with_cancellation(shutdown);

    let request = match cli.command {
        Commands::Stdio => return serve_stdio(&router, &ctx).await,
        Commands::Cat { path } => return cat(&router, &ctx, path).await,
        Commands::InitConfig { .. } => return Ok(()),
        Commands::List { path } => Request::List { path },
        Commands::Stat { path } => Request::Stat { path },
        Commands::Put { path, from } => Request::Write {
            path,
            content: read_input(from).await?,
        },
        Commands::Mkdir { path } => Request::CreateDirectory { path },
        Commands::Rename { path, new_name } => Request::Rename { path, new_name },
        Commands::Mv {
            source,
            destination,
            overwrite,
        } => Request::Move {
            source,
            destination,
            overwrite,
        },
        Commands::Cp {
            source,
            destination,
            overwrite,
        } => Request::Copy {
            source,
            destination,
            overwrite,
        },
        Commands::Rm { path } => Request::Delete { path },
        Commands::Tree { path, depth } => Request::Tree {
            path,
            max_depth: depth,
        },
        Commands::Summarize { path } => Request::Summarize { path },
    };

    let response = router.handle(&ctx, request).await;
    print_response(&response)?;
    if response.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        eprintln!("Config file already exists: {}", path.display());
        eprintln!("Use --force to overwrite it.");
        std::process::exit(1);
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

async fn read_input(from: Option<PathBuf>) -> Result<Vec<u8>> {
    match from {
        Some(path) => tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read input file: {}", path.display())),
        None => {
            let mut buffer = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buffer)
                .await
                .context("Failed to read stdin")?;
            Ok(buffer)
        }
    }
}

/// File contents go to stdout raw; errors are reported as JSON.
async fn cat(router: &Router, ctx: &storage::OpContext, path: String) -> Result<()> {
    match router.handle(ctx, Request::Read { path }).await {
        Response::Content(content) => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(&content.data)
                .await
                .context("Failed to write to stdout")?;
            stdout.flush().await.context("Failed to flush stdout")?;
            Ok(())
        }
        response => {
            print_response(&response)?;
            std::process::exit(1);
        }
    }
}

fn print_response(response: &Response) -> Result<()> {
    let json = serde_json::to_string_pretty(response).context("Failed to encode response")?;
    println!("{}", json);
    Ok(())
}

/// One JSON request per input line, one JSON response per output line.
async fn serve_stdio(router: &Router, ctx: &storage::OpContext) -> Result<()> {
    tracing::info!("Serving requests on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            _ = ctx.cancellation_token().cancelled() => break,
            line = lines.next_line() => line.context("Failed to read request")?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let mut reply = router.handle_json(ctx, &line).await;
        reply.push('\n');
        stdout
            .write_all(reply.as_bytes())
            .await
            .context("Failed to write response")?;
        stdout.flush().await.context("Failed to flush stdout")?;
    }

    tracing::info!("Request stream closed");
    Ok(())
}
