use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mnemo::{Config, Store, Verification};
use serde_json::json;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mnemo", about = "Sandboxed file store with a content index")]
struct Cli {
    /// Sandbox root directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Index database (default: <root>/atlas/index.db)
    #[arg(long)]
    index: Option<PathBuf>,

    /// Log verbosity; RUST_LOG takes precedence when set
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a file (stdin when no source is given)
    Put { path: String, source: Option<PathBuf> },
    /// Write stored content to stdout
    Get { path: String },
    /// List the immediate children of a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// List every file beneath a directory
    Tree {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Delete a file or directory
    Rm { path: String },
    /// Show status and index row as JSON
    Stat { path: String },
    /// Check stored bytes against the index
    Verify { path: String },
    /// Verify everything beneath a directory
    Audit {
        #[arg(default_value = "/")]
        path: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let mut config = Config::new(&cli.root).context("Failed to resolve sandbox root")?;
    if let Some(index) = cli.index {
        config = config.index_file(index);
    }
    info!(root = %config.root().display(), index = %config.index_path().display(), "starting");

    let store = Store::open(&config).context("Failed to open store")?;

    match cli.command {
        Command::Put { path, source } => {
            let row = match source {
                Some(source) => {
                    let file = File::open(&source)
                        .context(format!("Failed to open {}", source.display()))?;
                    store.put(&path, file)
                }
                None => store.put(&path, io::stdin().lock()),
            }
            .context(format!("Failed to store {}", path))?;
            println!("{}  {}  {}", row.hash, row.size, row.path);
        }
        Command::Get { path } => {
            let mut file = store.read(&path).context(format!("Failed to read {}", path))?;
            let mut stdout = io::stdout().lock();
            io::copy(&mut file, &mut stdout).context("Failed to write to stdout")?;
            stdout.flush()?;
        }
        Command::Ls { path } => {
            let mut names = store.list(&path).context(format!("Failed to list {}", path))?;
            names.sort();
            for name in names {
                println!("{}", name);
            }
        }
        Command::Tree { path } => {
            let mut files = store.tree(&path).context(format!("Failed to walk {}", path))?;
            files.sort();
            for file in files {
                println!("{}", file);
            }
        }
        Command::Rm { path } => {
            store.delete(&path).context(format!("Failed to delete {}", path))?;
        }
        Command::Stat { path } => {
            let status = store.stat(&path).context(format!("Failed to stat {}", path))?;
            let row = store.row(&path).ok();
            let report = json!({ "status": status, "index": row });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Verify { path } => {
            let verification = store
                .verify(&path)
                .context(format!("Failed to verify {}", path))?;
            println!("{}", serde_json::to_string_pretty(&verification)?);
            if verification != Verification::Intact {
                bail!("{} does not match its index row", path);
            }
        }
        Command::Audit { path } => {
            let findings = store.audit(&path).context(format!("Failed to audit {}", path))?;
            for (logical, verification) in &findings {
                println!("{}\t{}", logical, serde_json::to_string(verification)?);
            }
            if !findings.is_empty() {
                bail!("{} path(s) out of sync with the index", findings.len());
            }
        }
    }

    Ok(())
}
