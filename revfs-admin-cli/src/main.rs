//! RevFS Administration CLI
//!
//! Read-only inspection of a revision store.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use revfs_core::{FsFs, NodeRevId, NodeRevision, Revnum, TracingObserver};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "revfs-admin")]
#[command(author = "RevFS Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Inspect the revisions, nodes and contents of a revision store")]
struct Cli {
    /// Store directory
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log every item read from disk or cache (needs trace level)
    #[arg(long)]
    trace_access: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the root node-revision ID of a revision
    Root { rev: Revnum },

    /// Print a node-revision
    Noderev { id: String },

    /// Write the contents of a file node to stdout
    Cat { id: String },

    /// List the entries of a directory node
    Ls { id: String },

    /// List the properties of a node
    Props { id: String },

    /// List the paths changed in a revision
    Changes { rev: Revnum },

    /// Print the delta chain length of a node's data representation
    ChainLength { id: String },
}

fn init_logging(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

fn node(fs: &FsFs, id: &str) -> Result<NodeRevision> {
    let id = NodeRevId::parse(id).with_context(|| format!("Invalid node-revision ID '{}'", id))?;
    fs.get_node_revision(&id)
        .with_context(|| format!("Failed to read node-revision {}", id))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut fs = FsFs::open(&cli.repo)
        .with_context(|| format!("Failed to open revision store at {}", cli.repo.display()))?;
    if cli.trace_access {
        fs = fs.with_observer(Arc::new(TracingObserver));
    }
    debug!(youngest = fs.youngest_rev(), format = fs.format(), "store opened");

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Root { rev } => {
            writeln!(out, "{}", fs.rev_get_root(rev)?)?;
        }

        Commands::Noderev { id } => {
            write!(out, "{}", node(&fs, &id)?.unparse())?;
        }

        Commands::Cat { id } => {
            let noderev = node(&fs, &id)?;
            let mut contents = fs.get_file_contents(&noderev)?;
            io::copy(&mut contents, &mut out).context("Failed to read file contents")?;
        }

        Commands::Ls { id } => {
            let noderev = node(&fs, &id)?;
            for entry in fs.get_dir_entries(&noderev)?.values() {
                writeln!(out, "{:<4} {:<24} {}", entry.kind, entry.id, entry.name)?;
            }
        }

        Commands::Props { id } => {
            let noderev = node(&fs, &id)?;
            for (name, value) in fs.get_proplist(&noderev)?.iter() {
                writeln!(out, "{}: {}", name, String::from_utf8_lossy(value))?;
            }
        }

        Commands::Changes { rev } => {
            for change in fs.get_changes(rev)?.iter() {
                let kind = change.node_kind.map(|k| k.to_string()).unwrap_or_default();
                write!(out, "{:<8} {:<4} {}", change.kind, kind, change.path)?;
                if let Some((rev, path)) = &change.copyfrom {
                    write!(out, " (from {}@{})", path, rev)?;
                }
                writeln!(out)?;
            }
        }

        Commands::ChainLength { id } => {
            let noderev = node(&fs, &id)?;
            let Some(rep) = &noderev.data_rep else {
                bail!("Node {} has no data representation", noderev.id);
            };
            writeln!(out, "{}", fs.rep_chain_length(rep)?)?;
        }
    }

    Ok(())
}
