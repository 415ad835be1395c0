//! Command line arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Split omnibus EPUB editions into virtual books.
#[derive(Parser, Debug)]
#[command(name = "vellum")]
#[command(author, version, about)]
pub struct Args {
    /// Configuration file (TOML, YAML or JSON); defaults to ./vellum.toml
    #[arg(short, long, global = true, env = "VELLUM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Register new and changed library files, forget removed ones
    Sync,
    /// Detect omnibus editions across the whole library
    Scan,
    /// Detect omnibus works in one book
    Process {
        /// Book id
        book: String,
    },
    /// List the virtual books of a book
    List {
        /// Book id
        book: String,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = vellum_registry::models::DEFAULT_PAGE_LIMIT)]
        limit: u32,
    },
    /// Show one virtual book and its parent
    Show {
        /// Virtual book id
        id: Uuid,
    },
    /// Write the standalone archive of a virtual book to a file
    Content {
        /// Virtual book id
        id: Uuid,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Delete the virtual books of a book, and their cached archives
    Delete {
        /// Book id
        book: String,
    },
    /// Evict idle cached archives
    Sweep,
    /// Delete every cached archive
    ClearCache,
}
