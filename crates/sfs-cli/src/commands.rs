use clap::{Parser, Subcommand, ValueEnum};
use sfs_core::ConflictPolicy;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sfs")]
#[command(about = "A catalog of symlinks into offline collections", long_about = None)]
pub struct Cli {
    /// Catalog to operate on (default: the one containing the working directory)
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Skip confirmation prompts
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize a catalog in an empty directory
    Init {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Register a collection and link its files into the catalog
    AddCol {
        path: PathBuf,
        /// Collection name (default: the directory name)
        #[arg(long)]
        name: Option<String>,
    },
    /// List registered collections
    ListCols,
    /// Bring a collection's links in line with its source
    SyncCol { name: String },
    /// Unregister a collection and remove its links
    DelCol { name: String },
    /// Remove links without metadata or pointing outside every collection
    DelOrphans,
    /// Find duplicate files by name and size and write a report
    FindDups {
        /// Directory to examine (default: working directory)
        dir: Option<PathBuf>,
        /// Replace a pending report
        #[arg(long = "override")]
        override_existing: bool,
        /// Mark every duplicate but the first for deletion
        #[arg(long)]
        del_duplicates: bool,
    },
    /// Delete the entries marked in a duplicate report
    Dedup {
        dir: Option<PathBuf>,
        /// Remove the report once it has been applied
        #[arg(long)]
        del_json: bool,
    },
    /// Merge the source directory into the target directory
    Merge {
        target: PathBuf,
        source: PathBuf,
        /// Resolve conflicts now using --on-conflict
        #[arg(long = "continue")]
        continue_merge: bool,
        #[arg(long, value_enum, default_value_t = OnConflict::KeepTarget)]
        on_conflict: OnConflict,
        /// Resume from the edited conflict manifest in the target directory
        #[arg(long)]
        json: bool,
        /// Replace a pending conflict manifest
        #[arg(long = "override")]
        override_existing: bool,
        /// Remove the manifest once every conflict is resolved
        #[arg(long)]
        del_json: bool,
        /// Remove the source directory once it is fully merged
        #[arg(long)]
        del_source: bool,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnConflict {
    KeepTarget,
    KeepSource,
    KeepBoth,
}

impl From<OnConflict> for ConflictPolicy {
    fn from(value: OnConflict) -> Self {
        match value {
            OnConflict::KeepTarget => ConflictPolicy::KeepTarget,
            OnConflict::KeepSource => ConflictPolicy::KeepSource,
            OnConflict::KeepBoth => ConflictPolicy::KeepBoth,
        }
    }
}
