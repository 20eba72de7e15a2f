use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "labelgraph",
    version,
    about = "Staged ingestion of hierarchical labeling documents into SQLite"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Ingest(IngestArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, default_value = ".cache/labelgraph")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub run_manifest_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = IngestStrategy::Staged)]
    pub strategy: IngestStrategy,

    #[arg(long = "skip-phase")]
    pub skip_phases: Vec<String>,

    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngestStrategy {
    PerUnit,
    NestedBatch,
    #[default]
    Staged,
}

impl IngestStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerUnit => "per-unit",
            Self::NestedBatch => "nested-batch",
            Self::Staged => "staged",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/labelgraph")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
