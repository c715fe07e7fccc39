use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nir_ingest::config::DEFAULT_PARAMS_PATH;

#[derive(Parser)]
#[command(name = "nir-ingest")]
#[command(about = "Load NIR instrument exports and Dumas assay tables into a versioned store", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Parameter file (JSON).
    #[arg(short, long, global = true, default_value = DEFAULT_PARAMS_PATH)]
    pub(crate) params: PathBuf,

    /// Defaults to `run`.
    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

#[derive(Subcommand, Clone)]
pub(crate) enum Command {
    /// Parse instrument exports into the interchange JSON.
    Parse,

    /// Load the interchange JSON into the store.
    Load,

    /// Append Dumas assay tables to the store.
    Assay,

    /// Parse, load and append assays in one go.
    Run,

    /// Print every header version of a title as JSON.
    History { title: String },
}

impl Command {
    /// Stem of the report file written for this command.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Parse => "parse",
            Command::Load => "load",
            Command::Assay => "assay",
            Command::Run => "run",
            Command::History { .. } => "history",
        }
    }
}
