pub mod commands;
pub mod errors;
pub mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(name = "sheetkernel-cli", version, about = "Excel workbook command line interface")]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    pub format: OutputFormat,

    #[arg(long, global = true)]
    pub compact: bool,

    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List sheets and their dimensions, with an optional header-row snapshot.
    DiscoverStructure {
        file: PathBuf,
        #[arg(long)]
        metadata_only: bool,
    },
    /// Snapshot the first rows of a sheet.
    PreviewSheet {
        file: PathBuf,
        sheet: String,
        #[arg(long)]
        rows: Option<usize>,
        #[arg(long)]
        csv: bool,
    },
    /// Read a rectangular range of cell values.
    ReadRange { file: PathBuf, sheet: String, range: String },
    /// Scan a sheet for a literal or regular-expression match.
    Search {
        file: PathBuf,
        sheet: String,
        query: String,
        #[arg(long)]
        regex: bool,
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<usize>>,
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Scan a sheet for rows matching a boolean predicate over `$N` column refs.
    Filter {
        file: PathBuf,
        sheet: String,
        predicate: String,
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<usize>>,
        #[arg(long)]
        max_rows: Option<usize>,
    },
    /// Write a rectangular block of string values and persist to disk.
    WriteRange {
        file: PathBuf,
        sheet: String,
        range: String,
        #[arg(long, help = "JSON array of arrays of strings, e.g. '[[\"a\",\"b\"]]'")]
        values_json: String,
    },
    /// Set the same formula text on every cell of a range and persist to disk.
    ApplyFormula { file: PathBuf, sheet: String, range: String, formula: String },
    /// Compute per-column count/sum/average/min/max, optionally grouped.
    ComputeStatistics {
        file: PathBuf,
        sheet: String,
        range: String,
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<usize>>,
        #[arg(long)]
        group_by_index: Option<usize>,
    },
    /// Close the handle opened for a file.
    CloseWorkbook { file: PathBuf },
}

pub async fn run_command(command: Commands) -> Result<Value> {
    match command {
        Commands::DiscoverStructure { file, metadata_only } => commands::read::discover_structure(file, metadata_only).await,
        Commands::PreviewSheet { file, sheet, rows, csv } => commands::read::preview_sheet(file, sheet, rows, csv).await,
        Commands::ReadRange { file, sheet, range } => commands::read::read_range(file, sheet, range).await,
        Commands::Search { file, sheet, query, regex, columns, max_results } => {
            commands::read::search(file, sheet, query, regex, columns, max_results).await
        }
        Commands::Filter { file, sheet, predicate, columns, max_rows } => {
            commands::read::filter(file, sheet, predicate, columns, max_rows).await
        }
        Commands::WriteRange { file, sheet, range, values_json } => {
            commands::write::write_range(file, sheet, range, values_json).await
        }
        Commands::ApplyFormula { file, sheet, range, formula } => commands::write::apply_formula(file, sheet, range, formula).await,
        Commands::ComputeStatistics { file, sheet, range, columns, group_by_index } => {
            commands::read::compute_statistics(file, sheet, range, columns, group_by_index).await
        }
        Commands::CloseWorkbook { file } => commands::write::close_workbook(file).await,
    }
}
