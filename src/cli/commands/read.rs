use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;

use crate::runtime::stateless::StatelessRuntime;
use crate::tools;
use crate::tools::compute_statistics::ComputeStatisticsParams;
use crate::tools::discover::DiscoverStructureParams;
use crate::tools::filter::FilterParams;
use crate::tools::preview::{Encoding, PreviewSheetParams};
use crate::tools::read_range::ReadRangeParams;
use crate::tools::search::SearchParams;

pub async fn discover_structure(file: PathBuf, metadata_only: bool) -> Result<Value> {
    let runtime = StatelessRuntime;
    let (kernel, path) = runtime.open_kernel_for_file(&file, false)?;
    let response = tools::discover::discover_structure(kernel, DiscoverStructureParams { path, metadata_only }).await?;
    Ok(serde_json::to_value(response)?)
}

pub async fn preview_sheet(file: PathBuf, sheet: String, rows: Option<usize>, csv: bool) -> Result<Value> {
    let runtime = StatelessRuntime;
    let (kernel, path) = runtime.open_kernel_for_file(&file, false)?;
    let encoding = if csv { Some(Encoding::Csv) } else { None };
    let response = tools::preview::preview_sheet(kernel, PreviewSheetParams { path, sheet, rows, encoding, cursor: None }).await?;
    Ok(serde_json::to_value(response)?)
}

pub async fn read_range(file: PathBuf, sheet: String, range: String) -> Result<Value> {
    let runtime = StatelessRuntime;
    let (kernel, path) = runtime.open_kernel_for_file(&file, false)?;
    let response =
        tools::read_range::read_range(kernel, ReadRangeParams { path, sheet, range, max_cells: None, cursor: None }).await?;
    Ok(serde_json::to_value(response)?)
}

pub async fn search(
    file: PathBuf,
    sheet: String,
    query: String,
    regex: bool,
    columns: Option<Vec<usize>>,
    max_results: Option<usize>,
) -> Result<Value> {
    let runtime = StatelessRuntime;
    let (kernel, path) = runtime.open_kernel_for_file(&file, false)?;
    let response = tools::search::search(
        kernel,
        SearchParams { path, sheet, query, regex, columns, max_results, snapshot_cols: None, cursor: None },
    )
    .await?;
    Ok(serde_json::to_value(response)?)
}

pub async fn filter(
    file: PathBuf,
    sheet: String,
    predicate: String,
    columns: Option<Vec<usize>>,
    max_rows: Option<usize>,
) -> Result<Value> {
    let runtime = StatelessRuntime;
    let (kernel, path) = runtime.open_kernel_for_file(&file, false)?;
    let response = tools::filter::filter(
        kernel,
        FilterParams { path, sheet, predicate, columns, max_rows, snapshot_cols: None, cursor: None },
    )
    .await?;
    Ok(serde_json::to_value(response)?)
}

pub async fn compute_statistics(
    file: PathBuf,
    sheet: String,
    range: String,
    columns: Option<Vec<usize>>,
    group_by_index: Option<usize>,
) -> Result<Value> {
    let runtime = StatelessRuntime;
    let (kernel, path) = runtime.open_kernel_for_file(&file, false)?;
    let response = tools::compute_statistics::compute_statistics(
        kernel,
        ComputeStatisticsParams { path, sheet, range, columns, group_by_index, max_cells: None },
    )
    .await?;
    Ok(serde_json::to_value(response)?)
}
