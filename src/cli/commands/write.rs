use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::runtime::stateless::StatelessRuntime;
use crate::tools;
use crate::tools::apply_formula::ApplyFormulaParams;
use crate::tools::close::CloseWorkbookParams;
use crate::tools::write_range::WriteRangeParams;

pub async fn write_range(file: PathBuf, sheet: String, range: String, values_json: String) -> Result<Value> {
    let values: Vec<Vec<String>> =
        serde_json::from_str(&values_json).context("--values-json must be a JSON array of arrays of strings")?;
    let runtime = StatelessRuntime;
    let (kernel, path) = runtime.open_kernel_for_file(&file, true)?;
    let response = tools::write_range::write_range(kernel, WriteRangeParams { path, sheet, range, values }).await?;
    Ok(serde_json::to_value(response)?)
}

pub async fn apply_formula(file: PathBuf, sheet: String, range: String, formula: String) -> Result<Value> {
    let runtime = StatelessRuntime;
    let (kernel, path) = runtime.open_kernel_for_file(&file, true)?;
    let response = tools::apply_formula::apply_formula(kernel, ApplyFormulaParams { path, sheet, range, formula }).await?;
    Ok(serde_json::to_value(response)?)
}

pub async fn close_workbook(file: PathBuf) -> Result<Value> {
    let runtime = StatelessRuntime;
    let (kernel, path) = runtime.open_kernel_for_file(&file, false)?;
    kernel.open_handle(&path).await?;
    let response = tools::close::close_workbook(kernel, CloseWorkbookParams { handle_id: None, path: Some(path) }).await?;
    Ok(serde_json::to_value(response)?)
}
