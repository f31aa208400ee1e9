use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::{payload_too_large, permission_denied, validation};
use crate::range::resolve_range;
use crate::state::Kernel;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteRangeParams {
    pub path: String,
    pub sheet: String,
    pub range: String,
    pub values: Vec<Vec<String>>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct WriteRangeResponse {
    pub range: String,
    pub cells_written: u64,
    pub write_version: u64,
}

/// Writes a rectangular block of string values starting at the resolved
/// range's top-left cell, then persists the workbook to disk.
pub async fn write_range(state: Arc<Kernel>, params: WriteRangeParams) -> Result<WriteRangeResponse> {
    if !state.allow_write() {
        return Err(permission_denied("write tools are disabled for this server").into());
    }
    let max_cells = state.limits().max_cells_per_op as u64;

    let handle = state.open_handle(&params.path).await?;
    let canonical_path = handle.path().to_path_buf();
    let sheet = params.sheet.clone();
    let range_input = params.range.clone();
    let rect = handle
        .with_read(move |wb| resolve_range(&range_input, &sheet, |name| wb.defined_name(name)))
        .await?;

    let height = params.values.len() as u64;
    if height != rect.height() {
        return Err(validation(format!(
            "values has {height} rows but the resolved range '{}' has {}",
            rect.to_text(),
            rect.height()
        ))
        .into());
    }
    for (i, row) in params.values.iter().enumerate() {
        if row.len() as u64 != rect.width() {
            return Err(validation(format!(
                "values row {i} has {} columns but the resolved range has {}",
                row.len(),
                rect.width()
            ))
            .into());
        }
    }
    if rect.cell_count() > max_cells {
        return Err(payload_too_large(format!(
            "range '{}' spans {} cells, exceeding the {max_cells}-cell limit",
            rect.to_text(),
            rect.cell_count()
        ))
        .into());
    }

    let sheet = params.sheet.clone();
    let values = params.values;
    let write_version = handle
        .with_write(move |wb| {
            for (row_offset, row) in values.iter().enumerate() {
                for (col_offset, value) in row.iter().enumerate() {
                    wb.set_cell_value(&sheet, rect.x1 + col_offset as u32, rect.y1 + row_offset as u32, value)?;
                }
            }
            wb.write_to(&canonical_path)?;
            Ok(())
        })
        .await;
    write_version?;

    Ok(WriteRangeResponse {
        range: rect.to_text(),
        cells_written: rect.cell_count(),
        write_version: handle.write_version(),
    })
}
