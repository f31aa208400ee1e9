use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cursor::{CURSOR_VERSION, Cursor, Unit, filter_binding_hash, now_seconds};
use crate::errors::{invalid_sheet, validation};
use crate::predicate::CompiledPredicate;
use crate::range::column_to_letters;
use crate::state::Kernel;
use crate::tools::PageMeta;
use crate::tools::rowio::row_slice;
use crate::workbook::mtime_seconds;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FilterParams {
    pub path: String,
    pub sheet: String,
    pub predicate: String,
    #[serde(default)]
    pub columns: Option<Vec<usize>>,
    #[serde(default)]
    pub max_rows: Option<usize>,
    #[serde(default)]
    pub snapshot_cols: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FilterHit {
    pub row: u32,
    pub snapshot: Vec<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FilterResponse {
    pub hits: Vec<FilterHit>,
    pub meta: PageMeta,
}

/// Streams rows within a sheet's used range, evaluating a compiled boolean
/// predicate (`$N` 1-based column refs) against each, and pages matches.
pub async fn filter(state: Arc<Kernel>, params: FilterParams) -> Result<FilterResponse> {
    let limits = state.limits().clone();
    let max_rows = params.max_rows.unwrap_or(limits.default_preview_rows).max(1).min(limits.max_cells_per_op);
    let snapshot_cols = params.snapshot_cols.unwrap_or(10).max(1);
    let columns: Vec<usize> = params.columns.clone().unwrap_or_default();

    let handle = state.open_handle(&params.path).await?;
    let canonical_path = handle.path().to_path_buf();

    let (sheet, predicate_src, cols, offset, page_size) = if let Some(token) = &params.cursor {
        let cursor = Cursor::decode(token)?;
        let current_mtime = mtime_seconds(&canonical_path)?;
        cursor.check_binding(Unit::Rows, &canonical_path.to_string_lossy(), current_mtime)?;
        let predicate_src = cursor.p.clone().ok_or_else(|| validation("cursor is missing its predicate"))?;
        let cols = cursor.cl.clone().unwrap_or_default();
        let recomputed = filter_binding_hash(&predicate_src, &cols);
        cursor.check_predicate_hash(recomputed)?;
        (cursor.sheet.clone(), predicate_src, cols, cursor.offset, cursor.page_size)
    } else {
        (params.sheet.clone(), params.predicate.clone(), columns, 0u64, max_rows as u64)
    };

    let compiled = CompiledPredicate::compile(&predicate_src)?;

    handle
        .with_read(move |wb| {
            if !wb.has_sheet(&sheet) {
                return Err(invalid_sheet(format!("sheet '{sheet}' does not exist")).into());
            }
            let (max_col, max_row) = wb.used_range(&sheet)?;
            let snapshot_left = wb.used_range_left_column(&sheet)?;
            let snapshot_width = (snapshot_cols as u32).min(max_col.saturating_sub(snapshot_left) + 1).max(1);

            let mut hits = Vec::new();
            let mut matched_before_offset = 0u64;
            let mut scanned_row = 0u64;

            for row in 1..=max_row {
                let full_row = row_slice(wb, &sheet, row, 1, max_col)?;
                if !compiled.eval(&full_row) {
                    continue;
                }
                if matched_before_offset < offset {
                    matched_before_offset += 1;
                    continue;
                }
                let snapshot = row_slice(wb, &sheet, row, snapshot_left, snapshot_width)?;
                hits.push(FilterHit { row, snapshot });
                if hits.len() as u64 >= page_size {
                    scanned_row = row as u64;
                    break;
                }
            }

            let returned = hits.len() as u64;
            let total = offset + returned;
            let truncated = returned >= page_size && scanned_row < max_row as u64;

            let next_cursor = if truncated {
                let next = Cursor {
                    v: CURSOR_VERSION,
                    path: canonical_path.to_string_lossy().to_string(),
                    sheet: sheet.clone(),
                    range: format!("A1:{}{}", column_to_letters(max_col.max(1)), max_row.max(1)),
                    unit: Unit::Rows,
                    offset: offset + returned,
                    page_size,
                    mtime: mtime_seconds(&canonical_path)?,
                    issued_at: now_seconds(),
                    query_hash: None,
                    predicate_hash: Some(filter_binding_hash(&predicate_src, &cols)),
                    q: None,
                    rg: None,
                    cl: if cols.is_empty() { None } else { Some(cols.clone()) },
                    p: Some(predicate_src.clone()),
                };
                Some(next.encode()?)
            } else {
                None
            };

            let meta = PageMeta { total, returned, truncated, next_cursor };
            Ok(FilterResponse { hits, meta })
        })
        .await
}
