use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cursor::{CURSOR_VERSION, Cursor, Unit, now_seconds};
use crate::range::{Rect, resolve_range};
use crate::state::Kernel;
use crate::tools::PageMeta;
use crate::tools::rowio::row_slice;
use crate::workbook::mtime_seconds;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadRangeParams {
    pub path: String,
    pub sheet: String,
    pub range: String,
    #[serde(default)]
    pub max_cells: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReadRangeResponse {
    pub range: String,
    pub values: Vec<Vec<String>>,
    pub meta: PageMeta,
}

/// Reads the resolved rectangle row-major, paginating by cell count once the
/// rectangle exceeds `max_cells_per_op`. Resume position is `(row, col)`
/// derived from `offset` against the rectangle's fixed width.
pub async fn read_range(state: Arc<Kernel>, params: ReadRangeParams) -> Result<ReadRangeResponse> {
    let server_max_cells = state.limits().max_cells_per_op;
    let max_cells = params.max_cells.unwrap_or(server_max_cells).max(1).min(server_max_cells) as u64;
    let handle = state.open_handle(&params.path).await?;
    let canonical_path = handle.path().to_path_buf();

    let (sheet, rect, offset, page_size) = if let Some(token) = &params.cursor {
        let cursor = Cursor::decode(token)?;
        let current_mtime = mtime_seconds(&canonical_path)?;
        cursor.check_binding(Unit::Cells, &canonical_path.to_string_lossy(), current_mtime)?;
        let sheet = cursor.sheet.clone();
        let rect = parse_bound_range(&cursor.range)?;
        (sheet, rect, cursor.offset, cursor.page_size)
    } else {
        let sheet = params.sheet.clone();
        let range_input = params.range.clone();
        let rect = handle
            .with_read(move |wb| resolve_range(&range_input, &sheet, |name| wb.defined_name(name)))
            .await?;
        (params.sheet.clone(), rect, 0u64, max_cells)
    };

    handle
        .with_read(move |wb| {
            if !wb.has_sheet(&sheet) {
                return Err(crate::errors::invalid_sheet(format!("sheet '{sheet}' does not exist")).into());
            }
            let width = rect.width();
            let total = rect.cell_count();
            let mut rows: Vec<Vec<String>> = Vec::new();
            let mut cursor_cell = offset;

            while cursor_cell - offset < page_size && cursor_cell < total {
                let row_in_rect = cursor_cell / width;
                let col_in_rect = cursor_cell % width;
                let row = rect.y1 + row_in_rect as u32;
                let start_col = rect.x1 + col_in_rect as u32;
                let remaining_in_row = width - col_in_rect;
                let take = remaining_in_row.min(page_size - (cursor_cell - offset)).min(total - cursor_cell);

                let slice = row_slice(wb, &sheet, row, start_col, take as u32)?;
                if col_in_rect == 0 {
                    rows.push(slice);
                } else {
                    rows.last_mut().expect("continuation cell implies a started row").extend(slice);
                }
                cursor_cell += take;
            }

            let returned = cursor_cell - offset;
            let truncated = offset + returned < total;

            let next_cursor = if truncated {
                let next = Cursor {
                    v: CURSOR_VERSION,
                    path: canonical_path.to_string_lossy().to_string(),
                    sheet: sheet.clone(),
                    range: rect.to_text(),
                    unit: Unit::Cells,
                    offset: offset + returned,
                    page_size,
                    mtime: mtime_seconds(&canonical_path)?,
                    issued_at: now_seconds(),
                    query_hash: None,
                    predicate_hash: None,
                    q: None,
                    rg: None,
                    cl: None,
                    p: None,
                };
                Some(next.encode()?)
            } else {
                None
            };

            let meta = PageMeta { total, returned, truncated, next_cursor };
            Ok(ReadRangeResponse { range: rect.to_text(), values: rows, meta })
        })
        .await
}

fn parse_bound_range(range_text: &str) -> Result<Rect> {
    let (start, end) = range_text
        .split_once(':')
        .ok_or_else(|| crate::errors::cursor_invalid("cursor range is not a bound rectangle"))?;
    let start = parse_cell_ref(start)?;
    let end = parse_cell_ref(end)?;
    Ok(Rect { x1: start.0, y1: start.1, x2: end.0, y2: end.1 })
}

fn parse_cell_ref(text: &str) -> Result<(u32, u32)> {
    let reference = formualizer_parse::parser::ReferenceType::from_string(text)
        .map_err(|e| crate::errors::cursor_invalid(format!("cursor range cell '{text}' is unparseable: {e}")))?;
    match reference {
        formualizer_parse::parser::ReferenceType::Cell { row, col, .. } => Ok((col, row)),
        _ => Err(crate::errors::cursor_invalid(format!("cursor range cell '{text}' is not a single cell")).into()),
    }
}
