use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cursor::{CURSOR_VERSION, Cursor, Unit, now_seconds};
use crate::errors::invalid_sheet;
use crate::range::column_to_letters;
use crate::state::Kernel;
use crate::tools::PageMeta;
use crate::tools::rowio::{csv_line, row_slice};
use crate::workbook::mtime_seconds;

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    Csv,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PreviewSheetParams {
    pub path: String,
    pub sheet: String,
    #[serde(default)]
    pub rows: Option<usize>,
    #[serde(default)]
    pub encoding: Option<Encoding>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Rendered as a nested array for `json`, or a single newline-joined string
/// for `csv`; `#[serde(untagged)]` means the wire shape follows `encoding`
/// without a variant tag.
#[derive(Debug, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PreviewBody {
    Json(Vec<Vec<String>>),
    Csv(String),
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PreviewSheetResponse {
    pub encoding: String,
    pub rows: PreviewBody,
    pub meta: PageMeta,
}

/// Snapshots the first `rows` rows (default `default_preview_rows`) of a
/// sheet starting at column A, paginating by row via an opaque cursor once
/// the sheet runs longer than one page.
pub async fn preview_sheet(state: Arc<Kernel>, params: PreviewSheetParams) -> Result<PreviewSheetResponse> {
    let limits = state.limits();
    let requested_rows = params.rows.unwrap_or(limits.default_preview_rows).max(1).min(limits.max_cells_per_op);
    let encoding = params.encoding.unwrap_or(Encoding::Json);

    let handle = state.open_handle(&params.path).await?;
    let canonical_path = handle.path().to_path_buf();

    let (sheet, offset, page_size) = if let Some(token) = &params.cursor {
        let cursor = Cursor::decode(token)?;
        let current_mtime = mtime_seconds(&canonical_path)?;
        cursor.check_binding(Unit::Rows, &canonical_path.to_string_lossy(), current_mtime)?;
        (cursor.sheet, cursor.offset, cursor.page_size.min(requested_rows as u64))
    } else {
        (params.sheet, 0u64, requested_rows as u64)
    };

    handle
        .with_read(move |wb| {
            if !wb.has_sheet(&sheet) {
                return Err(invalid_sheet(format!("sheet '{sheet}' does not exist")).into());
            }
            let (max_col, max_row) = wb.used_range(&sheet)?;
            let total = max_row as u64;

            let mut rows = Vec::new();
            let mut row = offset + 1;
            while (rows.len() as u64) < page_size && row <= total {
                rows.push(row_slice(wb, &sheet, row as u32, 1, max_col)?);
                row += 1;
            }
            let returned = rows.len() as u64;
            let truncated = offset + returned < total;

            let next_cursor = if truncated {
                let range_text = format!("A1:{}{}", column_to_letters(max_col.max(1)), max_row.max(1));
                let next = Cursor {
                    v: CURSOR_VERSION,
                    path: canonical_path.to_string_lossy().to_string(),
                    sheet: sheet.clone(),
                    range: range_text,
                    unit: Unit::Rows,
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
            let (encoding_name, body) = match encoding {
                Encoding::Json => ("json", PreviewBody::Json(rows)),
                Encoding::Csv => {
                    let text = rows.iter().map(|r| csv_line(r)).collect::<Vec<_>>().join("\n");
                    ("csv", PreviewBody::Csv(text))
                }
            };

            Ok(PreviewSheetResponse { encoding: encoding_name.to_string(), rows: body, meta })
        })
        .await
}
