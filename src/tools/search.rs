use std::sync::Arc;

use anyhow::Result;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cursor::{CURSOR_VERSION, Cursor, Unit, now_seconds, search_binding_hash};
use crate::errors::{invalid_sheet, validation};
use crate::range::column_to_letters;
use crate::state::Kernel;
use crate::tools::PageMeta;
use crate::tools::rowio::row_slice;
use crate::workbook::mtime_seconds;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    pub path: String,
    pub sheet: String,
    pub query: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub columns: Option<Vec<usize>>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub snapshot_cols: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SearchHit {
    pub cell_name: String,
    pub row: u32,
    pub column: u32,
    pub value: String,
    pub snapshot: Vec<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub meta: PageMeta,
}

/// Scans a sheet row by row for a literal or regex match, optionally
/// restricted to a 1-based column set, returning each hit's cell and a
/// snapshot of the row anchored to the sheet's leftmost populated column.
pub async fn search(state: Arc<Kernel>, params: SearchParams) -> Result<SearchResponse> {
    let limits = state.limits().clone();
    let max_results = params.max_results.unwrap_or(limits.default_preview_rows).max(1).min(limits.max_cells_per_op);
    let snapshot_cols = params.snapshot_cols.unwrap_or(10).max(1);
    let columns: Vec<usize> = params.columns.clone().unwrap_or_default();

    let handle = state.open_handle(&params.path).await?;
    let canonical_path = handle.path().to_path_buf();

    let (sheet, query, is_regex, cols, offset, page_size) = if let Some(token) = &params.cursor {
        let cursor = Cursor::decode(token)?;
        let current_mtime = mtime_seconds(&canonical_path)?;
        cursor.check_binding(Unit::Rows, &canonical_path.to_string_lossy(), current_mtime)?;
        let query = cursor.q.clone().ok_or_else(|| validation("cursor is missing its search query"))?;
        let is_regex = cursor.rg.unwrap_or(false);
        let cols = cursor.cl.clone().unwrap_or_default();
        let recomputed = search_binding_hash(&query, is_regex, &cols);
        cursor.check_query_hash(recomputed)?;
        (cursor.sheet.clone(), query, is_regex, cols, cursor.offset, cursor.page_size)
    } else {
        (params.sheet.clone(), params.query.clone(), params.regex, columns, 0u64, max_results as u64)
    };

    let matcher = if is_regex {
        Some(Regex::new(&query).map_err(|e| validation(format!("invalid regex '{query}': {e}")))?)
    } else {
        None
    };

    handle
        .with_read(move |wb| {
            if !wb.has_sheet(&sheet) {
                return Err(invalid_sheet(format!("sheet '{sheet}' does not exist")).into());
            }
            let (max_col, max_row) = wb.used_range(&sheet)?;
            let snapshot_left = wb.used_range_left_column(&sheet)?;
            let snapshot_width = (snapshot_cols as u32).min(max_col.saturating_sub(snapshot_left) + 1).max(1);

            let mut hits = Vec::new();
            let mut total_matches = 0u64;

            for row in 1..=max_row {
                for col in 1..=max_col {
                    if !cols.is_empty() && !cols.contains(&(col as usize)) {
                        continue;
                    }
                    let cell = wb.cell(&sheet, col, row)?;
                    let value = match cell {
                        Some(c) => c.value,
                        None => continue,
                    };
                    if value.is_empty() {
                        continue;
                    }
                    let is_match = match &matcher {
                        Some(re) => re.is_match(&value),
                        None => value.contains(&query),
                    };
                    if !is_match {
                        continue;
                    }
                    total_matches += 1;
                    if total_matches <= offset || hits.len() as u64 >= page_size {
                        continue;
                    }
                    let snapshot = row_slice(wb, &sheet, row, snapshot_left, snapshot_width)?;
                    hits.push(SearchHit {
                        cell_name: format!("{}{}", column_to_letters(col), row),
                        row,
                        column: col,
                        value,
                        snapshot,
                    });
                }
            }

            let returned = hits.len() as u64;
            let total = total_matches;
            let truncated = offset + returned < total;

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
                    query_hash: Some(search_binding_hash(&query, is_regex, &cols)),
                    predicate_hash: None,
                    q: Some(query.clone()),
                    rg: Some(is_regex),
                    cl: if cols.is_empty() { None } else { Some(cols.clone()) },
                    p: None,
                };
                Some(next.encode()?)
            } else {
                None
            };

            let meta = PageMeta { total, returned, truncated, next_cursor };
            Ok(SearchResponse { hits, meta })
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::limits::Limits;
    use std::fs;
    use std::time::Duration;

    fn fixture() -> (ServerConfig, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        let mut book = umya_spreadsheet::new_file();
        {
            let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
            sheet.get_cell_mut("A1").set_value("Name");
            sheet.get_cell_mut("B1").set_value("Status");
            sheet.get_cell_mut("A2").set_value("Widget");
            sheet.get_cell_mut("B2").set_value("open");
            sheet.get_cell_mut("A3").set_value("Gadget");
            sheet.get_cell_mut("B3").set_value("open");
            sheet.get_cell_mut("A4").set_value("Gizmo");
            sheet.get_cell_mut("B4").set_value("closed");
        }
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        std::mem::forget(dir);

        let config = ServerConfig {
            workspace_roots: vec![fs::canonicalize(path.parent().unwrap()).unwrap()],
            supported_extensions: vec!["xlsx".into()],
            allow_write: false,
            enabled_tools: None,
            limits: Limits { cleanup_period: Duration::from_secs(3600), ..Limits::default() },
        };
        (config, path)
    }

    #[tokio::test]
    async fn literal_search_finds_matching_cells() {
        let (config, path) = fixture();
        let kernel = Kernel::new(config);

        let response = search(
            kernel.clone(),
            SearchParams {
                path: path.to_str().unwrap().to_string(),
                sheet: "Sheet1".into(),
                query: "open".into(),
                regex: false,
                columns: None,
                max_results: None,
                snapshot_cols: None,
                cursor: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(response.hits.len(), 2);
        assert_eq!(response.hits[0].cell_name, "B2");
        assert_eq!(response.hits[0].snapshot, vec!["Widget".to_string(), "open".to_string()]);
    }

    #[tokio::test]
    async fn column_restriction_limits_scan() {
        let (config, path) = fixture();
        let kernel = Kernel::new(config);

        let response = search(
            kernel.clone(),
            SearchParams {
                path: path.to_str().unwrap().to_string(),
                sheet: "Sheet1".into(),
                query: "Gadget".into(),
                regex: false,
                columns: Some(vec![2]),
                max_results: None,
                snapshot_cols: None,
                cursor: None,
            },
        )
        .await
        .unwrap();

        assert!(response.hits.is_empty());
    }

    #[tokio::test]
    async fn total_counts_every_match_not_just_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digits.xlsx");
        let mut book = umya_spreadsheet::new_file();
        {
            let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
            for row in 1..=5u32 {
                for col in 1..=2u32 {
                    sheet.get_cell_mut((col, row)).set_value(format!("{col}{row}"));
                }
            }
        }
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        std::mem::forget(dir);

        let config = ServerConfig {
            workspace_roots: vec![fs::canonicalize(path.parent().unwrap()).unwrap()],
            supported_extensions: vec!["xlsx".into()],
            allow_write: false,
            enabled_tools: None,
            limits: Limits { cleanup_period: Duration::from_secs(3600), ..Limits::default() },
        };
        let kernel = Kernel::new(config);

        let response = search(
            kernel.clone(),
            SearchParams {
                path: path.to_str().unwrap().to_string(),
                sheet: "Sheet1".into(),
                query: "[0-9]".into(),
                regex: true,
                columns: None,
                max_results: Some(3),
                snapshot_cols: None,
                cursor: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(response.hits.len(), 3);
        assert_eq!(response.meta.returned, 3);
        assert_eq!(response.meta.total, 10);
        assert!(response.meta.truncated);
    }
}
