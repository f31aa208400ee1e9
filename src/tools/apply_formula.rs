use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::{payload_too_large, permission_denied};
use crate::range::resolve_range;
use crate::state::Kernel;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ApplyFormulaParams {
    pub path: String,
    pub sheet: String,
    pub range: String,
    pub formula: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ApplyFormulaResponse {
    pub range: String,
    pub cells_written: u64,
    pub write_version: u64,
}

/// Sets the same formula text verbatim on every cell of the resolved
/// rectangle, row-major, then persists. The codec adjusts relative
/// references per its own semantics; the formula text itself is not rewritten
/// per cell here.
pub async fn apply_formula(state: Arc<Kernel>, params: ApplyFormulaParams) -> Result<ApplyFormulaResponse> {
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

    if rect.cell_count() > max_cells {
        return Err(payload_too_large(format!(
            "range '{}' spans {} cells, exceeding the {max_cells}-cell limit",
            rect.to_text(),
            rect.cell_count()
        ))
        .into());
    }

    let sheet = params.sheet.clone();
    let formula = params.formula.clone();
    let write_version = handle
        .with_write(move |wb| {
            for row in rect.y1..=rect.y2 {
                for col in rect.x1..=rect.x2 {
                    wb.set_cell_formula(&sheet, col, row, &formula)?;
                }
            }
            wb.write_to(&canonical_path)?;
            Ok(())
        })
        .await;
    write_version?;

    Ok(ApplyFormulaResponse {
        range: rect.to_text(),
        cells_written: rect.cell_count(),
        write_version: handle.write_version(),
    })
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
        book.get_sheet_by_name_mut("Sheet1").unwrap();
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        std::mem::forget(dir);

        let config = ServerConfig {
            workspace_roots: vec![fs::canonicalize(path.parent().unwrap()).unwrap()],
            supported_extensions: vec!["xlsx".into()],
            allow_write: true,
            enabled_tools: None,
            limits: Limits { cleanup_period: Duration::from_secs(3600), ..Limits::default() },
        };
        (config, path)
    }

    #[tokio::test]
    async fn applies_formula_to_every_cell_in_range() {
        let (config, path) = fixture();
        let kernel = Kernel::new(config);

        let response = apply_formula(
            kernel.clone(),
            ApplyFormulaParams {
                path: path.to_str().unwrap().to_string(),
                sheet: "Sheet1".into(),
                range: "A1:A2".into(),
                formula: "1+1".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(response.cells_written, 2);

        let reopened = crate::workbook::Workbook::open(&path).unwrap();
        assert_eq!(reopened.cell("Sheet1", 1, 1).unwrap().unwrap().formula.as_deref(), Some("1+1"));
        assert_eq!(reopened.cell("Sheet1", 1, 2).unwrap().unwrap().formula.as_deref(), Some("1+1"));
    }

    #[tokio::test]
    async fn rejects_budget_overflow() {
        let (mut config, path) = fixture();
        config.limits.max_cells_per_op = 1;
        let kernel = Kernel::new(config);

        let err = apply_formula(
            kernel.clone(),
            ApplyFormulaParams {
                path: path.to_str().unwrap().to_string(),
                sheet: "Sheet1".into(),
                range: "A1:B2".into(),
                formula: "1+1".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("PAYLOAD_TOO_LARGE"));
    }
}
