use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::classify_codec_error;
use crate::errors::ErrorCode;
use crate::state::Kernel;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DiscoverStructureParams {
    pub path: String,
    #[serde(default)]
    pub metadata_only: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SheetSummary {
    pub name: String,
    pub row_count: u32,
    pub column_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<String>>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DiscoverStructureResponse {
    pub sheets: Vec<SheetSummary>,
}

/// Enumerates sheets in stable index order and, unless `metadata_only`,
/// snapshots row 1 as a header row for each. No pagination: the whole
/// sheet list is returned in one call.
pub async fn discover_structure(state: Arc<Kernel>, params: DiscoverStructureParams) -> Result<DiscoverStructureResponse> {
    let handle = state.open_handle(&params.path).await?;
    let metadata_only = params.metadata_only;

    handle
        .with_read(move |wb| {
            let mut sheets = Vec::new();
            for name in wb.sheet_names() {
                let (column_count, row_count) = wb
                    .used_range(&name)
                    .map_err(|e| classify_codec_error(&e, ErrorCode::DiscoveryFailed))?;
                let headers = if metadata_only || row_count == 0 {
                    None
                } else {
                    let mut row = Vec::with_capacity(column_count as usize);
                    for col in 1..=column_count {
                        row.push(wb.cell(&name, col, 1)?.map(|c| c.value).unwrap_or_default());
                    }
                    Some(row)
                };
                sheets.push(SheetSummary { name, row_count, column_count, headers });
            }
            Ok(DiscoverStructureResponse { sheets })
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
            sheet.get_cell_mut("B1").set_value("Amount");
            sheet.get_cell_mut("A2").set_value("Widget");
            sheet.get_cell_mut("B2").set_value("3");
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
    async fn reports_dimensions_and_headers() {
        let (config, path) = fixture();
        let kernel = Kernel::new(config);

        let response = discover_structure(
            kernel.clone(),
            DiscoverStructureParams { path: path.to_str().unwrap().to_string(), metadata_only: false },
        )
        .await
        .unwrap();

        assert_eq!(response.sheets.len(), 1);
        let sheet = &response.sheets[0];
        assert_eq!(sheet.name, "Sheet1");
        assert_eq!((sheet.column_count, sheet.row_count), (2, 2));
        assert_eq!(sheet.headers.as_deref(), Some(&["Name".to_string(), "Amount".to_string()][..]));
    }

    #[tokio::test]
    async fn metadata_only_omits_headers() {
        let (config, path) = fixture();
        let kernel = Kernel::new(config);

        let response = discover_structure(
            kernel.clone(),
            DiscoverStructureParams { path: path.to_str().unwrap().to_string(), metadata_only: true },
        )
        .await
        .unwrap();

        assert!(response.sheets[0].headers.is_none());
    }
}
