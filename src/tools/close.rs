use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::validation;
use crate::state::Kernel;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CloseWorkbookParams {
    #[serde(default)]
    pub handle_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CloseWorkbookResponse {
    pub closed: bool,
}

/// Closes a handle by id or by path (path-first: a path resolving to a
/// currently-open handle is closed the same as if the id had been given).
/// A missing handle on either lookup surfaces `INVALID_HANDLE`.
pub async fn close_workbook(state: Arc<Kernel>, params: CloseWorkbookParams) -> Result<CloseWorkbookResponse> {
    match (params.handle_id, params.path) {
        (Some(id), _) => {
            state.close_by_id(&id)?;
            Ok(CloseWorkbookResponse { closed: true })
        }
        (None, Some(path)) => {
            state.close_by_path(&path)?;
            Ok(CloseWorkbookResponse { closed: true })
        }
        (None, None) => Err(validation("either handle_id or path must be supplied").into()),
    }
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
        let book = umya_spreadsheet::new_file();
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
    async fn closes_by_handle_id() {
        let (config, path) = fixture();
        let kernel = Kernel::new(config);
        let handle = kernel.open_handle(path.to_str().unwrap()).await.unwrap();
        let id = handle.id().to_string();
        drop(handle);

        let response = close_workbook(kernel.clone(), CloseWorkbookParams { handle_id: Some(id.clone()), path: None }).await.unwrap();
        assert!(response.closed);
        assert!(kernel.get_handle(&id).is_err());
    }

    #[tokio::test]
    async fn closes_by_path() {
        let (config, path) = fixture();
        let kernel = Kernel::new(config);
        let path_str = path.to_str().unwrap().to_string();
        let handle = kernel.open_handle(&path_str).await.unwrap();
        let id = handle.id().to_string();
        drop(handle);

        let response = close_workbook(kernel.clone(), CloseWorkbookParams { handle_id: None, path: Some(path_str) }).await.unwrap();
        assert!(response.closed);
        assert!(kernel.get_handle(&id).is_err());
    }

    #[tokio::test]
    async fn missing_handle_is_invalid_handle() {
        let (config, _path) = fixture();
        let kernel = Kernel::new(config);

        let err = close_workbook(kernel.clone(), CloseWorkbookParams { handle_id: Some("nope".into()), path: None }).await.unwrap_err();
        assert!(err.to_string().contains("INVALID_HANDLE"));
    }

    #[tokio::test]
    async fn missing_both_inputs_is_validation_error() {
        let (config, _path) = fixture();
        let kernel = Kernel::new(config);

        let err = close_workbook(kernel.clone(), CloseWorkbookParams { handle_id: None, path: None }).await.unwrap_err();
        assert!(err.to_string().contains("VALIDATION"));
    }
}
