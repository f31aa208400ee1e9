use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::{invalid_sheet, limit_exceeded, validation};
use crate::range::resolve_range;
use crate::state::Kernel;
use crate::tools::rowio::row_slice;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ComputeStatisticsParams {
    pub path: String,
    pub sheet: String,
    pub range: String,
    #[serde(default)]
    pub columns: Option<Vec<usize>>,
    #[serde(default)]
    pub group_by_index: Option<usize>,
    #[serde(default)]
    pub max_cells: Option<usize>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ColumnStats {
    pub count: u64,
    pub distinct_count: u64,
    pub sum: f64,
    pub average: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
    distinct: std::collections::HashSet<String>,
}

impl Accumulator {
    fn observe(&mut self, raw: &str) {
        self.distinct.insert(raw.to_string());
        if let Ok(n) = raw.trim().parse::<f64>() {
            self.count += 1;
            self.sum += n;
            self.min = Some(self.min.map_or(n, |m| m.min(n)));
            self.max = Some(self.max.map_or(n, |m| m.max(n)));
        }
    }

    fn finish(&self) -> ColumnStats {
        ColumnStats {
            count: self.count,
            distinct_count: self.distinct.len() as u64,
            sum: self.sum,
            average: if self.count > 0 { self.sum / self.count as f64 } else { 0.0 },
            min: self.min,
            max: self.max,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ComputeStatisticsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<HashMap<usize, ColumnStats>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<HashMap<String, HashMap<usize, ColumnStats>>>,
    pub processed_cells: u64,
    pub truncated: bool,
}

/// Streams the resolved rectangle's rows, maintaining per-column running
/// statistics (optionally bucketed by a group-by column), with a group-count
/// budget derived from `max_cells`.
pub async fn compute_statistics(state: Arc<Kernel>, params: ComputeStatisticsParams) -> Result<ComputeStatisticsResponse> {
    let max_cells = params.max_cells.unwrap_or(state.limits().max_cells_per_op).min(state.limits().max_cells_per_op) as u64;

    let handle = state.open_handle(&params.path).await?;
    let sheet = params.sheet.clone();
    let range_input = params.range.clone();
    let rect = handle
        .with_read(move |wb| resolve_range(&range_input, &sheet, |name| wb.defined_name(name)))
        .await?;

    let width = rect.width() as usize;
    let selected: Vec<usize> = params.columns.clone().unwrap_or_else(|| (1..=width).collect());
    for &col in &selected {
        if col == 0 || col > width {
            return Err(validation(format!("column {col} is out of range for a {width}-wide range")).into());
        }
    }
    let group_by_index = params.group_by_index.filter(|&i| i != 0);
    if let Some(idx) = group_by_index
        && (idx == 0 || idx > width)
    {
        return Err(validation(format!("group_by_index {idx} is out of range for a {width}-wide range")).into());
    }

    let max_groups = (max_cells / (selected.len() as u64 + 1)).max(1);
    let sheet = params.sheet.clone();

    handle
        .with_read(move |wb| {
            if !wb.has_sheet(&sheet) {
                return Err(invalid_sheet(format!("sheet '{sheet}' does not exist")).into());
            }

            let mut ungrouped: HashMap<usize, Accumulator> = HashMap::new();
            let mut grouped: HashMap<String, HashMap<usize, Accumulator>> = HashMap::new();
            let mut processed_cells = 0u64;
            let mut truncated = false;

            for row in rect.y1..=rect.y2 {
                if processed_cells >= max_cells {
                    truncated = true;
                    break;
                }
                let full_row = row_slice(wb, &sheet, row, rect.x1, rect.width() as u32)?;
                let group_key = group_by_index.map(|idx| {
                    let raw = full_row.get(idx - 1).map(String::as_str).unwrap_or("");
                    if raw.is_empty() { "(empty)".to_string() } else { raw.to_string() }
                });

                if let Some(key) = &group_key
                    && !grouped.contains_key(key)
                    && grouped.len() as u64 >= max_groups
                {
                    return Err(limit_exceeded(format!("group count exceeded the budget of {max_groups}")).into());
                }

                for &col in &selected {
                    let raw = full_row.get(col - 1).map(String::as_str).unwrap_or("");
                    match &group_key {
                        Some(key) => grouped.entry(key.clone()).or_default().entry(col).or_default().observe(raw),
                        None => ungrouped.entry(col).or_default().observe(raw),
                    }
                    processed_cells += 1;
                }
            }
            let (columns, groups) = if group_by_index.is_some() {
                let groups: HashMap<String, HashMap<usize, ColumnStats>> = grouped
                    .into_iter()
                    .map(|(key, cols)| (key, cols.into_iter().map(|(c, acc)| (c, acc.finish())).collect()))
                    .collect();
                (None, Some(groups))
            } else {
                let columns: HashMap<usize, ColumnStats> = ungrouped.into_iter().map(|(c, acc)| (c, acc.finish())).collect();
                (Some(columns), None)
            };

            Ok(ComputeStatisticsResponse { columns, groups, processed_cells, truncated })
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
            sheet.get_cell_mut("A1").set_value("east");
            sheet.get_cell_mut("B1").set_value("10");
            sheet.get_cell_mut("A2").set_value("east");
            sheet.get_cell_mut("B2").set_value("20");
            sheet.get_cell_mut("A3").set_value("west");
            sheet.get_cell_mut("B3").set_value("30");
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
    async fn computes_ungrouped_column_statistics() {
        let (config, path) = fixture();
        let kernel = Kernel::new(config);

        let response = compute_statistics(
            kernel.clone(),
            ComputeStatisticsParams {
                path: path.to_str().unwrap().to_string(),
                sheet: "Sheet1".into(),
                range: "A1:B3".into(),
                columns: Some(vec![2]),
                group_by_index: None,
                max_cells: None,
            },
        )
        .await
        .unwrap();

        let columns = response.columns.unwrap();
        let col2 = &columns[&2];
        assert_eq!(col2.count, 3);
        assert_eq!(col2.sum, 60.0);
        assert_eq!(col2.min, Some(10.0));
        assert_eq!(col2.max, Some(30.0));
    }

    #[tokio::test]
    async fn groups_by_first_column() {
        let (config, path) = fixture();
        let kernel = Kernel::new(config);

        let response = compute_statistics(
            kernel.clone(),
            ComputeStatisticsParams {
                path: path.to_str().unwrap().to_string(),
                sheet: "Sheet1".into(),
                range: "A1:B3".into(),
                columns: Some(vec![2]),
                group_by_index: Some(1),
                max_cells: None,
            },
        )
        .await
        .unwrap();

        let groups = response.groups.unwrap();
        assert_eq!(groups["east"][&2].count, 2);
        assert_eq!(groups["east"][&2].sum, 30.0);
        assert_eq!(groups["west"][&2].sum, 30.0);
    }

    #[tokio::test]
    async fn group_budget_overflow_is_limit_exceeded() {
        let (mut config, path) = fixture();
        config.limits.max_cells_per_op = 2;
        let kernel = Kernel::new(config);

        let err = compute_statistics(
            kernel.clone(),
            ComputeStatisticsParams {
                path: path.to_str().unwrap().to_string(),
                sheet: "Sheet1".into(),
                range: "A1:B3".into(),
                columns: Some(vec![2]),
                group_by_index: Some(1),
                max_cells: None,
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("LIMIT_EXCEEDED"));
    }
}
