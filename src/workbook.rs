use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use umya_spreadsheet::Spreadsheet;

use crate::errors::{invalid_sheet, not_found};

/// Thin wrapper over `umya_spreadsheet::Spreadsheet` giving the rest of the
/// kernel a narrow, tool-shaped surface instead of the full codec API.
pub struct Workbook {
    book: Spreadsheet,
}

/// A resolved cell value plus its formula text, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct CellSnapshot {
    pub value: String,
    pub formula: Option<String>,
}

impl Workbook {
    pub fn open(path: &Path) -> Result<Self> {
        let book = umya_spreadsheet::reader::xlsx::read(path)
            .with_context(|| format!("failed to open workbook '{}'", path.display()))?;
        Ok(Self { book })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.book
            .get_sheet_collection()
            .iter()
            .map(|sheet| sheet.get_name().to_string())
            .collect()
    }

    pub fn has_sheet(&self, sheet: &str) -> bool {
        self.sheet_names().iter().any(|name| name == sheet)
    }

    /// `(max_col, max_row)`, `(0, 0)` for a sheet with no populated cells.
    pub fn used_range(&self, sheet: &str) -> Result<(u32, u32)> {
        let sheet = self.sheet(sheet)?;
        Ok(sheet.get_highest_column_and_row())
    }

    pub fn cell(&self, sheet: &str, col: u32, row: u32) -> Result<Option<CellSnapshot>> {
        let sheet = self.sheet(sheet)?;
        Ok(sheet.get_cell((col, row)).map(cell_snapshot))
    }

    /// Leftmost column among the sheet's populated cells, used to anchor
    /// search/filter/preview snapshots to the used range instead of column A.
    /// `get_highest_column_and_row` only reports the bottom-right corner, so
    /// this walks the sparse cell collection once rather than scanning the
    /// full rectangle.
    pub fn used_range_left_column(&self, sheet: &str) -> Result<u32> {
        let sheet = self.sheet(sheet)?;
        let mut min_col: Option<u32> = None;
        for cell in sheet.get_cell_collection() {
            if cell.get_value().to_string().is_empty() && !cell.is_formula() {
                continue;
            }
            let col = *cell.get_coordinate().get_col_num();
            min_col = Some(min_col.map_or(col, |m| m.min(col)));
        }
        Ok(min_col.unwrap_or(1))
    }

    /// Calls `visit(row, col, snapshot)` for every populated cell within the
    /// inclusive rectangle, in row-major order.
    pub fn for_each_cell_in_rect(
        &self,
        sheet: &str,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        mut visit: impl FnMut(u32, u32, &CellSnapshot),
    ) -> Result<()> {
        let sheet = self.sheet(sheet)?;
        for row in y1..=y2 {
            for col in x1..=x2 {
                if let Some(cell) = sheet.get_cell((col, row)) {
                    let snapshot = cell_snapshot(cell);
                    if !snapshot.value.is_empty() || snapshot.formula.is_some() {
                        visit(row, col, &snapshot);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn set_cell_value(&mut self, sheet: &str, col: u32, row: u32, value: &str) -> Result<()> {
        let name = sheet.to_string();
        let sheet = self.sheet_mut(&name)?;
        sheet.get_cell_mut((col, row)).set_value(value);
        Ok(())
    }

    pub fn set_cell_formula(&mut self, sheet: &str, col: u32, row: u32, formula: &str) -> Result<()> {
        let name = sheet.to_string();
        let sheet = self.sheet_mut(&name)?;
        let cell = sheet.get_cell_mut((col, row));
        cell.set_formula(formula);
        cell.get_cell_value_mut().set_formula_result_default(String::new());
        Ok(())
    }

    /// Looks up a workbook- or sheet-scoped defined name, returning its
    /// owning sheet (if scoped) and raw address text.
    pub fn defined_name(&self, name: &str) -> Option<(Option<String>, String)> {
        for defined in self.book.get_defined_names() {
            if defined.get_name() == name {
                return Some((extract_sheet_qualifier(defined.get_address()), defined.get_address().to_string()));
            }
        }
        for sheet in self.book.get_sheet_collection() {
            for defined in sheet.get_defined_names() {
                if defined.get_name() == name {
                    return Some((Some(sheet.get_name().to_string()), defined.get_address().to_string()));
                }
            }
        }
        None
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".sheetkernel-")
            .suffix(".xlsx")
            .tempfile_in(parent)
            .with_context(|| format!("failed to create a staging file next to '{}'", path.display()))?;
        umya_spreadsheet::writer::xlsx::write(&self.book, tmp.path())
            .with_context(|| format!("failed to serialize workbook to '{}'", tmp.path().display()))?;
        tmp.persist(path)
            .map_err(|e| anyhow!("failed to atomically replace '{}': {}", path.display(), e.error))?;
        Ok(())
    }

    fn sheet(&self, name: &str) -> Result<&umya_spreadsheet::Worksheet> {
        self.book
            .get_sheet_by_name(name)
            .ok_or_else(|| invalid_sheet(format!("sheet '{name}' does not exist")).into())
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut umya_spreadsheet::Worksheet> {
        self.book
            .get_sheet_by_name_mut(name)
            .ok_or_else(|| invalid_sheet(format!("sheet '{name}' does not exist")).into())
    }
}

fn cell_snapshot(cell: &umya_spreadsheet::Cell) -> CellSnapshot {
    CellSnapshot {
        value: cell.get_value().to_string(),
        formula: if cell.is_formula() {
            Some(cell.get_formula().to_string())
        } else {
            None
        },
    }
}

/// `Sheet!$A$1` style defined-name addresses carry the sheet before `!`;
/// workbook-scoped names with no qualifier resolve against the caller's
/// current sheet instead.
fn extract_sheet_qualifier(address: &str) -> Option<String> {
    address.split_once('!').map(|(sheet, _)| sheet.trim_matches('\'').to_string())
}

/// `mtime` in whole seconds since the epoch, used as the cursor's staleness
/// signal; missing metadata is treated as `NOT_FOUND` since the file must
/// have disappeared between the path guard check and this read.
pub fn mtime_seconds(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path).map_err(|_| not_found(format!("path '{}' is no longer readable", path.display())))?;
    let modified = metadata
        .modified()
        .with_context(|| format!("platform does not report mtime for '{}'", path.display()))?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(name: &str) -> std::path::PathBuf {
        let mut book = umya_spreadsheet::new_file();
        book.new_sheet("Data").unwrap();
        {
            let sheet = book.get_sheet_by_name_mut("Data").unwrap();
            sheet.get_cell_mut("A1").set_value("Name");
            sheet.get_cell_mut("B1").set_value("Amount");
            sheet.get_cell_mut("A2").set_value("Widget");
            sheet.get_cell_mut("B2").set_formula("1+2");
            sheet.add_defined_name("Quarterly", "Data!$A$1:$B$2").unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        std::mem::forget(dir);
        path
    }

    #[test]
    fn sheet_names_and_used_range() {
        let wb = Workbook::open(&fixture("a.xlsx")).unwrap();
        assert_eq!(wb.sheet_names(), vec!["Data".to_string()]);
        assert_eq!(wb.used_range("Data").unwrap(), (2, 2));
    }

    #[test]
    fn unknown_sheet_is_invalid_sheet() {
        let wb = Workbook::open(&fixture("b.xlsx")).unwrap();
        let err = wb.used_range("Nope").unwrap_err();
        assert!(err.to_string().contains("INVALID_SHEET"));
    }

    #[test]
    fn reads_formula_and_value_cells() {
        let wb = Workbook::open(&fixture("c.xlsx")).unwrap();
        let name = wb.cell("Data", 1, 1).unwrap().unwrap();
        assert_eq!(name.value, "Name");
        assert!(name.formula.is_none());
        let amount = wb.cell("Data", 2, 2).unwrap().unwrap();
        assert_eq!(amount.formula.as_deref(), Some("1+2"));
    }

    #[test]
    fn for_each_cell_skips_blank_gaps() {
        let wb = Workbook::open(&fixture("d.xlsx")).unwrap();
        let mut seen = Vec::new();
        wb.for_each_cell_in_rect("Data", 1, 1, 2, 2, |row, col, snap| {
            seen.push((row, col, snap.value.clone()));
        })
        .unwrap();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn defined_name_resolves_to_sheet_and_address() {
        let wb = Workbook::open(&fixture("e.xlsx")).unwrap();
        let (sheet, address) = wb.defined_name("Quarterly").unwrap();
        assert_eq!(sheet.as_deref(), Some("Data"));
        assert_eq!(address, "Data!$A$1:$B$2");
    }

    #[test]
    fn used_range_left_column_anchors_to_first_populated_column() {
        let mut book = umya_spreadsheet::new_file();
        {
            let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
            sheet.get_cell_mut("C2").set_value("first");
            sheet.get_cell_mut("E2").set_value("second");
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.xlsx");
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        std::mem::forget(dir);

        let wb = Workbook::open(&path).unwrap();
        assert_eq!(wb.used_range_left_column("Sheet1").unwrap(), 3);
    }

    #[test]
    fn write_to_persists_edits() {
        let path = fixture("f.xlsx");
        let mut wb = Workbook::open(&path).unwrap();
        wb.set_cell_value("Data", 3, 1, "New").unwrap();
        wb.write_to(&path).unwrap();

        let reopened = Workbook::open(&path).unwrap();
        let cell = reopened.cell("Data", 3, 1).unwrap().unwrap();
        assert_eq!(cell.value, "New");
    }

    #[test]
    fn mtime_seconds_reads_metadata() {
        let path = fixture("g.xlsx");
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"").unwrap();
        assert!(mtime_seconds(&path).unwrap() > 0);
    }
}
