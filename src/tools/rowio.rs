//! Small cell-walking helpers shared by the paginated handlers: reading a
//! bounded horizontal slice of a row and writing it out as CSV.

use anyhow::Result;

use crate::workbook::Workbook;

/// Reads `width` cells starting at 1-based column `x_left` on `row`, in
/// column order; missing cells read as the empty string.
pub fn row_slice(wb: &Workbook, sheet: &str, row: u32, x_left: u32, width: u32) -> Result<Vec<String>> {
    let mut values = Vec::with_capacity(width as usize);
    for col in x_left..x_left + width {
        let value = wb.cell(sheet, col, row)?.map(|c| c.value).unwrap_or_default();
        values.push(value);
    }
    Ok(values)
}

/// Minimal RFC 4180-ish encoding: a field is quoted (with `"` doubled) iff it
/// contains a comma, quote, or newline.
pub fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| {
            if field.contains(',') || field.contains('"') || field.contains('\n') {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
