use formualizer_parse::parser::ReferenceType;

use crate::errors::validation;

/// Inclusive 1-based rectangle plus its normalized textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Rect {
    pub fn width(&self) -> u64 {
        (self.x2 - self.x1 + 1) as u64
    }

    pub fn height(&self) -> u64 {
        (self.y2 - self.y1 + 1) as u64
    }

    pub fn cell_count(&self) -> u64 {
        self.width() * self.height()
    }

    /// Re-emit the canonical `TopLeft:BottomRight` textual form.
    pub fn to_text(&self) -> String {
        format!(
            "{}{}:{}{}",
            column_to_letters(self.x1),
            self.y1,
            column_to_letters(self.x2),
            self.y2
        )
    }
}

/// Parses an A1-style range (optionally `sheet!A1:D50`) or resolves a
/// defined name into a normalized rectangle. Reuses the same reference
/// parser the rest of the crate already depends on for formula handling
/// rather than a bespoke grammar.
///
/// `sheet` is the sheet the caller is operating against; if the input carries
/// its own sheet qualifier it must match, or this returns a validation error.
/// `resolve_defined_name` looks up `(sheet, address)` for a defined name that
/// is not itself an A1/range literal.
pub fn resolve_range(
    input: &str,
    sheet: &str,
    resolve_defined_name: impl Fn(&str) -> Option<(Option<String>, String)>,
) -> anyhow::Result<Rect> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(validation("range must not be empty").into());
    }

    let reference = ReferenceType::from_string(trimmed)
        .map_err(|e| validation(format!("could not parse range '{trimmed}': {e}")))?;

    match reference {
        ReferenceType::NamedRange(name) => {
            let (defined_sheet, address) = resolve_defined_name(&name)
                .ok_or_else(|| validation(format!("'{name}' is not a known range or defined name")))?;
            if let Some(defined_sheet) = defined_sheet.as_deref()
                && !defined_sheet.eq_ignore_ascii_case(sheet)
            {
                return Err(validation(format!(
                    "defined name '{name}' targets sheet '{defined_sheet}', not '{sheet}'"
                ))
                .into());
            }
            let stripped = strip_absolute_markers(&address);
            let inner = ReferenceType::from_string(&stripped)
                .map_err(|e| validation(format!("defined name '{name}' has an unparseable target: {e}")))?;
            rect_from_reference(inner, sheet)
        }
        other => rect_from_reference(other, sheet),
    }
}

fn rect_from_reference(reference: ReferenceType, sheet: &str) -> anyhow::Result<Rect> {
    match reference {
        ReferenceType::Cell { sheet: ref_sheet, row, col } => {
            check_sheet_qualifier(ref_sheet.as_deref(), sheet)?;
            Ok(canonical_rect(col, row, col, row))
        }
        ReferenceType::Range {
            sheet: ref_sheet,
            start_row,
            start_col,
            end_row,
            end_col,
        } => {
            check_sheet_qualifier(ref_sheet.as_deref(), sheet)?;
            let x1 = start_col.ok_or_else(|| validation("open-ended column ranges are not supported"))?;
            let y1 = start_row.ok_or_else(|| validation("open-ended row ranges are not supported"))?;
            let x2 = end_col.ok_or_else(|| validation("open-ended column ranges are not supported"))?;
            let y2 = end_row.ok_or_else(|| validation("open-ended row ranges are not supported"))?;
            Ok(canonical_rect(x1, y1, x2, y2))
        }
        ReferenceType::Table(_) => Err(validation("table references are not supported here").into()),
        ReferenceType::NamedRange(name) => {
            Err(validation(format!("'{name}' is not a known range or defined name")).into())
        }
    }
}

fn check_sheet_qualifier(ref_sheet: Option<&str>, sheet: &str) -> anyhow::Result<()> {
    match ref_sheet {
        Some(qualifier) if !qualifier.eq_ignore_ascii_case(sheet) => Err(validation(format!(
            "range is qualified with sheet '{qualifier}', expected '{sheet}'"
        ))
        .into()),
        _ => Ok(()),
    }
}

fn canonical_rect(x1: u32, y1: u32, x2: u32, y2: u32) -> Rect {
    Rect {
        x1: x1.min(x2),
        y1: y1.min(y2),
        x2: x1.max(x2),
        y2: y1.max(y2),
    }
}

fn strip_absolute_markers(address: &str) -> String {
    address.replace('$', "")
}

pub fn column_to_letters(mut col: u32) -> String {
    let mut out = String::new();
    while col > 0 {
        col -= 1;
        out.insert(0, ((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    out
}
