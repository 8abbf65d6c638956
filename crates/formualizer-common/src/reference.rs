//! Reference model: `CellRef`, `RangeRef`, and the `Collection` union type.
//!
//! `row`/`col` on a `RangeRef` bound may be absent, encoding a whole-column
//! or whole-row reference respectively; these are only expanded to
//! `1..=MAX_ROW` / `1..=MAX_COLUMN` when a host materializes them.

use std::fmt;

use crate::address::{self, check_col, check_row, render_sheet_prefix, MAX_COLUMN, MAX_ROW};
use crate::value::LiteralValue;

/// A single-cell reference, optionally sheet-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub sheet: Option<String>,
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    /// Construct a cell reference, validating 1-based bounds.
    pub fn new(sheet: Option<String>, row: u32, col: u32) -> Result<Self, FormulaError> {
        check_row(row).map_err(|_| FormulaError::REF)?;
        check_col(col).map_err(|_| FormulaError::REF)?;
        Ok(CellRef { sheet, row, col })
    }

    /// Render as canonical A1 text (uppercase letters, no `$`, optional
    /// sheet prefix). `parse(&self.to_a1()) == self` modulo sheet defaulting.
    pub fn to_a1(&self) -> String {
        let mut out = String::new();
        if let Some(sheet) = &self.sheet {
            out.push_str(&render_sheet_prefix(sheet));
        }
        out.push_str(&address::column_number_to_letters(self.col));
        out.push_str(&self.row.to_string());
        out
    }

    pub fn with_sheet(mut self, sheet: Option<String>) -> Self {
        if self.sheet.is_none() {
            self.sheet = sheet;
        }
        self
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_a1())
    }
}

/// One corner of a range: a row, a column, both, or neither (a full-sheet
/// reference can only arise from intersecting a whole-row with a
/// whole-column range, never as a standalone literal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Corner {
    pub row: Option<u32>,
    pub col: Option<u32>,
}

impl Corner {
    pub const fn cell(row: u32, col: u32) -> Self {
        Corner {
            row: Some(row),
            col: Some(col),
        }
    }
    pub const fn whole_row(row: u32) -> Self {
        Corner {
            row: Some(row),
            col: None,
        }
    }
    pub const fn whole_col(col: u32) -> Self {
        Corner {
            row: None,
            col: Some(col),
        }
    }
}

/// A rectangular reference, optionally sheet-qualified. Either bound's `row`
/// or `col` may be `None`, meaning "the whole column"/"the whole row".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeRef {
    pub sheet: Option<String>,
    pub from: Corner,
    pub to: Corner,
}

impl RangeRef {
    /// Construct a range, normalizing so `from <= to` on both axes.
    pub fn new(sheet: Option<String>, a: Corner, b: Corner) -> Self {
        let row_lo = min_opt(a.row, b.row, false);
        let row_hi = max_opt(a.row, b.row, true);
        let col_lo = min_opt(a.col, b.col, false);
        let col_hi = max_opt(a.col, b.col, true);
        RangeRef {
            sheet,
            from: Corner {
                row: row_lo,
                col: col_lo,
            },
            to: Corner {
                row: row_hi,
                col: col_hi,
            },
        }
    }

    pub fn single_cell(sheet: Option<String>, row: u32, col: u32) -> Self {
        RangeRef {
            sheet,
            from: Corner::cell(row, col),
            to: Corner::cell(row, col),
        }
    }

    pub fn is_whole_row(&self) -> bool {
        self.from.col.is_none() && self.to.col.is_none() && self.from.row.is_some()
    }
    pub fn is_whole_column(&self) -> bool {
        self.from.row.is_none() && self.to.row.is_none() && self.from.col.is_some()
    }
    pub fn is_full_sheet(&self) -> bool {
        self.from.row.is_none() && self.from.col.is_none()
    }

    /// Materialized row bounds, expanding an absent axis to the sheet limit.
    pub fn row_span(&self) -> (u32, u32) {
        (
            self.from.row.unwrap_or(1),
            self.to.row.unwrap_or(MAX_ROW),
        )
    }
    /// Materialized column bounds, expanding an absent axis to the sheet limit.
    pub fn col_span(&self) -> (u32, u32) {
        (
            self.from.col.unwrap_or(1),
            self.to.col.unwrap_or(MAX_COLUMN),
        )
    }

    /// Collapse to a `CellRef` if this range is exactly 1x1.
    pub fn as_single_cell(&self) -> Option<CellRef> {
        let (r0, r1) = self.row_span();
        let (c0, c1) = self.col_span();
        if r0 == r1 && c0 == c1 {
            Some(CellRef {
                sheet: self.sheet.clone(),
                row: r0,
                col: c0,
            })
        } else {
            None
        }
    }

    pub fn with_sheet(mut self, sheet: Option<String>) -> Self {
        if self.sheet.is_none() {
            self.sheet = sheet;
        }
        self
    }
}

fn min_opt(a: Option<u32>, b: Option<u32>, treat_none_as_max: bool) -> Option<u32> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => {
            if treat_none_as_max {
                Some(x)
            } else {
                None
            }
        }
        (Some(x), Some(y)) => Some(x.min(y)),
    }
}
fn max_opt(a: Option<u32>, b: Option<u32>, treat_none_as_max: bool) -> Option<u32> {
    match (a, b) {
        (None, _) | (_, None) => {
            if treat_none_as_max {
                None
            } else {
                Some(0)
            }
        }
        (Some(x), Some(y)) => Some(x.max(y)),
    }
}

/// Either shape a formula-level reference can take.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Cell(CellRef),
    Range(RangeRef),
}

impl Reference {
    pub fn sheet(&self) -> Option<&str> {
        match self {
            Reference::Cell(c) => c.sheet.as_deref(),
            Reference::Range(r) => r.sheet.as_deref(),
        }
    }

    pub fn with_sheet(self, sheet: Option<String>) -> Self {
        match self {
            Reference::Cell(c) => Reference::Cell(c.with_sheet(sheet)),
            Reference::Range(r) => Reference::Range(r.with_sheet(sheet)),
        }
    }

    /// Normalize a range that happens to be 1x1 down to a `Cell` variant.
    pub fn collapse(self) -> Self {
        match self {
            Reference::Range(r) => match r.as_single_cell() {
                Some(c) if !r.is_whole_row() && !r.is_whole_column() => Reference::Cell(c),
                _ => Reference::Range(r),
            },
            other => other,
        }
    }

    pub fn to_a1(&self) -> String {
        match self {
            Reference::Cell(c) => c.to_a1(),
            Reference::Range(r) => {
                let mut out = String::new();
                if let Some(sheet) = &r.sheet {
                    out.push_str(&render_sheet_prefix(sheet));
                }
                out.push_str(&corner_to_a1(r.from));
                out.push(':');
                out.push_str(&corner_to_a1(r.to));
                out
            }
        }
    }
}

fn corner_to_a1(c: Corner) -> String {
    let mut out = String::new();
    if let Some(col) = c.col {
        out.push_str(&address::column_number_to_letters(col));
    }
    if let Some(row) = c.row {
        out.push_str(&row.to_string());
    }
    out
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_a1())
    }
}

/// An ordered union of `(value, reference)` pairs produced by the comma
/// operator inside parentheses. Contains at least two elements; a
/// single-element union collapses to its sole member upstream (see the
/// parser's union production).
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub items: Vec<(LiteralValue, Reference)>,
}

impl Collection {
    pub fn new(items: Vec<(LiteralValue, Reference)>) -> Self {
        debug_assert!(items.len() >= 2, "collections must have >= 2 members");
        Collection { items }
    }
}

use crate::error::FormulaError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_normalizes_order() {
        let r = RangeRef::new(None, Corner::cell(3, 1), Corner::cell(1, 3));
        assert_eq!(r.from, Corner::cell(1, 1));
        assert_eq!(r.to, Corner::cell(3, 3));
    }

    #[test]
    fn whole_row_and_column() {
        let row = RangeRef::new(None, Corner::whole_row(2), Corner::whole_row(2));
        assert!(row.is_whole_row());
        assert_eq!(row.col_span(), (1, MAX_COLUMN));

        let col = RangeRef::new(None, Corner::whole_col(3), Corner::whole_col(3));
        assert!(col.is_whole_column());
        assert_eq!(col.row_span(), (1, MAX_ROW));
    }

    #[test]
    fn collapse_to_single_cell() {
        let r = Reference::Range(RangeRef::single_cell(None, 1, 1));
        assert_eq!(r.collapse(), Reference::Cell(CellRef::new(None, 1, 1).unwrap()));
    }

    #[test]
    fn a1_roundtrip() {
        let c = CellRef::new(Some("Sheet1".into()), 1, 27).unwrap();
        assert_eq!(c.to_a1(), "Sheet1!AA1");
        let c2 = CellRef::new(Some("My Sheet".into()), 1, 1).unwrap();
        assert_eq!(c2.to_a1(), "'My Sheet'!A1");
    }
}
