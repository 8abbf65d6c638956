//! In-memory [`Host`] used by this crate's own unit tests and by
//! engine-level integration tests. Not part of the public contract a real
//! host implements — a workbook-backed host lives one layer up, outside
//! this crate.

use std::collections::HashMap;

use formualizer_common::{CellRef, LiteralValue, RangeRef, Reference};

use crate::host::Host;

/// A `HashMap`-backed [`Host`]. Whole-row/whole-column ranges materialize
/// only over the extent of cells actually populated on their sheet
/// (clamped to at least one cell), never `MAX_ROW`/`MAX_COLUMN` — mirroring
/// how a real workbook host would only walk its populated extent.
#[derive(Debug, Default)]
pub struct MapHost {
    cells: HashMap<(Option<String>, u32, u32), LiteralValue>,
    variables: HashMap<String, Reference>,
    default_sheet: Option<String>,
}

impl MapHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.default_sheet = Some(sheet.into());
        self
    }

    pub fn set_cell(&mut self, sheet: Option<&str>, row: u32, col: u32, value: LiteralValue) {
        self.cells
            .insert((sheet.map(str::to_string), row, col), value);
    }

    /// Define `name` as a defined name standing for `reference` — a cell
    /// or range, the same shape `on_variable` hands back to the evaluator.
    pub fn set_variable(&mut self, name: &str, reference: Reference) {
        self.variables.insert(name.to_string(), reference);
    }

    fn max_populated_row(&self, sheet: &Option<String>) -> u32 {
        self.cells
            .keys()
            .filter(|(s, _, _)| s == sheet)
            .map(|(_, r, _)| *r)
            .max()
            .unwrap_or(1)
    }

    fn max_populated_col(&self, sheet: &Option<String>) -> u32 {
        self.cells
            .keys()
            .filter(|(s, _, _)| s == sheet)
            .map(|(_, _, c)| *c)
            .max()
            .unwrap_or(1)
    }
}

impl Host for MapHost {
    fn on_cell(&self, cell: &CellRef) -> LiteralValue {
        self.cells
            .get(&(cell.sheet.clone(), cell.row, cell.col))
            .cloned()
            .unwrap_or(LiteralValue::Empty)
    }

    fn on_range(&self, range: &RangeRef) -> Vec<Vec<LiteralValue>> {
        let (row_lo, row_hi) = range.row_span();
        let (col_lo, col_hi) = range.col_span();
        let row_hi = if range.to.row.is_none() {
            row_hi.min(self.max_populated_row(&range.sheet).max(row_lo))
        } else {
            row_hi
        };
        let col_hi = if range.to.col.is_none() {
            col_hi.min(self.max_populated_col(&range.sheet).max(col_lo))
        } else {
            col_hi
        };
        (row_lo..=row_hi)
            .map(|r| {
                (col_lo..=col_hi)
                    .map(|c| {
                        self.cells
                            .get(&(range.sheet.clone(), r, c))
                            .cloned()
                            .unwrap_or(LiteralValue::Empty)
                    })
                    .collect()
            })
            .collect()
    }

    fn on_variable(&self, name: &str) -> Option<Reference> {
        self.variables.get(name).cloned()
    }

    fn default_sheet(&self) -> Option<String> {
        self.default_sheet.clone()
    }
}
