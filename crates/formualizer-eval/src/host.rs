//! The capability interface a caller implements to supply data to the
//! formula core. This is the one trait the config-as-callbacks pattern of
//! the original protocol collapses into: a single object passed at
//! construction rather than a bag of closures.

use formualizer_common::{CellRef, LiteralValue, RangeRef, Reference};

/// Data access a formula evaluation needs from its surrounding workbook.
///
/// Implementors decide how cells, ranges, and named variables resolve; the
/// evaluator never reaches past this trait to touch workbook storage
/// directly. `formualizer-eval::test_utils::MapHost` is a minimal in-memory
/// implementation used by this crate's own tests.
pub trait Host {
    /// Resolve a single cell to its current value.
    fn on_cell(&self, cell: &CellRef) -> LiteralValue;

    /// Resolve a rectangular range to its current values, row-major.
    /// Whole-row/whole-column ranges are materialized by the host at
    /// whatever extent it considers populated — the evaluator does not
    /// assume `MAX_ROW`/`MAX_COLUMN` are actually walked.
    fn on_range(&self, range: &RangeRef) -> Vec<Vec<LiteralValue>>;

    /// Resolve a named variable (a defined name, not a cell reference) to
    /// the reference it stands for. Returns `None` if `name` is not
    /// defined, in which case the caller reports `#NAME?`. A defined name
    /// always names a `Ref` — not a bare value — so it can flow through
    /// the same reference algebra (ranges, intersection, `SUM(MyRange)`)
    /// as a literal cell or range reference would.
    fn on_variable(&self, name: &str) -> Option<Reference>;

    /// The sheet a bare (unqualified) reference should resolve against.
    fn default_sheet(&self) -> Option<String> {
        None
    }
}
