//! Dependency mode (component H): a second host implementing the same
//! [`Host`] trait as ordinary evaluation, except every cell/range/variable
//! lookup is recorded instead of answered, and `Evaluator::dependency_mode`
//! keeps `parser::parse_function_call` from dispatching to a real function
//! (which could early-return and miss a branch's references) — every
//! argument is still visited so every branch of `IF`/`CHOOSE` contributes.
//!
//! A second, structurally identical pass over the same grammar drives
//! dependency extraction instead of evaluation — see below.

use std::cell::RefCell;

use formualizer_common::{CellRef, LiteralValue, RangeRef, Reference};

use crate::host::Host;
use crate::parser::Evaluator;

/// Resolves a named variable to the reference it stands for, if any — the
/// dependency-mode counterpart of [`Host::on_variable`], which only needs
/// to hand back a value.
pub trait VariableResolver {
    fn resolve(&self, name: &str) -> Option<Reference>;
}

/// Runs the ordinary parser/evaluator recursion in dependency mode and
/// collects the distinct references the formula touches, in discovery
/// order. One instance per formula; it holds no state across calls.
pub struct DependencyEngine<'r> {
    resolver: &'r dyn VariableResolver,
    default_sheet: Option<String>,
}

impl<'r> DependencyEngine<'r> {
    pub fn new(resolver: &'r dyn VariableResolver) -> Self {
        DependencyEngine {
            resolver,
            default_sheet: None,
        }
    }

    pub fn with_default_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.default_sheet = Some(sheet.into());
        self
    }

    /// Parse `text` and return every cell/range it references, deduplicated
    /// (an exact repeat, or a cell already covered by a previously recorded
    /// range, is skipped) and in the order they were first discovered.
    pub fn dependencies(&self, text: &str, position: Option<CellRef>) -> Vec<Reference> {
        let host = DepHost {
            resolver: self.resolver,
            default_sheet: self.default_sheet.clone(),
            seen: RefCell::new(Vec::new()),
        };
        let mut ev = Evaluator::new(&host).with_dependency_mode(true);
        if let Some(pos) = position {
            ev = ev.with_position(pos);
        }
        let _ = ev.evaluate(text, true);
        host.seen.into_inner()
    }
}

struct DepHost<'r> {
    resolver: &'r dyn VariableResolver,
    default_sheet: Option<String>,
    seen: RefCell<Vec<Reference>>,
}

impl<'r> DepHost<'r> {
    fn record(&self, r: Reference) {
        let mut seen = self.seen.borrow_mut();
        if seen.iter().any(|existing| covers(existing, &r)) {
            return;
        }
        seen.retain(|existing| !covers(&r, existing));
        seen.push(r);
    }
}

/// Whether `outer` already covers `inner` — an exact match, or `inner` is a
/// single cell falling within `outer`'s bounding box on the same sheet.
fn covers(outer: &Reference, inner: &Reference) -> bool {
    if outer == inner {
        return true;
    }
    let (Reference::Range(outer_range), Reference::Cell(inner_cell)) = (outer, inner) else {
        return false;
    };
    if outer_range.sheet != inner_cell.sheet {
        return false;
    }
    let (row_lo, row_hi) = outer_range.row_span();
    let (col_lo, col_hi) = outer_range.col_span();
    (row_lo..=row_hi).contains(&inner_cell.row) && (col_lo..=col_hi).contains(&inner_cell.col)
}

impl<'r> Host for DepHost<'r> {
    fn on_cell(&self, cell: &CellRef) -> LiteralValue {
        self.record(Reference::Cell(cell.clone()));
        LiteralValue::Number(0.0)
    }

    fn on_range(&self, range: &RangeRef) -> Vec<Vec<LiteralValue>> {
        self.record(Reference::Range(range.clone()));
        let (row_lo, row_hi) = range.row_span();
        let (col_lo, col_hi) = range.col_span();
        // Stub just enough shape for array-shaped consumers to round-trip
        // without materializing MAX_ROW x MAX_COLUMN of zeros.
        let rows = (row_hi - row_lo + 1).min(1) as usize;
        let cols = (col_hi - col_lo + 1).min(1) as usize;
        vec![vec![LiteralValue::Number(0.0); cols.max(1)]; rows.max(1)]
    }

    fn on_variable(&self, name: &str) -> Option<Reference> {
        let r = self.resolver.resolve(name)?;
        self.record(r.clone());
        Some(r)
    }

    fn default_sheet(&self) -> Option<String> {
        self.default_sheet.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoVariables;
    impl VariableResolver for NoVariables {
        fn resolve(&self, _name: &str) -> Option<Reference> {
            None
        }
    }

    #[test]
    fn collects_cell_and_range_refs() {
        let resolver = NoVariables;
        let engine = DependencyEngine::new(&resolver);
        let deps = engine.dependencies("=A1+Sheet2!B2:C3", None);
        assert_eq!(deps.len(), 2);
        assert_eq!(
            deps[0],
            Reference::Cell(CellRef::new(None, 1, 1).unwrap())
        );
        match &deps[1] {
            Reference::Range(r) => assert_eq!(r.sheet.as_deref(), Some("Sheet2")),
            other => panic!("expected a range, got {other:?}"),
        }
    }

    #[test]
    fn visits_both_branches_of_if() {
        let resolver = NoVariables;
        let engine = DependencyEngine::new(&resolver);
        let deps = engine.dependencies("=IF(A1>0,B1,C1)", None);
        assert_eq!(deps.len(), 3);
    }

    #[test]
    fn dedupes_cell_already_covered_by_a_range() {
        let resolver = NoVariables;
        let engine = DependencyEngine::new(&resolver);
        let deps = engine.dependencies("=SUM(A1:A3)+A2", None);
        assert_eq!(deps.len(), 1);
    }
}
