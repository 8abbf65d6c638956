//! Engine construction (component of the Ambient Stack): a builder that
//! accumulates a host and flags before producing an immutable engine,
//! mirroring the "capability interface passed at construction" design
//! note — rather than a config file or env-driven setup.

use std::sync::Arc;

use formualizer_common::{CellRef, LiteralValue};
use thiserror::Error;

use crate::function::Function;
use crate::function_registry;
use crate::host::Host;
use crate::parser::Evaluator;

/// Errors a caller can hit at the engine boundary, distinct from
/// `FormulaError` (which is a formula-level result, not a construction or
/// misuse failure). Uses `thiserror` the way `formualizer-workbook`'s
/// higher-level error types do, one layer up from the core value types.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("formula text is empty")]
    EmptyFormula,
}

/// Accumulates a host implementation and evaluation flags before producing
/// an immutable [`FormulaEngine`]. Extra functions registered here join
/// the global registry alongside the illustrative builtin catalogue —
/// register_builtins() is idempotent, so building more than one engine in
/// a process is safe.
pub struct EngineBuilder<H: Host> {
    host: H,
    is_test_mode: bool,
    extra_functions: Vec<Arc<dyn Function>>,
}

impl<H: Host> EngineBuilder<H> {
    pub fn new(host: H) -> Self {
        EngineBuilder {
            host,
            is_test_mode: false,
            extra_functions: Vec::new(),
        }
    }

    /// Compatibility-probe mode (§4.5 step 6): an unresolved function
    /// becomes a stub `0` plus a logged name instead of `#NAME?`.
    pub fn test_mode(mut self, on: bool) -> Self {
        self.is_test_mode = on;
        self
    }

    /// Register an additional function, joining the illustrative builtin
    /// catalogue. Last registration for a given name wins.
    pub fn register_function(mut self, f: Arc<dyn Function>) -> Self {
        self.extra_functions.push(f);
        self
    }

    pub fn build(self) -> FormulaEngine<H> {
        function_registry::register_builtins();
        for f in self.extra_functions {
            function_registry::register(f);
        }
        FormulaEngine {
            host: self.host,
            is_test_mode: self.is_test_mode,
        }
    }
}

/// An immutable, constructed engine. `parse`/`parse_async` are the entire
/// public evaluation surface (§6 External Interfaces); dependency
/// extraction is a distinct type — see [`crate::dependency::DependencyEngine`].
pub struct FormulaEngine<H: Host> {
    host: H,
    is_test_mode: bool,
}

impl<H: Host> FormulaEngine<H> {
    /// Parse and evaluate `text` (a leading `=` is optional) against this
    /// engine's host. `position` anchors no-argument `ROW()`/`COLUMN()`
    /// calls. Never returns `Err` for a formula-level failure — those
    /// come back as `Ok(LiteralValue::Error(..))`; `Err` is reserved for
    /// caller-side misuse (empty input).
    pub fn parse(
        &self,
        text: &str,
        position: Option<CellRef>,
        allow_return_array: bool,
    ) -> Result<LiteralValue, EngineError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::trace_span!("formualizer_eval::parse").entered();

        if text.trim().is_empty() {
            return Err(EngineError::EmptyFormula);
        }
        let mut ev = Evaluator::new(&self.host).with_test_mode(self.is_test_mode);
        if let Some(p) = position {
            ev = ev.with_position(p);
        }
        Ok(ev.evaluate(text, allow_return_array))
    }

    /// A thin async wrapper over [`FormulaEngine::parse`]. The core has no
    /// internal parallelism to await on (§5 Non-goals); this exists only
    /// so a caller already inside an async context isn't forced to block,
    /// per the "one core, thin async wrapper" design note.
    pub async fn parse_async(
        &self,
        text: &str,
        position: Option<CellRef>,
        allow_return_array: bool,
    ) -> Result<LiteralValue, EngineError> {
        std::future::ready(self.parse(text, position, allow_return_array)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MapHost;

    #[test]
    fn builder_registers_builtins_and_evaluates() {
        let mut host = MapHost::default();
        host.set_cell(None, 1, 1, LiteralValue::Number(1.0));
        host.set_cell(None, 1, 2, LiteralValue::Number(2.0));
        let engine = EngineBuilder::new(host).build();
        assert_eq!(
            engine.parse("=SUM(A1:B1)", None, false).unwrap(),
            LiteralValue::Number(3.0)
        );
    }

    #[test]
    fn empty_formula_is_a_caller_error() {
        let engine = EngineBuilder::new(MapHost::default()).build();
        assert!(matches!(
            engine.parse("", None, false),
            Err(EngineError::EmptyFormula)
        ));
    }

    #[test]
    fn test_mode_stubs_unresolved_functions() {
        let engine = EngineBuilder::new(MapHost::default()).test_mode(true).build();
        assert_eq!(
            engine.parse("=NOTAREALFUNCTION(1)", None, false).unwrap(),
            LiteralValue::Number(0.0)
        );
    }

    #[test]
    fn sum_coerces_string_args() {
        let engine = EngineBuilder::new(MapHost::default()).build();
        assert_eq!(
            engine.parse(r#"=SUM(1,2,3,"4")"#, None, false).unwrap(),
            LiteralValue::Number(10.0)
        );
    }

    #[test]
    fn whitespace_intersection_across_two_ranges() {
        let mut host = MapHost::default();
        for r in 1..=4 {
            for c in 1..=4 {
                host.set_cell(None, r, c, LiteralValue::Number(10.0));
            }
        }
        let engine = EngineBuilder::new(host).build();
        // A1:C3 ∩ B2:D4 = B2:C3 (a 2x2 box); every cell is 10 so a top-left
        // scalar collapse and a SUM-forced flatten agree on the answer.
        assert_eq!(
            engine.parse("=A1:C3 B2:D4", None, false).unwrap(),
            LiteralValue::Number(10.0)
        );
        assert_eq!(
            engine.parse("=SUM(A1:C3 B2:D4)", None, false).unwrap(),
            LiteralValue::Number(40.0)
        );
    }

    #[test]
    fn whitespace_intersection_collapses_to_single_cell() {
        let mut host = MapHost::default();
        host.set_cell(None, 2, 2, LiteralValue::Number(10.0));
        let engine = EngineBuilder::new(host).build();
        assert_eq!(
            engine.parse("=A1:B2 B2:C3", None, false).unwrap(),
            LiteralValue::Number(10.0)
        );
    }

    #[test]
    fn union_flattens_through_sum() {
        let mut host = MapHost::default();
        host.set_cell(None, 1, 1, LiteralValue::Number(1.0));
        host.set_cell(None, 3, 3, LiteralValue::Number(2.0));
        let engine = EngineBuilder::new(host).build();
        assert_eq!(
            engine.parse("=SUM((A1,C3))", None, false).unwrap(),
            LiteralValue::Number(3.0)
        );
    }

    #[test]
    fn sheet_qualified_cell_reference_adds() {
        let mut host = MapHost::default();
        host.set_cell(Some("My Sheet"), 1, 1, LiteralValue::Number(5.0));
        let engine = EngineBuilder::new(host).build();
        assert_eq!(
            engine.parse("='My Sheet'!A1 + 2", None, false).unwrap(),
            LiteralValue::Number(7.0)
        );
    }

    #[test]
    fn if_branches_on_condition() {
        let mut host = MapHost::default();
        host.set_cell(None, 1, 1, LiteralValue::Number(-3.0));
        let engine = EngineBuilder::new(host).build();
        assert_eq!(
            engine.parse(r#"=IF(A1>0,"pos","nonpos")"#, None, false).unwrap(),
            LiteralValue::Text("nonpos".into())
        );
    }

    #[test]
    fn whitespace_intersection_still_works_inside_a_function_call() {
        let mut host = MapHost::default();
        for r in 1..=4 {
            for c in 1..=4 {
                host.set_cell(None, r, c, LiteralValue::Number(10.0));
            }
        }
        let engine = EngineBuilder::new(host).build();
        // Same intersection as `whitespace_intersection_across_two_ranges`,
        // but the gap now has to survive being split out as a function
        // argument's own token sub-stream.
        assert_eq!(
            engine.parse("=SUM(A1:C3 B2:D4)", None, false).unwrap(),
            LiteralValue::Number(40.0)
        );
    }

    #[test]
    fn empty_cell_compares_equal_to_zero() {
        let host = MapHost::default();
        let engine = EngineBuilder::new(host).build();
        assert_eq!(
            engine.parse("=A1=0", None, false).unwrap(),
            LiteralValue::Boolean(true)
        );
        assert_eq!(
            engine.parse("=A1>-1", None, false).unwrap(),
            LiteralValue::Boolean(true)
        );
    }

    #[test]
    fn unary_plus_passes_non_numeric_through_unchanged() {
        let host = MapHost::default();
        let engine = EngineBuilder::new(host).build();
        assert_eq!(
            engine.parse(r#"=+"abc""#, None, false).unwrap(),
            LiteralValue::Text("abc".into())
        );
        // A net `-` still coerces and negates.
        assert_eq!(
            engine.parse("=-TRUE", None, false).unwrap(),
            LiteralValue::Number(-1.0)
        );
    }

    #[test]
    fn named_range_resolves_as_a_reference() {
        use formualizer_common::{Corner, RangeRef, Reference};

        let mut host = MapHost::default();
        host.set_cell(None, 1, 1, LiteralValue::Number(1.0));
        host.set_cell(None, 1, 2, LiteralValue::Number(2.0));
        host.set_variable(
            "MyRange",
            Reference::Range(RangeRef {
                sheet: None,
                from: Corner::cell(1, 1),
                to: Corner::cell(1, 2),
            }),
        );
        let engine = EngineBuilder::new(host).build();
        assert_eq!(
            engine.parse("=SUM(MyRange)", None, false).unwrap(),
            LiteralValue::Number(3.0)
        );
    }
}
