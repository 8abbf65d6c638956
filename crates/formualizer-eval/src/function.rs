//! The `Function` trait and the capability flags that drive the
//! function-call protocol (component G): which functions see the evaluator
//! instead of plain values, which receive raw references instead of
//! dereferenced values, and which treat an omitted/null argument as `0`
//! rather than `""`.

use bitflags::bitflags;

use formualizer_common::{FormulaError, LiteralValue};

use crate::args::{Arg, ArgValue};
use crate::parser::Evaluator;

bitflags! {
    /// Per-function capability flags. Default (empty) describes an ordinary
    /// function: arguments are fully evaluated left to right before the
    /// call, null/omitted arguments coerce to `""`, and the function never
    /// sees raw references.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FnCaps: u8 {
        /// Missing/omitted arguments coerce to `0` instead of `""`
        /// (most math/logical/engineering/statistical builtins).
        const NULL_AS_ZERO     = 0b0000_0001;
        /// Argument-inspection predicates (`ISBLANK`, `ISERROR`, ...) get
        /// the raw reference alongside the dereferenced value, instead of
        /// only the value.
        const PRESERVE_REF     = 0b0000_0010;
        /// The function receives the evaluator and its arguments
        /// unevaluated, and decides for itself which to evaluate and how
        /// (`IF`, `INDEX`, `OFFSET`, `INDIRECT`, `CHOOSE`, `ROW`, `ROWS`,
        /// `COLUMN`, `COLUMNS`, `SUMIF`, `AVERAGEIF`, `WEBSERVICE`).
        const CONTEXT_FN       = 0b0000_0100;
        /// The function works with references directly and must not have
        /// them dereferenced into values/ranges before it runs (a subset
        /// of `CONTEXT_FN`: `ROW`, `ROWS`, `COLUMN`, `COLUMNS`, `SUMIF`,
        /// `INDEX`, `AVERAGEIF`, `IF`).
        const NO_DATA_RETRIEVE = 0b0000_1000;
    }
}

/// A registered formula function.
pub trait Function: Send + Sync {
    fn name(&self) -> &'static str;
    fn caps(&self) -> FnCaps {
        FnCaps::empty()
    }

    /// Ordinary evaluation path: arguments have already been dereferenced
    /// to `LiteralValue`s (or, for `PRESERVE_REF` functions, come with
    /// their originating reference attached, and unions survive as
    /// `ArgValue::Union` rather than being collapsed). Used when
    /// `CONTEXT_FN` is not set.
    fn call(&self, args: &[ArgValue]) -> Result<LiteralValue, FormulaError> {
        let _ = args;
        Err(FormulaError::NAME)
    }

    /// Context-aware evaluation path: `args` are unevaluated argument
    /// thunks and `eval` is the recursive-descent evaluator the function
    /// uses to resolve exactly the arguments it needs (and in whatever
    /// order its own short-circuiting requires). Used when `CONTEXT_FN`
    /// is set; the default panics because every `CONTEXT_FN` function
    /// must override it.
    fn call_with_context(
        &self,
        eval: &mut Evaluator<'_>,
        args: &[Arg<'_>],
    ) -> Result<LiteralValue, FormulaError> {
        let _ = (eval, args);
        unimplemented!("{} declares CONTEXT_FN but does not override call_with_context", self.name())
    }
}
