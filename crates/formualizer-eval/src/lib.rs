//! The formula core: a recursive-descent parser/evaluator fused with
//! Excel's reference algebra (cell/range/union, intersection, the range
//! operator) and a small function-call protocol. Embedding code supplies
//! cell/range/variable data through the [`Host`] trait; this crate holds
//! no workbook state of its own.
//!
//! A second, structurally identical pass over the same grammar drives
//! dependency extraction instead of evaluation — see [`dependency`].

pub mod args;
mod builtins;
pub mod dependency;
pub mod engine;
pub mod function;
pub mod function_registry;
pub mod host;
pub mod parser;
pub mod reference_ops;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
#[cfg(not(any(test, feature = "test-utils")))]
mod test_utils;

pub use args::{Arg, ArgType, ArgValue, Criteria};
pub use dependency::{DependencyEngine, VariableResolver};
pub use engine::{EngineBuilder, EngineError, FormulaEngine};
pub use function::{FnCaps, Function};
pub use host::Host;
pub use parser::{Evaluator, Resolved};

pub use formualizer_common::{
    Array2D, CellRef, Collection, Corner, ErrorKind, FormulaError, LiteralValue, RangeRef,
    Reference, MAX_COLUMN, MAX_ROW,
};
