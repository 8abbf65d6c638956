//! The illustrative function catalogue (§1B): just enough real functions
//! to exercise every path of the function-call protocol — an ordinary
//! null-as-zero function (`SUM`), preserve-ref predicates (`ISBLANK` and
//! friends), an error-inspecting ordinary function (`IFERROR`), and
//! context functions that re-enter the evaluator themselves (`IF`,
//! `CHOOSE`, `ROW`/`ROWS`/`COLUMN`/`COLUMNS`). This is not a function
//! library — individual function semantics beyond this set are out of
//! scope (see the crate root docs).

mod info;
mod logical;
mod math;

use std::sync::Arc;

use crate::function_registry::register;

/// Register the illustrative catalogue. Idempotent: re-registering simply
/// overwrites the same entries, so calling this more than once (e.g. once
/// per `EngineBuilder`) is harmless.
pub fn register_all() {
    register(Arc::new(math::Sum));
    register(Arc::new(logical::If));
    register(Arc::new(logical::Choose));
    register(Arc::new(logical::Row));
    register(Arc::new(logical::Rows));
    register(Arc::new(logical::Column));
    register(Arc::new(logical::Columns));
    register(Arc::new(info::IsBlank));
    register(Arc::new(info::IsError));
    register(Arc::new(info::IsErr));
    register(Arc::new(info::IsNa));
    register(Arc::new(info::IfError));
}
