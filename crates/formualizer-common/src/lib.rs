//! Core value, reference, and error vocabulary shared by `formualizer-parse`
//! and `formualizer-eval`.

pub mod address;
pub mod error;
pub mod reference;
pub mod value;

pub use address::{MAX_COLUMN, MAX_ROW};
pub use error::{ErrorKind, FormulaError};
pub use reference::{CellRef, Collection, Corner, RangeRef, Reference};
pub use value::{Array2D, LiteralValue};
