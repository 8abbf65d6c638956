//! Excel-style error representation.
//!
//! - **`ErrorKind`**    : the canonical set of `#...!` error codes
//! - **`FormulaError`** : a code plus an optional human-readable detail string
//!
//! The seven standard Excel codes plus `#ERROR!` (parser/lexer/host failures)
//! are logically singletons: two `FormulaError`s built from the same code and
//! no detail compare equal. Unlike the JS original this needs no identity
//! table — `PartialEq` on the enum already gives `==`-by-code for free.

use std::fmt;

/// All recognised error codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    Null,
    DivZero,
    Value,
    Ref,
    Name,
    Num,
    Na,
    /// Parser/lexer/host failure. Not a real Excel code but Excel renders
    /// unrecoverable formula errors this way.
    Error,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Null => "#NULL!",
            ErrorKind::DivZero => "#DIV/0!",
            ErrorKind::Value => "#VALUE!",
            ErrorKind::Ref => "#REF!",
            ErrorKind::Name => "#NAME?",
            ErrorKind::Num => "#NUM!",
            ErrorKind::Na => "#N/A",
            ErrorKind::Error => "#ERROR!",
        }
    }

    /// Parse a literal error code as it appears in formula text (e.g. `#REF!`).
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "#NULL!" => ErrorKind::Null,
            "#DIV/0!" => ErrorKind::DivZero,
            "#VALUE!" => ErrorKind::Value,
            "#REF!" => ErrorKind::Ref,
            "#NAME?" => ErrorKind::Name,
            "#NUM!" => ErrorKind::Num,
            "#N/A" => ErrorKind::Na,
            "#ERROR!" => ErrorKind::Error,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A formula-level error: an Excel error code plus an optional message.
///
/// `details` carries diagnostic text (a parser message, a caret diagram, a
/// wrapped host-callback panic message); it never participates in equality so
/// that two errors of the same kind remain interchangeable the way Excel's
/// own `#REF!` is interchangeable regardless of which deleted cell caused it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FormulaError {
    pub kind: ErrorKind,
    pub details: Option<String>,
}

impl FormulaError {
    pub const fn new(kind: ErrorKind) -> Self {
        FormulaError {
            kind,
            details: None,
        }
    }

    pub fn with_details(kind: ErrorKind, details: impl Into<String>) -> Self {
        FormulaError {
            kind,
            details: Some(details.into()),
        }
    }

    pub const NULL: FormulaError = FormulaError::new(ErrorKind::Null);
    pub const DIV0: FormulaError = FormulaError::new(ErrorKind::DivZero);
    pub const VALUE: FormulaError = FormulaError::new(ErrorKind::Value);
    pub const REF: FormulaError = FormulaError::new(ErrorKind::Ref);
    pub const NAME: FormulaError = FormulaError::new(ErrorKind::Name);
    pub const NUM: FormulaError = FormulaError::new(ErrorKind::Num);
    pub const NA: FormulaError = FormulaError::new(ErrorKind::Na);

    /// A `#NAME?` error for a function that was never registered.
    pub fn unknown_function(name: &str) -> Self {
        FormulaError::with_details(
            ErrorKind::Name,
            format!("Function {name} is not implemented."),
        )
    }

    /// An `#ERROR!` wrapping a lexer/parser diagnostic, with a caret pointer
    /// under the offending column.
    pub fn syntax(message: impl Into<String>, line: usize, col: usize, source_line: &str) -> Self {
        let caret = format!("{}^", " ".repeat(col.saturating_sub(1)));
        let details = format!(
            "{msg} ({line}:{col})\n{source_line}\n{caret}",
            msg = message.into()
        );
        FormulaError::with_details(ErrorKind::Error, details)
    }
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(details) = &self.details {
            write!(f, ": {details}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FormulaError {}

/// Equality by error code only — details are diagnostic, not identity.
impl PartialEq for FormulaError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}
impl Eq for FormulaError {}

impl From<ErrorKind> for FormulaError {
    fn from(kind: ErrorKind) -> Self {
        FormulaError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_equality_ignores_details() {
        let a = FormulaError::DIV0;
        let b = FormulaError::with_details(ErrorKind::DivZero, "division by zero at A1");
        assert_eq!(a, b);
    }

    #[test]
    fn code_roundtrips() {
        for k in [
            ErrorKind::Null,
            ErrorKind::DivZero,
            ErrorKind::Value,
            ErrorKind::Ref,
            ErrorKind::Name,
            ErrorKind::Num,
            ErrorKind::Na,
            ErrorKind::Error,
        ] {
            assert_eq!(ErrorKind::parse(k.code()), Some(k));
        }
    }

    #[test]
    fn different_kinds_are_not_equal() {
        assert_ne!(FormulaError::NUM, FormulaError::VALUE);
    }
}
