//! The formula-level value union.
//!
//! `LiteralValue` is the result of evaluating any formula subexpression once
//! references have been dereferenced down to scalars/arrays. A bare
//! reference or union only ever exists transiently during evaluation (see
//! `formualizer-eval`'s dispatch layer) — by the time a value reaches a
//! caller it has already been resolved to one of these variants.

use std::fmt;

use crate::error::FormulaError;

/// A scalar or array value produced by formula evaluation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LiteralValue {
    Number(f64),
    Boolean(bool),
    Text(String),
    Error(FormulaError),
    /// Rectangular 2D array; every row has the same length (enforced by
    /// `Array2D::new`). Never empty.
    Array(Array2D),
    /// The omitted-argument marker, distinct from any coercible value —
    /// callers decide per-argument whether it coerces to `0`, `""`, or
    /// `#N/A` (see `formualizer-eval::args::accept`).
    Empty,
}

impl LiteralValue {
    pub fn text(s: impl Into<String>) -> Self {
        LiteralValue::Text(s.into())
    }

    pub fn error(err: FormulaError) -> Self {
        LiteralValue::Error(err)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LiteralValue::Error(_))
    }

    pub fn as_error(&self) -> Option<&FormulaError> {
        match self {
            LiteralValue::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Excel truthiness: numbers are truthy iff non-zero, text is never
    /// implicitly boolean (callers needing that coercion go through
    /// `formualizer-eval::operators::accept_number` first).
    pub fn is_truthy(&self) -> Option<bool> {
        match self {
            LiteralValue::Boolean(b) => Some(*b),
            LiteralValue::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    /// The top-left scalar of an array, or the value itself if already a
    /// scalar. Used when a scalar context receives an array result.
    pub fn top_left(&self) -> &LiteralValue {
        match self {
            LiteralValue::Array(a) => a.get(0, 0).unwrap_or(&LiteralValue::Empty),
            other => other,
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Number(n) => write!(f, "{n}"),
            LiteralValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            LiteralValue::Text(s) => write!(f, "{s}"),
            LiteralValue::Error(e) => write!(f, "{e}"),
            LiteralValue::Array(a) => write!(f, "{{{}}}", a.render_braces()),
            LiteralValue::Empty => Ok(()),
        }
    }
}

impl From<f64> for LiteralValue {
    fn from(n: f64) -> Self {
        LiteralValue::Number(n)
    }
}
impl From<bool> for LiteralValue {
    fn from(b: bool) -> Self {
        LiteralValue::Boolean(b)
    }
}
impl From<String> for LiteralValue {
    fn from(s: String) -> Self {
        LiteralValue::Text(s)
    }
}
impl From<FormulaError> for LiteralValue {
    fn from(e: FormulaError) -> Self {
        LiteralValue::Error(e)
    }
}

/// A rectangular, row-major grid of values. Constructed only via `new`,
/// which rejects ragged input, so every consumer can assume uniform row
/// width without re-checking.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Array2D {
    rows: Vec<Vec<LiteralValue>>,
}

impl Array2D {
    pub fn new(rows: Vec<Vec<LiteralValue>>) -> Result<Self, FormulaError> {
        if rows.is_empty() || rows[0].is_empty() {
            return Err(FormulaError::VALUE);
        }
        let width = rows[0].len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(FormulaError::VALUE);
        }
        Ok(Array2D { rows })
    }

    pub fn single(value: LiteralValue) -> Self {
        Array2D {
            rows: vec![vec![value]],
        }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }
    pub fn width(&self) -> usize {
        self.rows[0].len()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&LiteralValue> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn rows(&self) -> &[Vec<LiteralValue>] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiteralValue> {
        self.rows.iter().flatten()
    }

    fn render_braces(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(render_array_member)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

fn render_array_member(v: &LiteralValue) -> String {
    match v {
        LiteralValue::Text(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert_eq!(LiteralValue::Number(0.0).is_truthy(), Some(false));
        assert_eq!(LiteralValue::Number(2.0).is_truthy(), Some(true));
        assert_eq!(LiteralValue::Boolean(true).is_truthy(), Some(true));
        assert_eq!(LiteralValue::text("x").is_truthy(), None);
    }

    #[test]
    fn ragged_array_rejected() {
        let rows = vec![
            vec![LiteralValue::Number(1.0), LiteralValue::Number(2.0)],
            vec![LiteralValue::Number(3.0)],
        ];
        assert!(Array2D::new(rows).is_err());
    }

    #[test]
    fn array_display_matches_literal_syntax() {
        let a = Array2D::new(vec![
            vec![LiteralValue::Number(1.0), LiteralValue::text("a")],
            vec![LiteralValue::Boolean(true), LiteralValue::Number(2.0)],
        ])
        .unwrap();
        assert_eq!(
            LiteralValue::Array(a).to_string(),
            "{1,\"a\";TRUE,2}"
        );
    }
}
