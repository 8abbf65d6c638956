use formualizer_common::{ErrorKind, FormulaError, LiteralValue};

use crate::args::ArgValue;
use crate::function::{FnCaps, Function};

/// `ISBLANK(value)` — true only when the argument dereferenced to an
/// empty cell. `PRESERVE_REF` so a future revision can distinguish "the
/// cell is genuinely blank" from "the formula happened to produce an
/// empty string", though this illustrative version only inspects the
/// dereferenced value.
pub struct IsBlank;

impl Function for IsBlank {
    fn name(&self) -> &'static str {
        "ISBLANK"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::PRESERVE_REF
    }

    fn call(&self, args: &[ArgValue]) -> Result<LiteralValue, FormulaError> {
        let arg = args.first().ok_or(FormulaError::NA)?;
        Ok(LiteralValue::Boolean(matches!(
            arg.as_single()?,
            LiteralValue::Empty
        )))
    }
}

/// `ISERROR(value)` — true for any `#...!` value, including `#N/A`.
pub struct IsError;

impl Function for IsError {
    fn name(&self) -> &'static str {
        "ISERROR"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::PRESERVE_REF
    }

    fn call(&self, args: &[ArgValue]) -> Result<LiteralValue, FormulaError> {
        let arg = args.first().ok_or(FormulaError::NA)?;
        Ok(LiteralValue::Boolean(matches!(
            arg.as_single()?,
            LiteralValue::Error(_)
        )))
    }
}

/// `ISERR(value)` — true for any `#...!` value except `#N/A`.
pub struct IsErr;

impl Function for IsErr {
    fn name(&self) -> &'static str {
        "ISERR"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::PRESERVE_REF
    }

    fn call(&self, args: &[ArgValue]) -> Result<LiteralValue, FormulaError> {
        let arg = args.first().ok_or(FormulaError::NA)?;
        Ok(LiteralValue::Boolean(matches!(
            arg.as_single()?,
            LiteralValue::Error(e) if e.kind != ErrorKind::Na
        )))
    }
}

/// `ISNA(value)` — true only for `#N/A`.
pub struct IsNa;

impl Function for IsNa {
    fn name(&self) -> &'static str {
        "ISNA"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::PRESERVE_REF
    }

    fn call(&self, args: &[ArgValue]) -> Result<LiteralValue, FormulaError> {
        let arg = args.first().ok_or(FormulaError::NA)?;
        Ok(LiteralValue::Boolean(matches!(
            arg.as_single()?,
            LiteralValue::Error(e) if e.kind == ErrorKind::Na
        )))
    }
}

/// `IFERROR(value, value_if_error)` — an ordinary (non-context) function
/// whose whole purpose is to inspect an already-captured error instead of
/// letting it propagate; dispatch never auto-propagates argument errors
/// into the call itself, which is what makes this possible.
pub struct IfError;

impl Function for IfError {
    fn name(&self) -> &'static str {
        "IFERROR"
    }

    fn call(&self, args: &[ArgValue]) -> Result<LiteralValue, FormulaError> {
        let first = args.first().ok_or(FormulaError::NA)?;
        match first.as_single()? {
            LiteralValue::Error(_) => {
                let fallback = args.get(1).ok_or(FormulaError::NA)?;
                Ok(fallback.as_single()?.clone())
            }
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isblank_true_for_empty() {
        let args = vec![ArgValue::Value(LiteralValue::Empty)];
        assert_eq!(IsBlank.call(&args).unwrap(), LiteralValue::Boolean(true));
    }

    #[test]
    fn iserror_vs_isna() {
        let div0 = vec![ArgValue::Value(LiteralValue::Error(FormulaError::DIV0))];
        assert_eq!(IsError.call(&div0).unwrap(), LiteralValue::Boolean(true));
        assert_eq!(IsErr.call(&div0).unwrap(), LiteralValue::Boolean(true));
        assert_eq!(IsNa.call(&div0).unwrap(), LiteralValue::Boolean(false));

        let na = vec![ArgValue::Value(LiteralValue::Error(FormulaError::NA))];
        assert_eq!(IsErr.call(&na).unwrap(), LiteralValue::Boolean(false));
        assert_eq!(IsNa.call(&na).unwrap(), LiteralValue::Boolean(true));
    }

    #[test]
    fn iferror_substitutes_fallback() {
        let args = vec![
            ArgValue::Value(LiteralValue::Error(FormulaError::DIV0)),
            ArgValue::Value(LiteralValue::Number(0.0)),
        ];
        assert_eq!(IfError.call(&args).unwrap(), LiteralValue::Number(0.0));
    }
}
