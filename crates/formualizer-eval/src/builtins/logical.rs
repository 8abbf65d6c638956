use formualizer_common::{FormulaError, LiteralValue, Reference};

use crate::args::Arg;
use crate::function::{FnCaps, Function};
use crate::parser::Evaluator;
use crate::reference_ops::accept_number;

/// `IF(condition, value_if_true, [value_if_false])` — the canonical
/// context function: only the taken branch is evaluated, so its argument
/// thunks are resolved directly against `eval` rather than pre-evaluated
/// by the dispatcher. Omitted branches default to the condition's own
/// boolean value, matching Excel.
pub struct If;

impl Function for If {
    fn name(&self) -> &'static str {
        "IF"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::CONTEXT_FN | FnCaps::NO_DATA_RETRIEVE
    }

    fn call_with_context(
        &self,
        eval: &mut Evaluator<'_>,
        args: &[Arg<'_>],
    ) -> Result<LiteralValue, FormulaError> {
        let cond_arg = args.first().ok_or(FormulaError::NA)?;
        let cond = eval.eval_arg(cond_arg);
        let condition = truthy(&cond)?;
        let branch = if condition { args.get(1) } else { args.get(2) };
        match branch {
            Some(a) if !a.is_omitted() => Ok(eval.eval_arg(a)),
            _ => Ok(LiteralValue::Boolean(condition)),
        }
    }
}

/// `IF`'s own boolean coercion: the same rule `accept`'s `BOOLEAN` target
/// applies to an ordinary argument, duplicated here because `IF`'s
/// condition never passes through `accept` (it's a `CONTEXT_FN`, so no
/// dispatcher-level coercion runs on its arguments at all).
fn truthy(v: &LiteralValue) -> Result<bool, FormulaError> {
    match v {
        LiteralValue::Boolean(b) => Ok(*b),
        LiteralValue::Number(n) => Ok(*n != 0.0),
        LiteralValue::Text(s) => match s.to_ascii_uppercase().as_str() {
            "TRUE" => Ok(true),
            "FALSE" => Ok(false),
            _ => Err(FormulaError::VALUE),
        },
        LiteralValue::Empty => Ok(false),
        LiteralValue::Array(a) => truthy(a.get(0, 0).unwrap_or(&LiteralValue::Empty)),
        LiteralValue::Error(e) => Err(e.clone()),
    }
}

/// `CHOOSE(index, value1, [value2], ...)` — only the selected value's
/// thunk is evaluated.
pub struct Choose;

impl Function for Choose {
    fn name(&self) -> &'static str {
        "CHOOSE"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::CONTEXT_FN
    }

    fn call_with_context(
        &self,
        eval: &mut Evaluator<'_>,
        args: &[Arg<'_>],
    ) -> Result<LiteralValue, FormulaError> {
        let idx_arg = args.first().ok_or(FormulaError::NA)?;
        let idx_val = eval.eval_arg(idx_arg);
        if let LiteralValue::Error(e) = &idx_val {
            return Err(e.clone());
        }
        let idx = accept_number(&idx_val)?;
        if idx.fract() != 0.0 || idx < 1.0 {
            return Err(FormulaError::VALUE);
        }
        let choice = args.get(idx as usize).ok_or(FormulaError::VALUE)?;
        if choice.is_omitted() {
            return Ok(LiteralValue::Empty);
        }
        Ok(eval.eval_arg(choice))
    }
}

/// `ROW([reference])` — the row of `reference`'s top-left cell, or of the
/// formula's own anchor cell when called with no argument.
pub struct Row;

impl Function for Row {
    fn name(&self) -> &'static str {
        "ROW"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::CONTEXT_FN | FnCaps::NO_DATA_RETRIEVE
    }

    fn call_with_context(
        &self,
        eval: &mut Evaluator<'_>,
        args: &[Arg<'_>],
    ) -> Result<LiteralValue, FormulaError> {
        let row = match args.first() {
            Some(a) if !a.is_omitted() => top_left_row(&eval.ref_of_arg(a)?),
            _ => eval.position.as_ref().ok_or(FormulaError::VALUE)?.row,
        };
        Ok(LiteralValue::Number(row as f64))
    }
}

/// `ROWS(reference)` — the number of rows `reference` spans.
pub struct Rows;

impl Function for Rows {
    fn name(&self) -> &'static str {
        "ROWS"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::CONTEXT_FN | FnCaps::NO_DATA_RETRIEVE
    }

    fn call_with_context(
        &self,
        eval: &mut Evaluator<'_>,
        args: &[Arg<'_>],
    ) -> Result<LiteralValue, FormulaError> {
        let arg = args.first().ok_or(FormulaError::NA)?;
        let r = eval.ref_of_arg(arg)?;
        let (lo, hi) = row_span(&r);
        Ok(LiteralValue::Number((hi - lo + 1) as f64))
    }
}

/// `COLUMN([reference])` — the column of `reference`'s top-left cell, or
/// of the formula's own anchor cell when called with no argument.
pub struct Column;

impl Function for Column {
    fn name(&self) -> &'static str {
        "COLUMN"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::CONTEXT_FN | FnCaps::NO_DATA_RETRIEVE
    }

    fn call_with_context(
        &self,
        eval: &mut Evaluator<'_>,
        args: &[Arg<'_>],
    ) -> Result<LiteralValue, FormulaError> {
        let col = match args.first() {
            Some(a) if !a.is_omitted() => top_left_col(&eval.ref_of_arg(a)?),
            _ => eval.position.as_ref().ok_or(FormulaError::VALUE)?.col,
        };
        Ok(LiteralValue::Number(col as f64))
    }
}

/// `COLUMNS(reference)` — the number of columns `reference` spans.
pub struct Columns;

impl Function for Columns {
    fn name(&self) -> &'static str {
        "COLUMNS"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::CONTEXT_FN | FnCaps::NO_DATA_RETRIEVE
    }

    fn call_with_context(
        &self,
        eval: &mut Evaluator<'_>,
        args: &[Arg<'_>],
    ) -> Result<LiteralValue, FormulaError> {
        let arg = args.first().ok_or(FormulaError::NA)?;
        let r = eval.ref_of_arg(arg)?;
        let (lo, hi) = col_span(&r);
        Ok(LiteralValue::Number((hi - lo + 1) as f64))
    }
}

fn top_left_row(r: &Reference) -> u32 {
    row_span(r).0
}

fn top_left_col(r: &Reference) -> u32 {
    col_span(r).0
}

fn row_span(r: &Reference) -> (u32, u32) {
    match r {
        Reference::Cell(c) => (c.row, c.row),
        Reference::Range(range) => range.row_span(),
    }
}

fn col_span(r: &Reference) -> (u32, u32) {
    match r {
        Reference::Cell(c) => (c.col, c.col),
        Reference::Range(range) => range.col_span(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MapHost;

    fn eval(host: &MapHost, text: &str) -> LiteralValue {
        Evaluator::new(host).evaluate(text, false)
    }

    #[test]
    fn if_evaluates_only_the_taken_branch() {
        let mut host = MapHost::default();
        host.set_cell(None, 1, 1, LiteralValue::Number(-3.0));
        assert_eq!(
            eval(&host, r#"=IF(A1>0,"pos","nonpos")"#),
            LiteralValue::Text("nonpos".into())
        );
    }

    #[test]
    fn choose_picks_the_indexed_value() {
        let host = MapHost::default();
        assert_eq!(
            eval(&host, r#"=CHOOSE(2,"a","b","c")"#),
            LiteralValue::Text("b".into())
        );
    }

    #[test]
    fn rows_and_columns_span_a_range() {
        let host = MapHost::default();
        assert_eq!(eval(&host, "=ROWS(A1:B3)"), LiteralValue::Number(3.0));
        assert_eq!(eval(&host, "=COLUMNS(A1:B3)"), LiteralValue::Number(2.0));
    }
}
