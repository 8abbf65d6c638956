use formualizer_common::{FormulaError, LiteralValue};

use crate::args::{flatten_params, ArgType, ArgValue};
use crate::function::{FnCaps, Function};

/// `SUM(n1, [n2], ...)` — flattens arrays and unions, coercing each member
/// to a number (text like `"4"` parses, booleans count as `0`/`1`), and
/// adds them up. An omitted argument slot contributes `0` rather than
/// erroring, since `SUM` is in the null-as-zero set.
pub struct Sum;

impl Function for Sum {
    fn name(&self) -> &'static str {
        "SUM"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::NULL_AS_ZERO
    }

    fn call(&self, args: &[ArgValue]) -> Result<LiteralValue, FormulaError> {
        let flat = flatten_params(args, ArgType::Number, true, None, 0)?;
        let mut total = 0.0;
        for v in flat {
            if let LiteralValue::Number(n) = v {
                total += n;
            }
        }
        Ok(LiteralValue::Number(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_numbers_and_numeric_text() {
        let args = vec![
            ArgValue::Value(LiteralValue::Number(1.0)),
            ArgValue::Value(LiteralValue::Number(2.0)),
            ArgValue::Value(LiteralValue::Number(3.0)),
            ArgValue::Value(LiteralValue::text("4")),
        ];
        assert_eq!(Sum.call(&args).unwrap(), LiteralValue::Number(10.0));
    }

    #[test]
    fn flattens_a_union() {
        let collection = formualizer_common::Collection::new(vec![
            (
                LiteralValue::Number(1.0),
                formualizer_common::Reference::Cell(
                    formualizer_common::CellRef::new(None, 1, 1).unwrap(),
                ),
            ),
            (
                LiteralValue::Number(2.0),
                formualizer_common::Reference::Cell(
                    formualizer_common::CellRef::new(None, 3, 3).unwrap(),
                ),
            ),
        ]);
        let args = vec![ArgValue::Union(collection)];
        assert_eq!(Sum.call(&args).unwrap(), LiteralValue::Number(3.0));
    }
}
