//! Reference/value dispatch (component F) and scalar operator algebra
//! (component E): dereferencing references against a [`Host`], coercing
//! values for arithmetic, and the bounding-box algebra behind the
//! intersection and range operators.

use formualizer_common::{Array2D, CellRef, Corner, FormulaError, LiteralValue, RangeRef, Reference};

use crate::host::Host;

/// Fetch a cell or range from the host and collapse it into a value:
/// a single cell becomes a scalar, a range becomes an `Array2D`.
pub fn retrieve_ref(host: &dyn Host, r: &Reference) -> LiteralValue {
    match r {
        Reference::Cell(c) => host.on_cell(c),
        Reference::Range(range) => {
            let rows = host.on_range(range);
            match Array2D::new(rows) {
                Ok(a) => LiteralValue::Array(a),
                Err(_) => LiteralValue::Error(FormulaError::REF),
            }
        }
    }
}

/// Dereference a reference down to the scalar a binary operator needs:
/// a range collapses to its top-left cell (Excel's implicit-intersection
/// fallback when a range reaches a scalar operator without an explicit
/// intersection).
pub fn extract_ref_value(host: &dyn Host, r: &Reference) -> LiteralValue {
    retrieve_ref(host, r).top_left().clone()
}

/// Post-process an evaluation result before it's handed back to a caller:
/// `NaN` becomes `#VALUE!`, `±∞` becomes `#NUM!`, `-0` normalizes to `0`,
/// and (unless `allow_return_array`) an array collapses to its top-left
/// scalar — matching how Excel renders an array formula result into a
/// single non-spilling cell.
pub fn check_formula_result(value: LiteralValue, allow_return_array: bool) -> LiteralValue {
    match value {
        LiteralValue::Number(n) => {
            if n.is_nan() {
                LiteralValue::Error(FormulaError::VALUE)
            } else if n.is_infinite() {
                LiteralValue::Error(FormulaError::NUM)
            } else if n == 0.0 {
                LiteralValue::Number(0.0)
            } else {
                LiteralValue::Number(n)
            }
        }
        LiteralValue::Array(a) if !allow_return_array => {
            check_formula_result(a.get(0, 0).cloned().unwrap_or(LiteralValue::Empty), true)
        }
        other => other,
    }
}

/// `a` if `a` is an error, else `b` if `b` is an error, else `None`. Every
/// binary scalar operator checks this before doing any coercion work.
pub fn first_error<'a>(a: &'a LiteralValue, b: &'a LiteralValue) -> Option<&'a FormulaError> {
    if let LiteralValue::Error(e) = a {
        return Some(e);
    }
    if let LiteralValue::Error(e) = b {
        return Some(e);
    }
    None
}

/// Coerce a value to a number: booleans become `0`/`1`, numeric strings
/// parse, arrays use their top-left member, anything else is `#VALUE!`.
pub fn accept_number(value: &LiteralValue) -> Result<f64, FormulaError> {
    match value {
        LiteralValue::Number(n) => Ok(*n),
        LiteralValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        LiteralValue::Text(s) => s.trim().parse::<f64>().map_err(|_| FormulaError::VALUE),
        LiteralValue::Array(a) => accept_number(a.get(0, 0).unwrap_or(&LiteralValue::Empty)),
        LiteralValue::Empty => Ok(0.0),
        LiteralValue::Error(e) => Err(e.clone()),
    }
}

/// Text coercion for the concatenation operator: `Empty` becomes `""`,
/// booleans render as the literal words `TRUE`/`FALSE`.
pub fn concat_text(value: &LiteralValue) -> String {
    match value {
        LiteralValue::Text(s) => s.clone(),
        LiteralValue::Empty => String::new(),
        LiteralValue::Array(a) => concat_text(a.get(0, 0).unwrap_or(&LiteralValue::Empty)),
        other => other.to_string(),
    }
}

/// Relative rank used for cross-type comparison: `bool > text > number`
/// (Excel's own ordering when `<`/`>`/`<=`/`>=` compare across types; `=`
/// and `<>` then fall out for free since same-rank is required for any
/// value-level equality).
fn type_rank(value: &LiteralValue) -> u8 {
    match value {
        LiteralValue::Boolean(_) => 3,
        LiteralValue::Text(_) => 2,
        LiteralValue::Number(_) => 1,
        LiteralValue::Empty => 1,
        LiteralValue::Array(_) => 1,
        LiteralValue::Error(_) => 4,
    }
}

/// A null (empty-cell) operand coerces to `0` before comparison (spec:
/// "Null operands → 0"), so `=A1=0` and `=A1>-1` read an empty `A1` the
/// same way they'd read a cell holding a literal `0`.
fn coerce_null_operand(value: &LiteralValue) -> LiteralValue {
    match value {
        LiteralValue::Empty => LiteralValue::Number(0.0),
        other => other.clone(),
    }
}

/// Three-way comparison honoring Excel's cross-type ordering rule.
pub fn compare_values(a: &LiteralValue, b: &LiteralValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let a = coerce_null_operand(a);
    let b = coerce_null_operand(b);
    let (ra, rb) = (type_rank(&a), type_rank(&b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (&a, &b) {
        (LiteralValue::Number(x), LiteralValue::Number(y)) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (LiteralValue::Boolean(x), LiteralValue::Boolean(y)) => x.cmp(y),
        (LiteralValue::Text(x), LiteralValue::Text(y)) => {
            x.to_uppercase().cmp(&y.to_uppercase())
        }
        _ => Ordering::Equal,
    }
}

/// Shrink two references down to their bounding-box intersection (the
/// whitespace/implicit-intersection operator). References on different
/// sheets, or whose boxes don't overlap at all, yield `#NULL!`. A 1x1
/// result collapses to a `Cell`.
pub fn shrink_intersection(a: &Reference, b: &Reference) -> Result<Reference, FormulaError> {
    if a.sheet() != b.sheet() {
        return Err(FormulaError::NULL);
    }
    let (a_rows, a_cols) = bounding_box(a);
    let (b_rows, b_cols) = bounding_box(b);

    let row_lo = a_rows.0.max(b_rows.0);
    let row_hi = a_rows.1.min(b_rows.1);
    let col_lo = a_cols.0.max(b_cols.0);
    let col_hi = a_cols.1.min(b_cols.1);

    if row_lo > row_hi || col_lo > col_hi {
        return Err(FormulaError::NULL);
    }

    let sheet = a.sheet().map(|s| s.to_string());
    let result = Reference::Range(RangeRef {
        sheet,
        from: Corner::cell(row_lo, col_lo),
        to: Corner::cell(row_hi, col_hi),
    });
    Ok(result.collapse())
}

fn bounding_box(r: &Reference) -> ((u32, u32), (u32, u32)) {
    match r {
        Reference::Cell(c) => ((c.row, c.row), (c.col, c.col)),
        Reference::Range(range) => (range.row_span(), range.col_span()),
    }
}

/// One operand of a `:` range chain once it's been evaluated: either a
/// fully-formed reference (a cell, or a column already promoted to a
/// whole-column range at the atom level), or a bare number that the range
/// operator itself must promote into a whole-row reference.
pub enum RangeOperand {
    Reference(Reference),
    BareRow(u32),
}

/// Combine the running range with the next `:`-separated operand,
/// expanding the bounding box to cover both. Combining a whole-row operand
/// with a whole-column operand yields a full-sheet reference, matching
/// this engine's range-operator contract.
pub fn extend_range(
    current: Option<Reference>,
    next: RangeOperand,
) -> Result<Reference, FormulaError> {
    let next_ref = match &next {
        RangeOperand::Reference(r) => r.clone(),
        RangeOperand::BareRow(row) => Reference::Range(RangeRef {
            sheet: None,
            from: Corner::whole_row(*row),
            to: Corner::whole_row(*row),
        }),
    };

    let Some(current) = current else {
        return Ok(next_ref);
    };

    if current.sheet().is_some() && next_ref.sheet().is_some() && current.sheet() != next_ref.sheet() {
        return Err(FormulaError::REF);
    }
    let sheet = current.sheet().or(next_ref.sheet()).map(|s| s.to_string());

    let (cur_is_whole_col, cur_is_whole_row) = whole_axes(&current);
    let (next_is_whole_col, next_is_whole_row) = whole_axes(&next_ref);

    // Mixing a whole-row promotion with a whole-column promotion produces
    // a full-sheet reference.
    if (cur_is_whole_row && next_is_whole_col) || (cur_is_whole_col && next_is_whole_row) {
        return Ok(Reference::Range(RangeRef {
            sheet,
            from: Corner { row: None, col: None },
            to: Corner { row: None, col: None },
        }));
    }

    let (cur_rows, cur_cols) = bounding_box_opt(&current);
    let (next_rows, next_cols) = bounding_box_opt(&next_ref);

    let rows = union_opt(cur_rows, next_rows);
    let cols = union_opt(cur_cols, next_cols);

    Ok(Reference::Range(RangeRef {
        sheet,
        from: Corner { row: rows.0, col: cols.0 },
        to: Corner { row: rows.1, col: cols.1 },
    })
    .collapse())
}

/// `(is_whole_column, is_whole_row)` — whether `r` spans every row for a
/// fixed column (its row axis is unbounded) and/or every column for a
/// fixed row (its column axis is unbounded).
fn whole_axes(r: &Reference) -> (bool, bool) {
    match r {
        Reference::Cell(_) => (false, false),
        Reference::Range(range) => (
            range.from.row.is_none() && range.to.row.is_none(),
            range.from.col.is_none() && range.to.col.is_none(),
        ),
    }
}

fn bounding_box_opt(r: &Reference) -> ((Option<u32>, Option<u32>), (Option<u32>, Option<u32>)) {
    match r {
        Reference::Cell(c) => ((Some(c.row), Some(c.row)), (Some(c.col), Some(c.col))),
        Reference::Range(range) => (
            (range.from.row, range.to.row),
            (range.from.col, range.to.col),
        ),
    }
}

fn union_opt(a: (Option<u32>, Option<u32>), b: (Option<u32>, Option<u32>)) -> (Option<u32>, Option<u32>) {
    let lo = match (a.0, b.0) {
        (Some(x), Some(y)) => Some(x.min(y)),
        _ => None,
    };
    let hi = match (a.1, b.1) {
        (Some(x), Some(y)) => Some(x.max(y)),
        _ => None,
    };
    (lo, hi)
}

pub fn cell_ref(sheet: Option<String>, row: u32, col: u32) -> Result<CellRef, FormulaError> {
    CellRef::new(sheet, row, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_type_comparison_ranks() {
        assert_eq!(
            compare_values(&LiteralValue::Number(5.0), &LiteralValue::text("a")),
            std::cmp::Ordering::Less
        );
        assert_ne!(
            compare_values(&LiteralValue::Number(5.0), &LiteralValue::text("a")),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn null_operand_compares_as_zero() {
        assert_eq!(
            compare_values(&LiteralValue::Empty, &LiteralValue::Number(0.0)),
            std::cmp::Ordering::Equal
        );
        assert_eq!(
            compare_values(&LiteralValue::Empty, &LiteralValue::Number(-1.0)),
            std::cmp::Ordering::Greater
        );
    }

    #[test]
    fn intersection_collapses_to_cell() {
        let a = Reference::Range(RangeRef {
            sheet: None,
            from: Corner::cell(1, 1),
            to: Corner::cell(3, 3),
        });
        let b = Reference::Range(RangeRef {
            sheet: None,
            from: Corner::cell(2, 2),
            to: Corner::cell(2, 2),
        });
        let r = shrink_intersection(&a, &b).unwrap();
        assert_eq!(r, Reference::Cell(CellRef::new(None, 2, 2).unwrap()));
    }

    #[test]
    fn disjoint_intersection_is_null() {
        let a = Reference::Cell(CellRef::new(None, 1, 1).unwrap());
        let b = Reference::Cell(CellRef::new(None, 5, 5).unwrap());
        assert_eq!(shrink_intersection(&a, &b).unwrap_err(), FormulaError::NULL);
    }

    #[test]
    fn extend_range_mixes_row_and_column_into_full_sheet() {
        let row = extend_range(None, RangeOperand::BareRow(1)).unwrap();
        let whole_col = Reference::Range(RangeRef {
            sheet: None,
            from: Corner::whole_col(1),
            to: Corner::whole_col(1),
        });
        let full = extend_range(Some(row), RangeOperand::Reference(whole_col)).unwrap();
        match full {
            Reference::Range(r) => assert!(r.is_full_sheet()),
            _ => panic!("expected range"),
        }
    }

    #[test]
    fn normal_two_cell_range() {
        let a = extend_range(
            None,
            RangeOperand::Reference(Reference::Cell(CellRef::new(None, 1, 1).unwrap())),
        )
        .unwrap();
        let full = extend_range(
            Some(a),
            RangeOperand::Reference(Reference::Cell(CellRef::new(None, 2, 2).unwrap())),
        )
        .unwrap();
        assert_eq!(
            full,
            Reference::Range(RangeRef {
                sheet: None,
                from: Corner::cell(1, 1),
                to: Corner::cell(2, 2),
            })
        );
    }

    use proptest::prelude::*;

    proptest! {
        /// SPEC_FULL §8: `=` on differing primitive types is always
        /// `false`, `<>` always `true` — for every number/bool/text
        /// combination, not just the one worked example.
        #[test]
        fn cross_type_equality_is_always_false(n in -1e6f64..1e6, b: bool, s in "[a-zA-Z]{0,8}") {
            let num = LiteralValue::Number(n);
            let boolean = LiteralValue::Boolean(b);
            let text = LiteralValue::text(s);
            for (x, y) in [(&num, &boolean), (&num, &text), (&boolean, &text)] {
                prop_assert_ne!(compare_values(x, y), std::cmp::Ordering::Equal);
            }
        }

        /// The coercion matrix's numeric path: `accept_number` agrees with
        /// Excel's bool-as-0-or-1 rule for every boolean, and round-trips
        /// any finite number unchanged.
        #[test]
        fn accept_number_coercion_matrix(n in -1e9f64..1e9, b: bool) {
            prop_assert_eq!(accept_number(&LiteralValue::Number(n)).unwrap(), n);
            prop_assert_eq!(
                accept_number(&LiteralValue::Boolean(b)).unwrap(),
                if b { 1.0 } else { 0.0 }
            );
        }

        /// An error operand always wins `first_error` regardless of which
        /// side it's on or what the other operand is.
        #[test]
        fn first_error_short_circuits_either_side(n in -1e6f64..1e6) {
            let err = LiteralValue::Error(FormulaError::VALUE);
            let num = LiteralValue::Number(n);
            prop_assert_eq!(first_error(&err, &num), Some(&FormulaError::VALUE));
            prop_assert_eq!(first_error(&num, &err), Some(&FormulaError::VALUE));
        }
    }
}
