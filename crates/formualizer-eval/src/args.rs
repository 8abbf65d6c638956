//! Argument coercion and flattening helpers (component I): `accept`,
//! `flattenParams`, wildcard-to-regex translation, and criteria parsing for
//! the `*IF`/`*IFS` family. Grounded in the shape of the teacher's
//! `args.rs` coercion pipeline, adapted from a schema-driven validator to
//! the simpler per-call `accept`/`flattenParams` pair this spec names.

use formualizer_common::{Array2D, Collection, FormulaError, LiteralValue, Reference};
use formualizer_parse::Token;

/// The coercion target for [`accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Array,
    Number,
    /// Like `Number` but a `Boolean` is *not* coerced (passed through as an
    /// error-free non-number instead), used by functions where `TRUE`/`FALSE`
    /// arguments are meaningless (e.g. text functions receiving a numeric
    /// argument by accident should not silently see `1`/`0`).
    NumberNoBoolean,
    String,
    Boolean,
}

/// An unevaluated argument: the token slice a `CONTEXT_FN` function decides
/// whether and how to evaluate. `None` marks an omitted argument (e.g. the
/// middle slot in `IF(A1,,3)`). `gaps` is the parent stream's `gap_before`
/// slice, parallel to `tokens` — carried along so implicit intersection
/// still sees the whitespace gaps between tokens once they're split out
/// into an argument sub-stream (the stripped token vector itself has no
/// whitespace tokens left to recompute gaps from).
#[derive(Debug, Clone, Copy)]
pub struct Arg<'t> {
    pub tokens: Option<&'t [Token]>,
    pub gaps: Option<&'t [bool]>,
}

impl<'t> Arg<'t> {
    pub fn omitted() -> Self {
        Arg { tokens: None, gaps: None }
    }
    pub fn is_omitted(&self) -> bool {
        self.tokens.is_none()
    }
}

/// An already-evaluated argument as a non-context function sees it:
/// a plain value (the common case — a reference has already been
/// dereferenced to its scalar/array), a value paired with the reference it
/// came from (only populated for `PRESERVE_REF` functions, and only when the
/// argument actually was a bare reference rather than e.g. a literal or
/// arithmetic expression), or a `Collection` produced by the union (`,`
/// inside parens) operator. A `Collection` only ever reaches a function
/// argument slot; it is rejected everywhere else (see `parser::Resolved`).
#[derive(Debug, Clone)]
pub enum ArgValue {
    Value(LiteralValue),
    Ref(Reference, LiteralValue),
    Union(Collection),
}

impl ArgValue {
    /// The value a scalar-oriented function sees: `#VALUE!` if this
    /// argument is a union, since most functions don't accept one.
    pub fn as_single(&self) -> Result<&LiteralValue, FormulaError> {
        match self {
            ArgValue::Value(v) => Ok(v),
            ArgValue::Ref(_, v) => Ok(v),
            ArgValue::Union(_) => Err(FormulaError::VALUE),
        }
    }

    pub fn into_single(self) -> Result<LiteralValue, FormulaError> {
        match self {
            ArgValue::Value(v) => Ok(v),
            ArgValue::Ref(_, v) => Ok(v),
            ArgValue::Union(_) => Err(FormulaError::VALUE),
        }
    }

    /// The reference this argument was resolved from, if any — populated
    /// only for `PRESERVE_REF` functions (e.g. `ISBLANK`) on a bare-reference
    /// argument.
    pub fn reference(&self) -> Option<&Reference> {
        match self {
            ArgValue::Ref(r, _) => Some(r),
            _ => None,
        }
    }
}

/// Coerce an already-evaluated, possibly-missing value to `target`.
///
/// - missing + no `default` → `#N/A`
/// - missing + `default` → `default`
/// - an error value always propagates, regardless of `target`
/// - a `Collection` always fails with `#VALUE!` — callers that accept
///   unions go through `flatten_params` instead
/// - otherwise the value is coerced per `target`, failing with `#VALUE!`
///   when it cannot be
pub fn accept(
    value: Option<&ArgValue>,
    target: ArgType,
    default: Option<LiteralValue>,
) -> Result<LiteralValue, FormulaError> {
    let value = match value {
        Some(v) => v.as_single()?,
        None => {
            return default.ok_or(FormulaError::NA);
        }
    };
    if let LiteralValue::Error(e) = value {
        return Err(e.clone());
    }
    coerce(value, target)
}

fn coerce(value: &LiteralValue, target: ArgType) -> Result<LiteralValue, FormulaError> {
    match target {
        ArgType::Array => match value {
            LiteralValue::Array(_) => Ok(value.clone()),
            other => Ok(LiteralValue::Array(Array2D::single(other.clone()))),
        },
        ArgType::Number => Ok(LiteralValue::Number(to_number(value, true)?)),
        ArgType::NumberNoBoolean => Ok(LiteralValue::Number(to_number(value, false)?)),
        ArgType::String => Ok(LiteralValue::Text(to_text(value))),
        ArgType::Boolean => Ok(LiteralValue::Boolean(to_bool(value)?)),
    }
}

fn to_number(value: &LiteralValue, allow_boolean: bool) -> Result<f64, FormulaError> {
    match value {
        LiteralValue::Number(n) => Ok(*n),
        LiteralValue::Boolean(b) if allow_boolean => Ok(if *b { 1.0 } else { 0.0 }),
        LiteralValue::Text(s) => s.trim().parse::<f64>().map_err(|_| FormulaError::VALUE),
        LiteralValue::Array(a) => to_number(a.get(0, 0).unwrap_or(&LiteralValue::Empty), allow_boolean),
        LiteralValue::Empty => Ok(0.0),
        _ => Err(FormulaError::VALUE),
    }
}

fn to_text(value: &LiteralValue) -> String {
    match value {
        LiteralValue::Text(s) => s.clone(),
        LiteralValue::Empty => String::new(),
        other => other.to_string(),
    }
}

fn to_bool(value: &LiteralValue) -> Result<bool, FormulaError> {
    match value {
        LiteralValue::Boolean(b) => Ok(*b),
        LiteralValue::Number(n) => Ok(*n != 0.0),
        LiteralValue::Text(s) => match s.to_ascii_uppercase().as_str() {
            "TRUE" => Ok(true),
            "FALSE" => Ok(false),
            _ => Err(FormulaError::VALUE),
        },
        LiteralValue::Empty => Ok(false),
        _ => Err(FormulaError::VALUE),
    }
}

/// Flatten a parameter list to a single vector of scalars coerced to
/// `target`. Unions only flatten when `allow_union` is set; otherwise a
/// union-shaped parameter is rejected with `#VALUE!`. Arrays always flatten
/// (row-major), including each element of a union member that is itself a
/// range (dereferenced to an `Array2D` upstream). Fails with `#VALUE!` if
/// fewer than `min_size` scalars result and no `default` is supplied to pad
/// with.
pub fn flatten_params(
    params: &[ArgValue],
    target: ArgType,
    allow_union: bool,
    default: Option<LiteralValue>,
    min_size: usize,
) -> Result<Vec<LiteralValue>, FormulaError> {
    let mut out = Vec::new();
    for p in params {
        match p {
            ArgValue::Value(v) | ArgValue::Ref(_, v) => push_flat(&mut out, v, target)?,
            ArgValue::Union(collection) => {
                if !allow_union {
                    return Err(FormulaError::VALUE);
                }
                for (v, _reference) in &collection.items {
                    push_flat(&mut out, v, target)?;
                }
            }
        }
    }
    while out.len() < min_size {
        match &default {
            Some(d) => out.push(d.clone()),
            None => return Err(FormulaError::VALUE),
        }
    }
    Ok(out)
}

fn push_flat(out: &mut Vec<LiteralValue>, v: &LiteralValue, target: ArgType) -> Result<(), FormulaError> {
    match v {
        LiteralValue::Array(a) => {
            for cell in a.iter() {
                out.push(coerce_or_error(cell, target)?);
            }
        }
        LiteralValue::Error(e) => return Err(e.clone()),
        other => out.push(coerce_or_error(other, target)?),
    }
    Ok(())
}

fn coerce_or_error(value: &LiteralValue, target: ArgType) -> Result<LiteralValue, FormulaError> {
    if let LiteralValue::Error(e) = value {
        return Err(e.clone());
    }
    coerce(value, target)
}

/// A parsed `*IF`/`*IFS` criteria predicate.
#[derive(Debug, Clone)]
pub enum Criteria {
    Eq(LiteralValue),
    Ne(LiteralValue),
    Gt(f64),
    Ge(f64),
    Lt(f64),
    Le(f64),
    Like(regex_lite::WildcardPattern),
    IsBlank,
}

/// Parse a criteria argument the way `SUMIF`/`AVERAGEIF`/`COUNTIF` do:
/// a leading comparison operator selects a relational predicate, `*`/`?`
/// wildcards (escaped by `~`) select a text-match predicate, and anything
/// else is an equality test.
pub fn parse_criteria(v: &LiteralValue) -> Result<Criteria, FormulaError> {
    match v {
        LiteralValue::Empty => Ok(Criteria::IsBlank),
        LiteralValue::Number(n) => Ok(Criteria::Eq(LiteralValue::Number(*n))),
        LiteralValue::Boolean(b) => Ok(Criteria::Eq(LiteralValue::Boolean(*b))),
        LiteralValue::Error(e) => Err(e.clone()),
        LiteralValue::Text(s) => {
            let s = s.trim();
            for (op, len) in [(">=", 2), ("<=", 2), ("<>", 2), (">", 1), ("<", 1), ("=", 1)] {
                if let Some(rhs) = s.strip_prefix(op) {
                    let rhs = rhs.trim();
                    if let Ok(n) = rhs.parse::<f64>() {
                        return Ok(match op {
                            ">=" => Criteria::Ge(n),
                            "<=" => Criteria::Le(n),
                            ">" => Criteria::Gt(n),
                            "<" => Criteria::Lt(n),
                            "=" => Criteria::Eq(LiteralValue::Number(n)),
                            "<>" => Criteria::Ne(LiteralValue::Number(n)),
                            _ => unreachable!(),
                        });
                    }
                    let lit = LiteralValue::Text(rhs.to_string());
                    let _ = len;
                    return Ok(match op {
                        "=" => Criteria::Eq(lit),
                        "<>" => Criteria::Ne(lit),
                        _ => Criteria::Eq(LiteralValue::Text(s.to_string())),
                    });
                }
            }
            if s.contains('*') || s.contains('?') || s.contains('~') {
                return Ok(Criteria::Like(regex_lite::WildcardPattern::compile(s)));
            }
            Ok(Criteria::Eq(LiteralValue::Text(s.to_string())))
        }
        LiteralValue::Array(a) => parse_criteria(a.get(0, 0).unwrap_or(&LiteralValue::Empty)),
    }
}

impl Criteria {
    pub fn matches(&self, value: &LiteralValue) -> bool {
        match self {
            Criteria::Eq(rhs) => values_equal(value, rhs),
            Criteria::Ne(rhs) => !values_equal(value, rhs),
            Criteria::Gt(n) => as_f64(value).map(|v| v > *n).unwrap_or(false),
            Criteria::Ge(n) => as_f64(value).map(|v| v >= *n).unwrap_or(false),
            Criteria::Lt(n) => as_f64(value).map(|v| v < *n).unwrap_or(false),
            Criteria::Le(n) => as_f64(value).map(|v| v <= *n).unwrap_or(false),
            Criteria::Like(pat) => match value {
                LiteralValue::Text(s) => pat.is_match(s),
                _ => false,
            },
            Criteria::IsBlank => matches!(value, LiteralValue::Empty),
        }
    }
}

fn as_f64(v: &LiteralValue) -> Option<f64> {
    match v {
        LiteralValue::Number(n) => Some(*n),
        _ => None,
    }
}

fn values_equal(a: &LiteralValue, b: &LiteralValue) -> bool {
    match (a, b) {
        (LiteralValue::Number(x), LiteralValue::Number(y)) => x == y,
        (LiteralValue::Boolean(x), LiteralValue::Boolean(y)) => x == y,
        (LiteralValue::Text(x), LiteralValue::Text(y)) => x.eq_ignore_ascii_case(y),
        (LiteralValue::Empty, LiteralValue::Empty) => true,
        _ => false,
    }
}

/// Minimal wildcard-to-regex translation, kept in-crate rather than adding
/// a dependency for three substitution rules: `*` → `.*`, `?` → `.`,
/// `~*`/`~?`/`~~` escape the literal character.
pub mod regex_lite {
    #[derive(Debug, Clone)]
    pub struct WildcardPattern {
        segments: Vec<Seg>,
    }

    #[derive(Debug, Clone)]
    enum Seg {
        Literal(String),
        AnyRun,
        AnyOne,
    }

    impl WildcardPattern {
        pub fn compile(pattern: &str) -> Self {
            let mut segments = Vec::new();
            let mut literal = String::new();
            let mut chars = pattern.chars().peekable();
            while let Some(c) = chars.next() {
                match c {
                    '~' => {
                        if let Some(&next) = chars.peek() {
                            if next == '*' || next == '?' || next == '~' {
                                literal.push(next);
                                chars.next();
                                continue;
                            }
                        }
                        literal.push('~');
                    }
                    '*' => {
                        if !literal.is_empty() {
                            segments.push(Seg::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Seg::AnyRun);
                    }
                    '?' => {
                        if !literal.is_empty() {
                            segments.push(Seg::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Seg::AnyOne);
                    }
                    other => literal.push(other),
                }
            }
            if !literal.is_empty() {
                segments.push(Seg::Literal(literal));
            }
            WildcardPattern { segments }
        }

        pub fn is_match(&self, text: &str) -> bool {
            let chars: Vec<char> = text.chars().collect();
            match_from(&self.segments, &chars, 0).is_some()
        }
    }

    /// Matches the whole of `text` against `segs` starting at `pos`
    /// (Excel wildcard criteria always match the full cell text, never a
    /// substring).
    fn match_from(segs: &[Seg], text: &[char], pos: usize) -> Option<usize> {
        let Some((first, rest)) = segs.split_first() else {
            return (pos == text.len()).then_some(pos);
        };
        match first {
            Seg::Literal(lit) => {
                let lit_chars: Vec<char> = lit.chars().collect();
                if text[pos..].len() < lit_chars.len() {
                    return None;
                }
                let window = &text[pos..pos + lit_chars.len()];
                let matches = window
                    .iter()
                    .zip(lit_chars.iter())
                    .all(|(a, b)| a.to_ascii_lowercase() == b.to_ascii_lowercase());
                if matches {
                    match_from(rest, text, pos + lit_chars.len())
                } else {
                    None
                }
            }
            Seg::AnyOne => {
                if pos < text.len() {
                    match_from(rest, text, pos + 1)
                } else {
                    None
                }
            }
            Seg::AnyRun => {
                for try_pos in pos..=text.len() {
                    if let Some(end) = match_from(rest, text, try_pos) {
                        return Some(end);
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_missing_with_default() {
        let v = accept(None, ArgType::Number, Some(LiteralValue::Number(7.0))).unwrap();
        assert_eq!(v, LiteralValue::Number(7.0));
    }

    #[test]
    fn accept_missing_without_default_is_na() {
        let err = accept(None, ArgType::Number, None).unwrap_err();
        assert_eq!(err, FormulaError::NA);
    }

    #[test]
    fn accept_boolean_as_number() {
        let v = accept(
            Some(&ArgValue::Value(LiteralValue::Boolean(true))),
            ArgType::Number,
            None,
        )
        .unwrap();
        assert_eq!(v, LiteralValue::Number(1.0));
    }

    #[test]
    fn wildcard_prefix_match() {
        let pat = regex_lite::WildcardPattern::compile("a*");
        assert!(pat.is_match("apple"));
        assert!(!pat.is_match("banana"));
    }

    #[test]
    fn wildcard_escaped_literal_star() {
        let pat = regex_lite::WildcardPattern::compile("100~%");
        assert!(pat.is_match("100%"));
        assert!(!pat.is_match("100x"));
    }

    #[test]
    fn criteria_relational_prefix() {
        let c = parse_criteria(&LiteralValue::text(">=10")).unwrap();
        assert!(c.matches(&LiteralValue::Number(10.0)));
        assert!(!c.matches(&LiteralValue::Number(9.0)));
    }

    #[test]
    fn flatten_params_flattens_arrays() {
        let arr = ArgValue::Value(LiteralValue::Array(
            Array2D::new(vec![vec![LiteralValue::Number(1.0), LiteralValue::Number(2.0)]]).unwrap(),
        ));
        let flat = flatten_params(&[arr], ArgType::Number, false, None, 1).unwrap();
        assert_eq!(flat, vec![LiteralValue::Number(1.0), LiteralValue::Number(2.0)]);
    }

    #[test]
    fn flatten_params_rejects_union_unless_allowed() {
        let collection = Collection::new(vec![
            (LiteralValue::Number(1.0), test_reference()),
            (LiteralValue::Number(2.0), test_reference()),
        ]);
        let union = ArgValue::Union(collection.clone());
        assert_eq!(
            flatten_params(&[union], ArgType::Number, false, None, 1).unwrap_err(),
            FormulaError::VALUE
        );

        let union = ArgValue::Union(collection);
        let flat = flatten_params(&[union], ArgType::Number, true, None, 1).unwrap();
        assert_eq!(flat, vec![LiteralValue::Number(1.0), LiteralValue::Number(2.0)]);
    }

    fn test_reference() -> formualizer_common::Reference {
        formualizer_common::Reference::Cell(formualizer_common::CellRef::new(None, 1, 1).unwrap())
    }
}
