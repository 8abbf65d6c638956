//! The recursive-descent parser/evaluator (component D, fused with the
//! operator algebra and value-dispatch layers — components E and F — since
//! this grammar evaluates as it recurses rather than building a tree).
//!
//! Grammar (highest to lowest binding):
//! ```text
//! formula   := intersect ((cmp|concat|add|mul|pow) intersect)*
//! intersect := range (SPACE_GAP range)*
//! range     := percent (":" percent)+ | percent
//! percent   := unary ("%")?
//! unary     := ("+"|"-")* atom
//! atom      := reference | "(" formula ("," formula)* ")"
//!            | constant | functionCall | constantArray
//! ```
//! The binary-operator chain at the `formula` level is collected flat, then
//! folded in precedence passes (`^`, then `*`/`/`, then `+`/`-`, then `&`,
//! then comparisons) rather than recursed level by level.

use std::cell::RefCell;

use formualizer_common::{
    Array2D, CellRef, Collection, Corner, ErrorKind, FormulaError, LiteralValue, RangeRef,
    Reference,
};
use formualizer_parse::{tokenize, Token, TokenKind};
use smallvec::SmallVec;

use crate::args::{Arg, ArgValue};
use crate::function::FnCaps;
use crate::function_registry;
use crate::host::Host;
use crate::reference_ops::{
    accept_number, check_formula_result, compare_values, concat_text, extend_range,
    extract_ref_value, first_error, retrieve_ref, shrink_intersection, RangeOperand,
};

/// Either shape an expression can still be in before a scalar consumer
/// forces it down to a value: a reference (cell/range still unresolved), an
/// already-dereferenced value, or a union (`,` inside parens) of references
/// — the only context a `Collection` is allowed to survive in on its way to
/// a function argument slot.
#[derive(Debug, Clone)]
pub enum Resolved {
    Value(LiteralValue),
    Ref(Reference),
    Union(Collection),
}

impl Resolved {
    pub fn into_value(self, host: &dyn Host) -> LiteralValue {
        match self {
            Resolved::Value(v) => v,
            Resolved::Ref(r) => extract_ref_value(host, &r),
            Resolved::Union(_) => LiteralValue::Error(FormulaError::VALUE),
        }
    }

    fn into_retrieved(self, host: &dyn Host) -> LiteralValue {
        match self {
            Resolved::Value(v) => v,
            Resolved::Ref(r) => retrieve_ref(host, &r),
            Resolved::Union(_) => LiteralValue::Error(FormulaError::VALUE),
        }
    }
}

/// Parses and evaluates formula text against a [`Host`]. Owns no
/// per-parse cursor state itself — `eval_tokens` spins up a fresh internal
/// cursor over whatever token slice it's given, which is what lets
/// context-aware functions (`IF`, `INDEX`, ...) ask for exactly the
/// arguments they need, in whatever order, without the evaluator having
/// already walked past them.
pub struct Evaluator<'h> {
    pub host: &'h dyn Host,
    /// The cell this formula is anchored at, if any — feeds `ROW()` /
    /// `COLUMN()` when called with no arguments.
    pub position: Option<CellRef>,
    /// When set, function calls don't dispatch to their real
    /// implementation: every argument is still walked (so every branch of
    /// a branching function contributes its references) but the call
    /// itself returns a stub `0` instead of running. Used by the
    /// dependency-extraction pass.
    pub dependency_mode: bool,
    /// When set, an unrecognized function name doesn't fail the whole
    /// formula with `#NAME?` — it's logged to `unresolved_log` and
    /// evaluates to a stub `0`, so a single unported function doesn't
    /// block evaluating everything around it while a test suite is being
    /// bootstrapped.
    pub test_mode: bool,
    unresolved_log: RefCell<Vec<String>>,
    /// The top-level formula body (post `=` strip) for the call currently
    /// in progress, kept around so a syntax error raised while evaluating
    /// a nested argument slice — whose tokens carry offsets into this same
    /// text — can still render a caret diagram against it.
    source: RefCell<String>,
}

impl<'h> Evaluator<'h> {
    pub fn new(host: &'h dyn Host) -> Self {
        Evaluator {
            host,
            position: None,
            dependency_mode: false,
            test_mode: false,
            unresolved_log: RefCell::new(Vec::new()),
            source: RefCell::new(String::new()),
        }
    }

    pub fn with_position(mut self, position: CellRef) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_dependency_mode(mut self, on: bool) -> Self {
        self.dependency_mode = on;
        self
    }

    pub fn with_test_mode(mut self, on: bool) -> Self {
        self.test_mode = on;
        self
    }

    /// Function names `parse_function_call` couldn't resolve while
    /// `test_mode` was on, in first-seen order with duplicates kept (a
    /// caller tallying frequency wants the repeats).
    pub fn unresolved_functions(&self) -> Vec<String> {
        self.unresolved_log.borrow().clone()
    }

    /// Parse and evaluate a complete formula. `text` may or may not carry
    /// a leading `=`. Never panics — lexer/grammar failures become
    /// `#ERROR!` values, matching how this engine reports unrecoverable
    /// formula errors.
    pub fn evaluate(&mut self, text: &str, allow_return_array: bool) -> LiteralValue {
        let body = text.strip_prefix('=').unwrap_or(text);
        self.source.replace(body.to_string());
        let stream = match Stream::build(body) {
            Ok(s) => s,
            Err(e) => return LiteralValue::Error(e),
        };
        if stream.toks.is_empty() {
            return LiteralValue::Error(FormulaError::with_details(
                ErrorKind::Error,
                "empty formula",
            ));
        }
        let default_sheet = self.host.default_sheet();
        let mut cursor = Cursor {
            stream: &stream,
            pos: 0,
            default_sheet,
            source: body,
        };
        let result = match cursor.parse_formula(self) {
            Ok(r) => r.into_retrieved(self.host),
            Err(e) => LiteralValue::Error(e),
        };
        if cursor.pos != stream.toks.len() {
            return LiteralValue::Error(cursor.syntax_error("unexpected trailing input"));
        }
        check_formula_result(result, allow_return_array)
    }

    /// Evaluate an argument thunk down to a value, dereferencing any
    /// reference it names (used by ordinary, non-context functions, and by
    /// context functions for the arguments they DO want dereferenced). A
    /// union argument is an error here — scalar consumers of `eval_arg`
    /// never accept one; context functions that do (none in the builtin
    /// catalogue today) should use [`Evaluator::eval_arg_resolved`].
    pub fn eval_arg(&mut self, arg: &Arg<'_>) -> LiteralValue {
        let (Some(tokens), Some(gaps)) = (arg.tokens, arg.gaps) else {
            return LiteralValue::Empty;
        };
        self.eval_token_slice(tokens, gaps).map_or_else(
            LiteralValue::Error,
            |r| check_formula_result(r.into_retrieved(self.host), true),
        )
    }

    /// Evaluate an argument thunk without forcing it down to a scalar/array
    /// value, preserving whether it was a reference or a union. Omitted
    /// arguments become `Resolved::Value(Empty)`; a sub-parse error becomes
    /// `Resolved::Value(Error(..))` rather than propagating, matching how
    /// `eval_arg` folds errors into the value channel.
    pub fn eval_arg_resolved(&mut self, arg: &Arg<'_>) -> Resolved {
        let (Some(tokens), Some(gaps)) = (arg.tokens, arg.gaps) else {
            return Resolved::Value(LiteralValue::Empty);
        };
        match self.eval_token_slice(tokens, gaps) {
            Ok(r) => r,
            Err(e) => Resolved::Value(LiteralValue::Error(e)),
        }
    }

    /// Evaluate an argument thunk down to a reference without
    /// dereferencing it, for the `NO_DATA_RETRIEVE` functions (`ROW`,
    /// `COLUMN`, `INDEX`, ...) that need the address rather than the data
    /// at it.
    pub fn ref_of_arg(&mut self, arg: &Arg<'_>) -> Result<Reference, FormulaError> {
        let tokens = arg.tokens.ok_or(FormulaError::NA)?;
        let gaps = arg.gaps.ok_or(FormulaError::NA)?;
        match self.eval_token_slice(tokens, gaps)? {
            Resolved::Ref(r) => Ok(r),
            Resolved::Value(_) | Resolved::Union(_) => Err(FormulaError::VALUE),
        }
    }

    fn log_unresolved(&self, name: &str) {
        self.unresolved_log.borrow_mut().push(name.to_string());
    }

    fn eval_token_slice(&mut self, tokens: &[Token], gaps: &[bool]) -> Result<Resolved, FormulaError> {
        let stream = Stream::from_parts(tokens, gaps);
        if stream.toks.is_empty() {
            return Ok(Resolved::Value(LiteralValue::Empty));
        }
        let default_sheet = self.host.default_sheet();
        let source = self.source.borrow().clone();
        let mut cursor = Cursor {
            stream: &stream,
            pos: 0,
            default_sheet,
            source: &source,
        };
        let result = cursor.parse_formula(self)?;
        if cursor.pos != stream.toks.len() {
            return Err(cursor.syntax_error("unexpected trailing input in argument"));
        }
        Ok(result)
    }
}

/// A lossless token stream with whitespace gaps hoisted into a parallel
/// bit-vector instead of interleaved tokens — equivalent information to
/// keeping explicit whitespace tokens, easier to index into from a
/// recursive-descent cursor.
struct Stream {
    toks: Vec<Token>,
    gap_before: Vec<bool>,
}

impl Stream {
    fn build(text: &str) -> Result<Self, FormulaError> {
        let all = tokenize(text).map_err(|e| {
            let (line, col, line_text) = locate(text, e.pos);
            FormulaError::syntax(e.message, line, col, line_text)
        })?;
        Ok(Self::from_tokens(&all))
    }

    fn from_tokens(all: &[Token]) -> Self {
        let mut toks = Vec::with_capacity(all.len());
        let mut gap_before = Vec::with_capacity(all.len());
        let mut pending_gap = false;
        for t in all {
            if t.kind == TokenKind::WhiteSpace {
                pending_gap = true;
                continue;
            }
            toks.push(t.clone());
            gap_before.push(pending_gap);
            pending_gap = false;
        }
        Stream { toks, gap_before }
    }

    /// Build a sub-stream from a slice already produced by
    /// [`Cursor::split_call_args`]: `toks` is already whitespace-stripped
    /// and `gaps` is its parallel `gap_before` slice lifted straight from
    /// the parent stream, so no whitespace recomputation happens (there's
    /// no whitespace left in `toks` to recompute it from).
    fn from_parts(toks: &[Token], gaps: &[bool]) -> Self {
        Stream {
            toks: toks.to_vec(),
            gap_before: gaps.to_vec(),
        }
    }
}

struct Cursor<'s> {
    stream: &'s Stream,
    pos: usize,
    default_sheet: Option<String>,
    /// The formula text the current token stream's byte offsets are
    /// relative to — the full top-level body even when `stream` only
    /// covers one argument's token slice, since tokens are never
    /// re-tokenized once split out of the top-level parse.
    source: &'s str,
}

/// Resolve a byte offset into `source` to a 1-based `(line, col)` pair plus
/// the text of that line, for [`FormulaError::syntax`]'s caret diagram.
fn locate(source: &str, byte_offset: usize) -> (usize, usize, &str) {
    let offset = byte_offset.min(source.len());
    let mut line = 1;
    let mut line_start = 0;
    for (i, b) in source.bytes().enumerate() {
        if i >= offset {
            break;
        }
        if b == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    let line_end = source[line_start..]
        .find('\n')
        .map(|i| line_start + i)
        .unwrap_or(source.len());
    (line, offset - line_start + 1, &source[line_start..line_end])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Pow,
    Mul,
    Div,
    Add,
    Sub,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

enum ChainItem {
    Operand(Resolved),
    Op(BinOp),
}

impl<'s> Cursor<'s> {
    fn current(&self) -> Option<&Token> {
        self.stream.toks.get(self.pos)
    }
    fn gap_before_current(&self) -> bool {
        self.stream.gap_before.get(self.pos).copied().unwrap_or(false)
    }
    fn advance(&mut self) -> Option<Token> {
        let t = self.stream.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }
    fn at_end(&self) -> bool {
        self.pos >= self.stream.toks.len()
    }
    fn is_punct(&self, text: &str) -> bool {
        matches!(self.current(), Some(t) if t.kind == TokenKind::Punct && t.text == text)
    }
    fn syntax_error(&self, message: impl Into<String>) -> FormulaError {
        let byte_offset = self
            .current()
            .map(|t| t.start)
            .unwrap_or(self.source.len());
        let (line, col, line_text) = locate(self.source, byte_offset);
        FormulaError::syntax(message, line, col, line_text)
    }

    // --- formula ---

    fn parse_formula(&mut self, ev: &mut Evaluator<'_>) -> Result<Resolved, FormulaError> {
        // Most formulas chain a handful of operators at most; `SmallVec`
        // avoids a heap allocation for the common case the way the
        // teacher's own recursive-descent cursor stack does.
        let mut chain: SmallVec<[ChainItem; 8]> = SmallVec::new();
        chain.push(ChainItem::Operand(self.parse_intersect(ev)?));
        loop {
            let Some(op) = self.peek_binop() else { break };
            self.advance();
            chain.push(ChainItem::Op(op));
            chain.push(ChainItem::Operand(self.parse_intersect(ev)?));
        }
        let chain = self.fold_level(ev, chain, &[BinOp::Pow])?;
        let chain = self.fold_level(ev, chain, &[BinOp::Mul, BinOp::Div])?;
        let chain = self.fold_level(ev, chain, &[BinOp::Add, BinOp::Sub])?;
        let chain = self.fold_level(ev, chain, &[BinOp::Concat])?;
        let chain = self.fold_level(
            ev,
            chain,
            &[BinOp::Eq, BinOp::Ne, BinOp::Lt, BinOp::Le, BinOp::Gt, BinOp::Ge],
        )?;
        match chain.into_iter().next() {
            Some(ChainItem::Operand(r)) => Ok(r),
            _ => unreachable!("fold_level always leaves exactly one operand"),
        }
    }

    fn peek_binop(&self) -> Option<BinOp> {
        let t = self.current()?;
        if t.kind != TokenKind::Operator {
            return None;
        }
        Some(match t.text.as_str() {
            "^" => BinOp::Pow,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "&" => BinOp::Concat,
            "=" => BinOp::Eq,
            "<>" => BinOp::Ne,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            ">" => BinOp::Gt,
            ">=" => BinOp::Ge,
            _ => return None,
        })
    }

    fn fold_level(
        &mut self,
        ev: &mut Evaluator<'_>,
        chain: SmallVec<[ChainItem; 8]>,
        ops: &[BinOp],
    ) -> Result<SmallVec<[ChainItem; 8]>, FormulaError> {
        let mut out = SmallVec::new();
        let mut iter = chain.into_iter();
        let mut acc = match iter.next() {
            Some(ChainItem::Operand(r)) => r,
            _ => unreachable!("chain always starts with an operand"),
        };
        while let Some(item) = iter.next() {
            let op = match item {
                ChainItem::Op(o) => o,
                _ => unreachable!("operands and operators strictly alternate"),
            };
            let rhs = match iter.next() {
                Some(ChainItem::Operand(r)) => r,
                _ => unreachable!("every operator is followed by an operand"),
            };
            if ops.contains(&op) {
                let a = acc.into_value(ev.host);
                let b = rhs.into_value(ev.host);
                acc = Resolved::Value(apply_binop(op, a, b)?);
            } else {
                out.push(ChainItem::Operand(acc));
                out.push(ChainItem::Op(op));
                acc = rhs;
            }
        }
        out.push(ChainItem::Operand(acc));
        Ok(out)
    }

    // --- intersect ---

    fn parse_intersect(&mut self, ev: &mut Evaluator<'_>) -> Result<Resolved, FormulaError> {
        let mut acc = self.parse_range(ev)?;
        loop {
            if self.at_end() || !self.gap_before_current() || !self.token_starts_atom() {
                break;
            }
            let rhs = self.parse_range(ev)?;
            let a_ref = require_reference(acc)?;
            let b_ref = require_reference(rhs)?;
            acc = Resolved::Ref(shrink_intersection(&a_ref, &b_ref)?);
        }
        Ok(acc)
    }

    fn token_starts_atom(&self) -> bool {
        match self.current() {
            Some(t) => matches!(
                t.kind,
                TokenKind::SheetQuoted
                    | TokenKind::Sheet
                    | TokenKind::Cell
                    | TokenKind::Column
                    | TokenKind::Name
                    | TokenKind::Function
                    | TokenKind::Number
                    | TokenKind::String
                    | TokenKind::Boolean
                    | TokenKind::FormulaError
            ) || (t.kind == TokenKind::Punct && (t.text == "(" || t.text == "{")),
            None => false,
        }
    }

    // --- range ---

    fn parse_range(&mut self, ev: &mut Evaluator<'_>) -> Result<Resolved, FormulaError> {
        let first = self.parse_percent(ev)?;
        if !self.is_punct(":") {
            return Ok(first);
        }
        let mut current = extend_range(None, to_range_operand(first)?)?;
        while self.is_punct(":") {
            self.advance();
            let next = self.parse_percent(ev)?;
            current = extend_range(Some(current), to_range_operand(next)?)?;
        }
        Ok(Resolved::Ref(current))
    }

    // --- percent ---

    fn parse_percent(&mut self, ev: &mut Evaluator<'_>) -> Result<Resolved, FormulaError> {
        let value = self.parse_unary(ev)?;
        if matches!(self.current(), Some(t) if t.kind == TokenKind::Operator && t.text == "%") {
            self.advance();
            let n = accept_number(&value.into_value(ev.host))?;
            return Ok(Resolved::Value(LiteralValue::Number(n / 100.0)));
        }
        Ok(value)
    }

    // --- unary ---

    fn parse_unary(&mut self, ev: &mut Evaluator<'_>) -> Result<Resolved, FormulaError> {
        let mut negate = false;
        let mut any_minus = false;
        while let Some(t) = self.current() {
            if t.kind == TokenKind::Operator && t.text == "+" {
                self.advance();
            } else if t.kind == TokenKind::Operator && t.text == "-" {
                any_minus = true;
                negate = !negate;
                self.advance();
            } else {
                break;
            }
        }
        let atom = self.parse_atom(ev)?;
        // A net `-` forces numeric coercion (and negates); a run of only
        // `+` signs passes the operand through unchanged, even if it's
        // non-numeric — `+` is not itself a numeric operator.
        if !any_minus {
            return Ok(atom);
        }
        let n = accept_number(&atom.into_value(ev.host))?;
        Ok(Resolved::Value(LiteralValue::Number(if negate { -n } else { n })))
    }

    // --- atom ---

    fn parse_atom(&mut self, ev: &mut Evaluator<'_>) -> Result<Resolved, FormulaError> {
        let Some(tok) = self.current().cloned() else {
            return Err(self.syntax_error("unexpected end of formula"));
        };

        match tok.kind {
            TokenKind::SheetQuoted | TokenKind::Sheet => {
                let sheet = unquote_sheet(&tok.text);
                self.advance();
                if !self.is_punct("!") {
                    return Err(self.syntax_error("expected '!' after sheet name"));
                }
                self.advance();
                self.parse_reference_atom(Some(sheet))
            }
            TokenKind::Cell => {
                self.advance();
                parse_cell(&tok.text, self.default_sheet.clone()).map(Resolved::Ref)
            }
            TokenKind::Column => {
                self.advance();
                parse_column(&tok.text, self.default_sheet.clone()).map(Resolved::Ref)
            }
            TokenKind::Number => {
                self.advance();
                tok.text
                    .parse::<f64>()
                    .map(|n| Resolved::Value(LiteralValue::Number(n)))
                    .map_err(|_| FormulaError::VALUE)
            }
            TokenKind::String => {
                self.advance();
                Ok(Resolved::Value(LiteralValue::Text(unescape_double_quoted(&tok.text))))
            }
            TokenKind::SingleQuotedString => {
                self.advance();
                Ok(Resolved::Value(LiteralValue::Text(unescape_single_quoted(&tok.text))))
            }
            TokenKind::Boolean => {
                self.advance();
                Ok(Resolved::Value(LiteralValue::Boolean(
                    tok.text.eq_ignore_ascii_case("TRUE"),
                )))
            }
            TokenKind::FormulaError => {
                self.advance();
                let kind = ErrorKind::parse(&tok.text).unwrap_or(ErrorKind::Error);
                Ok(Resolved::Value(LiteralValue::Error(FormulaError::new(kind))))
            }
            TokenKind::Function => {
                self.advance();
                self.parse_function_call(ev, &tok.text)
            }
            TokenKind::Name => {
                self.advance();
                match ev.host.on_variable(&tok.text) {
                    Some(r) => Ok(Resolved::Ref(r)),
                    None => Err(FormulaError::NAME),
                }
            }
            TokenKind::Punct if tok.text == "(" => {
                self.advance();
                self.parse_paren_group(ev)
            }
            TokenKind::Punct if tok.text == "{" => self.parse_array_literal(),
            _ => Err(self.syntax_error(format!("unexpected token {:?}", tok.text))),
        }
    }

    fn parse_reference_atom(&mut self, sheet: Option<String>) -> Result<Resolved, FormulaError> {
        let Some(tok) = self.current().cloned() else {
            return Err(self.syntax_error("expected a reference after sheet prefix"));
        };
        match tok.kind {
            TokenKind::Cell => {
                self.advance();
                parse_cell(&tok.text, sheet).map(Resolved::Ref)
            }
            TokenKind::Column => {
                self.advance();
                parse_column(&tok.text, sheet).map(Resolved::Ref)
            }
            _ => Err(self.syntax_error("expected a cell or column reference")),
        }
    }

    fn parse_paren_group(&mut self, ev: &mut Evaluator<'_>) -> Result<Resolved, FormulaError> {
        let mut members = vec![self.parse_formula(ev)?];
        while self.is_punct(",") {
            self.advance();
            members.push(self.parse_formula(ev)?);
        }
        if !self.is_punct(")") {
            return Err(self.syntax_error("expected ')'"));
        }
        self.advance();

        if members.len() == 1 {
            return Ok(members.into_iter().next().unwrap());
        }

        // Union: every member must be a reference; a non-reference member
        // is a `#VALUE!` in this context, per the union operator's contract.
        // Nested unions (e.g. `((A1,B1),C1)`) flatten into one collection.
        let mut items = Vec::with_capacity(members.len());
        for m in members {
            match m {
                Resolved::Ref(r) => {
                    let value = retrieve_ref(ev.host, &r);
                    items.push((value, r));
                }
                Resolved::Union(inner) => items.extend(inner.items),
                Resolved::Value(LiteralValue::Error(e)) => return Err(e),
                Resolved::Value(_) => return Err(FormulaError::VALUE),
            }
        }
        Ok(Resolved::Union(Collection::new(items)))
    }

    fn parse_array_literal(&mut self) -> Result<Resolved, FormulaError> {
        self.advance(); // consume '{'
        let mut rows: Vec<Vec<LiteralValue>> = vec![Vec::new()];
        loop {
            let Some(tok) = self.current().cloned() else {
                return Err(self.syntax_error("unterminated array literal"));
            };
            match tok.kind {
                TokenKind::Punct if tok.text == "}" => {
                    self.advance();
                    break;
                }
                TokenKind::Punct if tok.text == "," => {
                    self.advance();
                }
                TokenKind::Punct if tok.text == ";" => {
                    self.advance();
                    rows.push(Vec::new());
                }
                _ => {
                    let v = self.parse_array_member()?;
                    rows.last_mut().unwrap().push(v);
                }
            }
        }
        Array2D::new(rows).map(|a| Resolved::Value(LiteralValue::Array(a)))
    }

    fn parse_array_member(&mut self) -> Result<LiteralValue, FormulaError> {
        let mut negate = false;
        while let Some(t) = self.current() {
            if t.kind == TokenKind::Operator && (t.text == "+" || t.text == "-") {
                if t.text == "-" {
                    negate = !negate;
                }
                self.advance();
            } else {
                break;
            }
        }
        let Some(tok) = self.current().cloned() else {
            return Err(self.syntax_error("expected an array literal member"));
        };
        let value = match tok.kind {
            TokenKind::Number => {
                self.advance();
                let n: f64 = tok.text.parse().map_err(|_| FormulaError::VALUE)?;
                LiteralValue::Number(if negate { -n } else { n })
            }
            TokenKind::String => {
                self.advance();
                LiteralValue::Text(unescape_double_quoted(&tok.text))
            }
            TokenKind::Boolean => {
                self.advance();
                LiteralValue::Boolean(tok.text.eq_ignore_ascii_case("TRUE"))
            }
            TokenKind::FormulaError => {
                self.advance();
                let kind = ErrorKind::parse(&tok.text).unwrap_or(ErrorKind::Error);
                LiteralValue::Error(FormulaError::new(kind))
            }
            _ => return Err(self.syntax_error("array literals only allow constants")),
        };
        Ok(value)
    }

    fn parse_function_call(
        &mut self,
        ev: &mut Evaluator<'_>,
        raw_name: &str,
    ) -> Result<Resolved, FormulaError> {
        if !self.is_punct("(") {
            return Err(self.syntax_error("expected '(' after function name"));
        }
        self.advance();

        let name = raw_name.strip_prefix("_xlfn.").unwrap_or(raw_name);
        let arg_slices = self.split_call_args()?;

        let args: Vec<Arg<'_>> = arg_slices
            .into_iter()
            .map(|(toks, gaps)| Arg {
                tokens: if toks.is_empty() { None } else { Some(toks) },
                gaps: if toks.is_empty() { None } else { Some(gaps) },
            })
            .collect();

        // Dependency mode never runs a function's real logic. Every
        // function is walked as if it were `CONTEXT_FN` so that *every*
        // branch of a branching function (`IF`, `CHOOSE`, ...) contributes
        // its references, not just the one the real condition would take;
        // the call itself resolves to a stub so an unresolvable or
        // not-yet-ported function can't abort dependency extraction.
        if ev.dependency_mode {
            for a in &args {
                if !a.is_omitted() {
                    let _ = ev.eval_arg_resolved(a);
                }
            }
            return Ok(Resolved::Value(LiteralValue::Number(0.0)));
        }

        let func = match function_registry::get(name) {
            Some(f) => f,
            None if ev.test_mode => {
                ev.log_unresolved(name);
                return Ok(Resolved::Value(LiteralValue::Number(0.0)));
            }
            None => return Err(FormulaError::unknown_function(name)),
        };

        if func.caps().contains(FnCaps::CONTEXT_FN) {
            func.call_with_context(ev, &args).map(Resolved::Value)
        } else {
            let preserve_ref = func.caps().contains(FnCaps::PRESERVE_REF);
            let null_as_zero = func.caps().contains(FnCaps::NULL_AS_ZERO);
            let mut values = Vec::with_capacity(args.len());
            for a in &args {
                if a.is_omitted() {
                    values.push(ArgValue::Value(if null_as_zero {
                        LiteralValue::Number(0.0)
                    } else {
                        LiteralValue::Text(String::new())
                    }));
                    continue;
                }
                let resolved = ev.eval_arg_resolved(a);
                values.push(resolved_to_argvalue(ev.host, preserve_ref, resolved));
            }
            func.call(&values).map(Resolved::Value)
        }
    }

    /// Split the tokens between the already-consumed `(` and its matching
    /// `)` into comma-separated argument slices, tracking nested
    /// parens/braces so a nested call's own commas don't split early.
    /// Leaves the cursor just past the matching `)`. Each slice is paired
    /// with the parallel slice of `self.stream.gap_before` covering the
    /// same tokens, so implicit intersection still works once the argument
    /// is parsed as its own sub-stream (see [`Stream::from_parts`]).
    fn split_call_args(&mut self) -> Result<Vec<(&'s [Token], &'s [bool])>, FormulaError> {
        let start = self.pos;
        let mut depth = 0i32;
        let mut arg_starts = vec![start];
        let mut end = None;
        let mut i = start;
        while i < self.stream.toks.len() {
            let t = &self.stream.toks[i];
            if t.kind == TokenKind::Punct {
                match t.text.as_str() {
                    "(" | "{" => depth += 1,
                    ")" => {
                        if depth == 0 {
                            end = Some(i);
                            break;
                        }
                        depth -= 1;
                    }
                    "}" => depth -= 1,
                    "," if depth == 0 => arg_starts.push(i + 1),
                    _ => {}
                }
            }
            i += 1;
        }
        let Some(end) = end else {
            return Err(self.syntax_error("unterminated function call"));
        };
        let mut slices = Vec::with_capacity(arg_starts.len());
        let mut bounds = arg_starts.clone();
        bounds.push(end);
        for w in bounds.windows(2) {
            let (s, e) = (w[0], w[1]);
            let slice_end = if e == end { e } else { e - 1 };
            slices.push((
                &self.stream.toks[s..slice_end],
                &self.stream.gap_before[s..slice_end],
            ));
        }
        // A call with zero arguments, e.g. `NOW()`, still produces one
        // "argument start" at `start == end`; drop the spurious empty slot.
        if slices.len() == 1 && slices[0].0.is_empty() && start == end {
            slices.clear();
        }
        self.pos = end + 1;
        Ok(slices)
    }
}

fn require_reference(r: Resolved) -> Result<Reference, FormulaError> {
    match r {
        Resolved::Ref(r) => Ok(r),
        Resolved::Value(LiteralValue::Error(e)) => Err(e),
        Resolved::Value(_) => Err(FormulaError::VALUE),
        Resolved::Union(_) => Err(FormulaError::VALUE),
    }
}

fn to_range_operand(r: Resolved) -> Result<RangeOperand, FormulaError> {
    match r {
        Resolved::Ref(r) => Ok(RangeOperand::Reference(r)),
        Resolved::Value(LiteralValue::Number(n)) if n >= 1.0 && n.fract() == 0.0 => {
            Ok(RangeOperand::BareRow(n as u32))
        }
        Resolved::Value(LiteralValue::Error(e)) => Err(e),
        Resolved::Value(_) => Err(FormulaError::REF),
        Resolved::Union(_) => Err(FormulaError::REF),
    }
}

/// Turn a resolved argument expression into what a non-`CONTEXT_FN`
/// function actually receives: a union survives as-is, a reference is
/// dereferenced (and kept alongside its value for `PRESERVE_REF`
/// functions), and a plain value passes through `check_formula_result` the
/// same way a top-level formula result would.
fn resolved_to_argvalue(host: &dyn Host, preserve_ref: bool, r: Resolved) -> ArgValue {
    match r {
        Resolved::Union(c) => ArgValue::Union(c),
        Resolved::Ref(r) => {
            let v = check_formula_result(retrieve_ref(host, &r), true);
            if preserve_ref {
                ArgValue::Ref(r, v)
            } else {
                ArgValue::Value(v)
            }
        }
        Resolved::Value(v) => ArgValue::Value(check_formula_result(v, true)),
    }
}

fn apply_binop(op: BinOp, a: LiteralValue, b: LiteralValue) -> Result<LiteralValue, FormulaError> {
    if let Some(e) = first_error(&a, &b) {
        return Err(e.clone());
    }
    match op {
        BinOp::Pow | BinOp::Mul | BinOp::Div | BinOp::Add | BinOp::Sub => {
            let x = accept_number(&a)?;
            let y = accept_number(&b)?;
            let r = match op {
                BinOp::Pow => x.powf(y),
                BinOp::Mul => x * y,
                BinOp::Div => {
                    if y == 0.0 {
                        return Err(FormulaError::DIV0);
                    }
                    x / y
                }
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                _ => unreachable!(),
            };
            if r.is_nan() {
                return Err(FormulaError::VALUE);
            }
            if r.is_infinite() {
                return Err(FormulaError::NUM);
            }
            Ok(LiteralValue::Number(if r == 0.0 { 0.0 } else { r }))
        }
        BinOp::Concat => Ok(LiteralValue::Text(format!(
            "{}{}",
            concat_text(&a),
            concat_text(&b)
        ))),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            use std::cmp::Ordering::*;
            let ord = compare_values(&a, &b);
            let result = match op {
                BinOp::Eq => ord == Equal,
                BinOp::Ne => ord != Equal,
                BinOp::Lt => ord == Less,
                BinOp::Le => ord != Greater,
                BinOp::Gt => ord == Greater,
                BinOp::Ge => ord != Less,
                _ => unreachable!(),
            };
            Ok(LiteralValue::Boolean(result))
        }
    }
}

fn parse_cell(text: &str, sheet: Option<String>) -> Result<Reference, FormulaError> {
    let (letters, digits) =
        formualizer_common::address::split_cell_lexeme(text).ok_or(FormulaError::REF)?;
    let col = formualizer_common::address::column_letters_to_number(&letters)
        .map_err(|_| FormulaError::REF)?;
    let row: u32 = digits.parse().map_err(|_| FormulaError::REF)?;
    Ok(Reference::Cell(CellRef::new(sheet, row, col)?))
}

fn parse_column(text: &str, sheet: Option<String>) -> Result<Reference, FormulaError> {
    let letters = text.trim_start_matches('$');
    let col = formualizer_common::address::column_letters_to_number(letters)
        .map_err(|_| FormulaError::REF)?;
    Ok(Reference::Range(RangeRef {
        sheet,
        from: Corner::whole_col(col),
        to: Corner::whole_col(col),
    }))
}

fn unquote_sheet(text: &str) -> String {
    if let Some(inner) = text.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        inner.replace("''", "'")
    } else {
        text.to_string()
    }
}

fn unescape_double_quoted(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    inner.replace("\"\"", "\"")
}

fn unescape_single_quoted(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    inner.replace("''", "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MapHost;

    fn eval(host: &MapHost, text: &str) -> LiteralValue {
        Evaluator::new(host).evaluate(text, false)
    }

    #[test]
    fn precedence_add_mul() {
        let host = MapHost::default();
        assert_eq!(eval(&host, "=2+3*4"), LiteralValue::Number(14.0));
    }

    #[test]
    fn precedence_unary_power() {
        let host = MapHost::default();
        assert_eq!(eval(&host, "=-2^2"), LiteralValue::Number(4.0));
    }

    #[test]
    fn concat_folds_left_to_right_after_add() {
        let host = MapHost::default();
        assert_eq!(eval(&host, "=1&2+3"), LiteralValue::Text("15".into()));
    }

    #[test]
    fn divide_by_zero() {
        let host = MapHost::default();
        assert_eq!(eval(&host, "=1/0"), LiteralValue::Error(FormulaError::DIV0));
    }

    #[test]
    fn concat_bool_literal() {
        let host = MapHost::default();
        assert_eq!(
            eval(&host, r#"="abc"&TRUE"#),
            LiteralValue::Text("abcTRUE".into())
        );
    }

    #[test]
    fn cross_type_equality_is_false() {
        let host = MapHost::default();
        assert_eq!(eval(&host, r#"=1="a""#), LiteralValue::Boolean(false));
        assert_eq!(eval(&host, r#"=1<>"a""#), LiteralValue::Boolean(true));
    }

    #[test]
    fn cell_reference_resolves_from_host() {
        let mut host = MapHost::default();
        host.set_cell(None, 1, 1, LiteralValue::Number(5.0));
        assert_eq!(eval(&host, "=A1+1"), LiteralValue::Number(6.0));
    }

    #[test]
    fn syntax_error_reports_caret_column() {
        let host = MapHost::default();
        match eval(&host, "=1++*2") {
            LiteralValue::Error(e) => {
                assert_eq!(e.kind, ErrorKind::Error);
                let details = e.details.expect("syntax error carries diagnostic details");
                assert!(details.contains("(1:4)"), "details: {details}");
                let lines: Vec<&str> = details.lines().collect();
                assert_eq!(lines[1], "1++*2");
                assert_eq!(lines[2], "   ^");
            }
            other => panic!("expected #ERROR!, got {other:?}"),
        }
    }

    #[test]
    fn lexer_error_reports_caret_column() {
        let host = MapHost::default();
        match eval(&host, "=1+@") {
            LiteralValue::Error(e) => {
                assert_eq!(e.kind, ErrorKind::Error);
                let details = e.details.expect("lexer error carries diagnostic details");
                assert!(details.contains("(1:3)"), "details: {details}");
                let lines: Vec<&str> = details.lines().collect();
                assert_eq!(lines[1], "1+@");
                assert_eq!(lines[2], "  ^");
            }
            other => panic!("expected #ERROR!, got {other:?}"),
        }
    }

    use proptest::prelude::*;

    proptest! {
        /// `*` binds tighter than `+` for arbitrary operands, not just the
        /// `2+3*4` example in SPEC_FULL §8 — this is the same left-to-right
        /// fold the binary-operator chain implements, exercised over a
        /// range of values wide enough to catch a precedence-table typo.
        #[test]
        fn mul_binds_tighter_than_add(a in -1000.0f64..1000.0, b in -1000.0f64..1000.0, c in -1000.0f64..1000.0) {
            let host = MapHost::default();
            let text = format!("={a:.3}+{b:.3}*{c:.3}");
            let expected = a + b * c;
            match eval(&host, &text) {
                LiteralValue::Number(n) => prop_assert!((n - expected).abs() < 1e-6, "{n} vs {expected}"),
                other => prop_assert!(false, "unexpected {other:?}"),
            }
        }

        /// `^` binds tighter than unary minus is an exception (SPEC_FULL
        /// §8: `-2^2 = 4`), but `^` still binds tighter than `*`/`/` for
        /// positive operands.
        #[test]
        fn pow_binds_tighter_than_mul(a in 1.0f64..10.0, b in 1.0f64..10.0, c in 1.0f64..4.0) {
            let host = MapHost::default();
            let text = format!("={a:.3}*{b:.3}^{c:.3}");
            let expected = a * b.powf(c);
            match eval(&host, &text) {
                LiteralValue::Number(n) => prop_assert!((n - expected).abs() < 1e-3, "{n} vs {expected}"),
                other => prop_assert!(false, "unexpected {other:?}"),
            }
        }
    }
}
