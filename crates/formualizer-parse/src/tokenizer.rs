//! Regex-driven tokenizer.
//!
//! Each token class is its own anchored regex. At every offset we try every
//! pattern, keep the longest match, and break ties by the fixed ordering
//! below (mirrors how a hand-written lexer would check more specific rules
//! before falling back to general ones). Whitespace is emitted as real
//! tokens rather than skipped, because the parser's implicit-intersection
//! operator needs to see the gaps between atoms.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// The class of a matched token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    WhiteSpace,
    String,
    SheetQuoted,
    SingleQuotedString,
    Function,
    FormulaError,
    Sheet,
    Cell,
    Boolean,
    Column,
    Name,
    Number,
    /// `(` `)` `{` `}` `,` `;` `:`
    Punct,
    /// `+ - * / ^ & = <> <= >= < > %`
    Operator,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A single lexeme with its byte span in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn len(&self) -> usize {
        self.end - self.start
    }
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {:?}@{}..{}>", self.kind, self.text, self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tokenize error at byte {}: {}", self.pos, self.message)
    }
}
impl std::error::Error for TokenizeError {}

fn anchored(pattern: &str) -> Regex {
    RegexBuilder::new(&format!("^(?:{pattern})"))
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| panic!("bad tokenizer pattern {pattern:?}: {e}"))
}

const SHEET_NAME: &str = r"[A-Za-z_\\][A-Za-z0-9_.\\]*";
const QUOTED_SHEET_NAME: &str = r"'(?:[^'\\]|''|\\.)*'";
const DOUBLE_STRING: &str = r#""(?:[^"\\]|""|\\.)*""#;
const FORMULA_ERROR: &str = r"#(?:NULL!|DIV/0!|VALUE!|REF!|NAME\?|NUM!|N/A|ERROR!)";
const BOOLEAN: &str = r"TRUE\b|FALSE\b";
const CELL: &str = r"\$?[A-Za-z]{1,3}\$?[0-9]{1,7}\b";
const COLUMN: &str = r"\$?[A-Za-z]{1,3}\b";
const NUMBER: &str = r"(?:\d+\.\d*|\.\d+|\d+)(?:[eE][+-]?\d+)?";
const NAME: &str = r"[A-Za-z_\\][A-Za-z0-9_.\\]*";
const PUNCT: &str = r"[(){},;:!]";
const OPERATOR: &str = r"<>|<=|>=|[+\-*/^&=<>%]";

/// Ordered (most specific first) token-class patterns. `Function` and
/// `Sheet` are matched via lookahead-free post-checks since `regex` has no
/// lookahead: we match the bare identifier here and reclassify in
/// `tokenize` once we see whether it's followed by `(` or `!`.
static PATTERNS: Lazy<Vec<(TokenKind, Regex)>> = Lazy::new(|| {
    vec![
        (TokenKind::WhiteSpace, anchored(r"[ \t\r\n]+")),
        (TokenKind::SheetQuoted, anchored(QUOTED_SHEET_NAME)),
        (TokenKind::String, anchored(DOUBLE_STRING)),
        (TokenKind::FormulaError, anchored(FORMULA_ERROR)),
        (TokenKind::Boolean, anchored(BOOLEAN)),
        (TokenKind::Cell, anchored(CELL)),
        (TokenKind::Number, anchored(NUMBER)),
        // `Column` is tried before `Name` so that short bare letter runs
        // (<= 3 letters, its only possible matches) tie-break to `Column`;
        // anything longer only matches `Name` and wins on length alone.
        (TokenKind::Column, anchored(COLUMN)),
        (TokenKind::Name, anchored(NAME)),
        (TokenKind::Punct, anchored(PUNCT)),
        (TokenKind::Operator, anchored(OPERATOR)),
    ]
});

/// Tokenize `input` into a flat, lossless token stream. The only failure
/// mode is encountering a byte that matches no pattern at all (an
/// unterminated string or a stray character outside the recognised set).
pub fn tokenize(input: &str) -> Result<Vec<Token>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    let bytes = input.as_bytes();

    while pos < bytes.len() {
        let rest = &input[pos..];
        let mut best: Option<(TokenKind, usize)> = None;
        for (kind, re) in PATTERNS.iter() {
            if let Some(m) = re.find(rest) {
                let len = m.end();
                if len == 0 {
                    continue;
                }
                match best {
                    Some((_, blen)) if blen >= len => {}
                    _ => best = Some((*kind, len)),
                }
            }
        }

        let Some((kind, len)) = best else {
            return Err(TokenizeError {
                message: format!("unrecognized character {:?}", rest.chars().next()),
                pos,
            });
        };

        let text = rest[..len].to_string();
        let start = pos;
        let end = pos + len;

        let kind = reclassify(kind, &text, &input[end..]);

        tokens.push(Token {
            kind,
            text,
            start,
            end,
        });
        pos = end;
    }

    Ok(tokens)
}

/// `Name`-shaped lexemes are reclassified based on what follows: a `(`
/// makes it a function call, a `!` makes it an (unquoted) sheet prefix,
/// a trailing quote-then-`!` makes a `SheetQuoted` token a confirmed sheet
/// (it already is one), otherwise it stays a plain `Name`.
fn reclassify(kind: TokenKind, text: &str, trailing: &str) -> TokenKind {
    match kind {
        TokenKind::Name | TokenKind::Column if trailing.starts_with('(') => TokenKind::Function,
        TokenKind::Name | TokenKind::Column if starts_with_bang(trailing) => TokenKind::Sheet,
        TokenKind::SheetQuoted if !starts_with_bang(trailing) => TokenKind::SingleQuotedString,
        _ => {
            let _ = text;
            kind
        }
    }
}

fn starts_with_bang(s: &str) -> bool {
    s.starts_with('!')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_arithmetic() {
        let toks = tokenize("=2+3*4").unwrap();
        assert_eq!(toks[0].text, "=");
        assert_eq!(toks[0].kind, TokenKind::Operator);
        assert_eq!(toks[1].kind, TokenKind::Number);
    }

    #[test]
    fn function_call_detected() {
        let toks = tokenize("SUM(1,2)").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Function);
        assert_eq!(toks[0].text, "SUM");
    }

    #[test]
    fn sheet_prefix_detected() {
        let toks = tokenize("Sheet1!A1").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Sheet);
        assert_eq!(toks[2].kind, TokenKind::Cell);
    }

    #[test]
    fn quoted_sheet_prefix_detected() {
        let toks = tokenize("'My Sheet'!A1").unwrap();
        assert_eq!(toks[0].kind, TokenKind::SheetQuoted);
        assert_eq!(toks[2].kind, TokenKind::Cell);
    }

    #[test]
    fn whitespace_preserved_for_intersection() {
        let toks = tokenize("A1 B1").unwrap();
        assert_eq!(kinds(&toks), vec![TokenKind::Cell, TokenKind::WhiteSpace, TokenKind::Cell]);
    }

    #[test]
    fn bare_column_for_range_promotion() {
        let toks = tokenize("A:A").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Column);
        assert_eq!(toks[1].kind, TokenKind::Punct);
        assert_eq!(toks[2].kind, TokenKind::Column);
    }

    #[test]
    fn error_literal() {
        let toks = tokenize("#REF!").unwrap();
        assert_eq!(toks[0].kind, TokenKind::FormulaError);
    }

    #[test]
    fn unrecognized_character_errors() {
        let err = tokenize("@").unwrap_err();
        assert_eq!(err.pos, 0);
    }

    use proptest::prelude::*;

    proptest! {
        /// Every byte of arbitrary input is either consumed into a token
        /// or the tokenizer reports a `TokenizeError` — it never panics
        /// and never silently drops input.
        #[test]
        fn never_panics_on_arbitrary_text(s in "[\"'!$,;:(){}=<>+\\-*/^&%#._a-zA-Z0-9 \t]{0,64}") {
            match tokenize(&s) {
                Ok(tokens) => {
                    let consumed: usize = tokens.iter().map(Token::len).sum();
                    prop_assert_eq!(consumed, s.len());
                }
                Err(e) => prop_assert!(e.pos <= s.len()),
            }
        }
    }
}
