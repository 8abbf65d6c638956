//! Lossless tokenization of Excel-dialect formula text.

pub mod tokenizer;

pub use tokenizer::{tokenize, Token, TokenKind, TokenizeError};
