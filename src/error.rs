//! The closed error enum shared by grammar finalization, the lexer and the parser:
//! a flat enum with a manual `Display`/`Error` impl rather than a derive macro.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCharacter,
    UnexpectedEndOfInput,
    DuplicateRule,
    UndefinedRule,
    LexerReferencesParser,
    GrammarSyntax,
    UnknownOption,
    InvalidOptionArgument,
    CharsetNotFound,
    ParseMismatch,
    /// `Test`/`Not`-over-unsupported-construct inside a rule classified as lexer-only.
    UnsupportedForLexer,
}

impl ErrorKind {
    fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidCharacter => "InvalidCharacter",
            ErrorKind::UnexpectedEndOfInput => "UnexpectedEndOfInput",
            ErrorKind::DuplicateRule => "DuplicateRule",
            ErrorKind::UndefinedRule => "UndefinedRule",
            ErrorKind::LexerReferencesParser => "LexerReferencesParser",
            ErrorKind::GrammarSyntax => "GrammarSyntax",
            ErrorKind::UnknownOption => "UnknownOption",
            ErrorKind::InvalidOptionArgument => "InvalidOptionArgument",
            ErrorKind::CharsetNotFound => "CharsetNotFound",
            ErrorKind::ParseMismatch => "ParseMismatch",
            ErrorKind::UnsupportedForLexer => "UnsupportedForLexer",
        }
    }
}

/// `{code, row, col, index, message}` as required by the error design. Position
/// fields default to `0`/`None` for errors raised before any input exists (grammar
/// finalization, vocabulary/syntax assembly).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub row: usize,
    pub col: usize,
    pub index: Option<usize>,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, row: 0, col: 0, index: None, message: message.into() }
    }

    pub fn at(kind: ErrorKind, row: usize, col: usize, index: usize, message: impl Into<String>) -> Self {
        Self { kind, row, col, index: Some(index), message: message.into() }
    }

    pub fn has_position(&self) -> bool {
        self.index.is_some()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.has_position() {
            write!(f, "Error {}: {} at row {}, col {}", self.kind.code(), self.message, self.row, self.col)
        } else {
            write!(f, "Error {}: {}", self.kind.code(), self.message)
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
