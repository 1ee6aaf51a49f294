//! Errors raised while turning SQL text into store statements.

use thiserror::Error;

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Why a piece of SQL could not become a [`Statement`](super::Statement).
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// sqlparser rejected the text.
    #[error("SQL syntax error: {0}")]
    Syntax(String),

    /// Well-formed SQL the store does not execute, such as joins.
    #[error("{construct} not supported: {detail}")]
    Unsupported {
        construct: &'static str,
        detail: String,
    },

    #[error("missing {0} name")]
    MissingName(&'static str),

    #[error("placeholder '{0}' must be ? or $1, $2, ...")]
    InvalidPlaceholder(String),

    #[error("no statement to parse")]
    Empty,

    /// `parse` takes exactly one statement; scripts go through `parse_script`.
    #[error("expected one statement, found {0}")]
    MultipleStatements(usize),
}

impl ParseError {
    pub(crate) fn statement(detail: String) -> Self {
        Self::Unsupported { construct: "statement", detail }
    }

    pub(crate) fn expression(detail: String) -> Self {
        Self::Unsupported { construct: "expression", detail }
    }

    pub(crate) fn data_type(detail: String) -> Self {
        Self::Unsupported { construct: "data type", detail }
    }

    /// Whether the SQL was valid but asks for something the store lacks.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ParseError::Unsupported { .. })
    }
}

impl From<sqlparser::parser::ParserError> for ParseError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        ParseError::Syntax(e.to_string())
    }
}
