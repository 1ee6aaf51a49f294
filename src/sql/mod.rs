//! SQL parsing and AST types.
//!
//! Uses the `sqlparser` crate for parsing, then converts to our internal AST
//! representation for execution by the in-memory store.

mod ast;
mod error;
mod parser;

pub use ast::*;
pub use error::{ParseError, ParseResult};
pub use parser::Parser;
