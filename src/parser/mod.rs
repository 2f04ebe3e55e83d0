//! Parser module for Kaede.

mod core;
mod declarations;
mod expressions;
mod precedence;
mod statements;
mod types;

#[cfg(test)]
mod tests;

pub use self::core::Parser;
pub use self::precedence::Precedence;

use crate::ast::Program;
use crate::error::ParseErrors;
use crate::lexer::Token;

/// Parse a token stream into a program, collecting every recoverable error.
pub fn parse(tokens: Vec<Token>) -> Result<Program, ParseErrors> {
    Parser::new(tokens).parse()
}
