//! Lexer module for Kaede.

pub mod scanner;
pub mod token;

pub use scanner::{tokenize, LexerState, Scanner};
pub use token::{Token, TokenKind};
