//! Core parser struct and helper methods.

use tracing::debug;

use crate::ast::*;
use crate::error::{ParseErrors, ParserError};
use crate::lexer::{Token, TokenKind};
use crate::span::Span;

pub type ParseResult<T> = Result<T, ParserError>;

/// The parser for Kaede.
pub struct Parser {
    pub(crate) tokens: Vec<Token>,
    pub(crate) current: usize,
    next_id: u32,
}

impl Parser {
    /// Comment tokens are dropped here; the grammar never sees them.
    pub fn new(tokens: Vec<Token>) -> Self {
        let mut tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| !matches!(t.kind, TokenKind::Comment(_)))
            .collect();
        if tokens.last().map(|t| &t.kind) != Some(&TokenKind::Eof) {
            let (pos, line) = tokens
                .last()
                .map(|t| (t.span.end, t.span.line))
                .unwrap_or((0, 1));
            tokens.push(Token::eof(pos, line, 1));
        }
        Self {
            tokens,
            current: 0,
            next_id: 0,
        }
    }

    /// Parse a complete program, recovering after each error so that one pass
    /// reports every diagnostic it can find.
    pub fn parse(&mut self) -> Result<Program, ParseErrors> {
        let mut statements = Vec::new();
        let mut errors = Vec::new();

        loop {
            self.skip_layout();
            if self.is_at_end() {
                break;
            }
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    debug!(error = %err, "recovering from parse error");
                    errors.push(err);
                    self.synchronize();
                }
            }
        }

        if errors.is_empty() {
            Ok(Program::new(statements))
        } else {
            Err(ParseErrors(errors))
        }
    }

    /// Skip ahead to the next probable statement boundary.
    pub(crate) fn synchronize(&mut self) {
        if !self.is_at_end() {
            self.advance();
        }

        while !self.is_at_end() {
            if matches!(
                self.previous().kind,
                TokenKind::Semicolon | TokenKind::Newline
            ) {
                return;
            }

            match self.peek().kind {
                TokenKind::Fn
                | TokenKind::Class
                | TokenKind::Struct
                | TokenKind::Enum
                | TokenKind::Namespace
                | TokenKind::Template
                | TokenKind::Let
                | TokenKind::Var
                | TokenKind::Const
                | TokenKind::Static
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return
                | TokenKind::Try
                | TokenKind::Throw
                | TokenKind::Match
                | TokenKind::Import
                | TokenKind::From
                | TokenKind::Using
                | TokenKind::Export
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Pass
                | TokenKind::Delete => return,
                _ => {}
            }

            self.advance();
        }
    }

    // ===== Node construction =====

    fn fresh_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn make_expr(&mut self, kind: ExprKind, span: Span) -> Expr {
        let id = self.fresh_id();
        Expr::new(id, kind, span)
    }

    pub(crate) fn make_stmt(&mut self, kind: StmtKind, span: Span) -> Stmt {
        let id = self.fresh_id();
        Stmt::new(id, kind, span)
    }

    // ===== Token manipulation =====

    pub(crate) fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.tokens[self.current - 1].clone()
    }

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    pub(crate) fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    pub(crate) fn peek_nth(&self, n: usize) -> &Token {
        let index = if self.current + n < self.tokens.len() {
            self.current + n
        } else {
            self.tokens.len() - 1
        };
        &self.tokens[index]
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        if self.is_at_end() {
            false
        } else {
            std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
        }
    }

    pub(crate) fn check_nth(&self, n: usize, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek_nth(n).kind) == std::mem::discriminant(kind)
    }

    pub(crate) fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(format!("'{}'", kind)))
        }
    }

    pub(crate) fn expect_identifier(&mut self) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// A name after `.` or `->` may also be a keyword, e.g. `obj.default`.
    pub(crate) fn expect_member_name(&mut self) -> ParseResult<String> {
        let token = self.peek();
        let word_like = !token.lexeme.is_empty()
            && token
                .lexeme
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_')
            && !token.lexeme.starts_with(|c: char| c.is_ascii_digit());
        if word_like {
            Ok(self.advance().lexeme)
        } else {
            Err(self.unexpected("member name"))
        }
    }

    pub(crate) fn unexpected(&self, expected: impl Into<String>) -> ParserError {
        if self.is_at_end() {
            return ParserError::unexpected_eof(self.current_span());
        }
        ParserError::unexpected_token(
            expected,
            format!("{}", self.peek().kind),
            self.current_span(),
        )
    }

    pub(crate) fn current_span(&self) -> Span {
        self.peek().span
    }

    pub(crate) fn previous_span(&self) -> Span {
        self.previous().span
    }

    // ===== Layout helpers =====

    pub(crate) fn skip_newlines(&mut self) {
        while self.match_token(&TokenKind::Newline) {}
    }

    /// Skip every token that separates statements without meaning anything.
    pub(crate) fn skip_layout(&mut self) {
        while matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Semicolon
        ) {
            self.advance();
        }
    }

    /// If `kind` follows after any number of newlines, consume the newlines
    /// and return true. Otherwise leave the position untouched.
    pub(crate) fn check_after_newlines(&mut self, kind: &TokenKind) -> bool {
        let mut n = 0;
        while self.check_nth(n, &TokenKind::Newline) {
            n += 1;
        }
        if self.check_nth(n, kind) {
            self.current += n;
            true
        } else {
            false
        }
    }

    /// Whether the next token ends the current simple statement.
    pub(crate) fn at_statement_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::RightBrace
                | TokenKind::Dedent
                | TokenKind::Eof
        ) || self.peek().span.line > self.previous().span.line
    }

    /// Consume the terminator of a simple statement.
    pub(crate) fn end_statement(&mut self) -> ParseResult<()> {
        if self.match_token(&TokenKind::Semicolon) || self.match_token(&TokenKind::Newline) {
            return Ok(());
        }
        if self.at_statement_end()
            || matches!(
                self.previous().kind,
                TokenKind::RightBrace | TokenKind::Dedent | TokenKind::Newline
            )
        {
            return Ok(());
        }
        Err(self.unexpected("newline or ';'"))
    }
}
