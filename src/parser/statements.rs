//! Statement parsing: control flow, exceptions, blocks.

use crate::ast::*;
use crate::error::ParserError;
use crate::lexer::TokenKind;

use super::core::{ParseResult, Parser};
use super::precedence::Precedence;

impl Parser {
    pub(crate) fn statement(&mut self) -> ParseResult<Stmt> {
        match self.peek().kind {
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Break => self.simple_keyword(StmtKind::Break),
            TokenKind::Continue => self.simple_keyword(StmtKind::Continue),
            TokenKind::Pass => self.simple_keyword(StmtKind::Pass),
            TokenKind::Try => self.try_statement(),
            TokenKind::Throw => self.throw_statement(),
            TokenKind::Match => self.match_statement(),
            TokenKind::Delete => self.delete_statement(),
            TokenKind::LeftBrace => {
                let start = self.advance().span;
                let body = self.brace_block_body()?;
                let span = start.merge(&self.previous_span());
                Ok(self.make_stmt(StmtKind::Block(body), span))
            }
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let expr = self.expression()?;
        self.end_statement()?;
        let span = expr.span;
        Ok(self.make_stmt(StmtKind::Expression(expr), span))
    }

    fn simple_keyword(&mut self, kind: StmtKind) -> ParseResult<Stmt> {
        let span = self.advance().span;
        self.end_statement()?;
        Ok(self.make_stmt(kind, span))
    }

    // ===== Blocks =====

    /// A block in either style: `{ ... }` or `: NEWLINE INDENT ... DEDENT`
    /// (or a single statement on the same line after `:`).
    pub(crate) fn block(&mut self) -> ParseResult<Stmt> {
        let start = self.current_span();
        let body = if self.match_token(&TokenKind::LeftBrace) {
            self.brace_block_body()?
        } else if self.match_token(&TokenKind::Colon) {
            self.suite()?
        } else {
            return Err(self.unexpected("':' or '{'"));
        };
        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(StmtKind::Block(body), span))
    }

    /// Statements up to the closing `}`; the `{` is already consumed.
    pub(crate) fn brace_block_body(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        loop {
            self.skip_layout();
            if self.match_token(&TokenKind::RightBrace) {
                break;
            }
            if self.is_at_end() {
                return Err(self.unexpected("'}'"));
            }
            statements.push(self.declaration()?);
        }
        Ok(statements)
    }

    /// The body after `:`, the `:` is already consumed.
    pub(crate) fn suite(&mut self) -> ParseResult<Vec<Stmt>> {
        if !self.check(&TokenKind::Newline) {
            let mut statements = vec![self.declaration()?];
            while self.previous().kind == TokenKind::Semicolon && !self.at_line_break() {
                statements.push(self.declaration()?);
            }
            return Ok(statements);
        }

        self.skip_newlines();
        self.expect(&TokenKind::Indent)?;
        let mut statements = Vec::new();
        loop {
            while matches!(
                self.peek().kind,
                TokenKind::Newline | TokenKind::Semicolon
            ) {
                self.advance();
            }
            if self.match_token(&TokenKind::Dedent) || self.is_at_end() {
                break;
            }
            statements.push(self.declaration()?);
        }
        Ok(statements)
    }

    fn starts_statement_keyword(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Return
                | TokenKind::Throw
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Pass
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Try
                | TokenKind::Match
                | TokenKind::Delete
        )
    }

    fn at_line_break(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof
        )
    }

    // ===== Control flow =====

    /// Handles both `if` and `elif`.
    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let condition = self.expression()?;
        let then_branch = self.block()?;

        let else_branch = if self.check_after_newlines(&TokenKind::Elif) {
            Some(Box::new(self.if_statement()?))
        } else if self.check_after_newlines(&TokenKind::Else) {
            self.advance();
            if self.check(&TokenKind::If) {
                Some(Box::new(self.if_statement()?))
            } else {
                Some(Box::new(self.block()?))
            }
        } else {
            None
        };

        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(
            StmtKind::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch,
            },
            span,
        ))
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let condition = self.expression()?;
        let body = self.block()?;
        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(
            StmtKind::While {
                condition,
                body: Box::new(body),
            },
            span,
        ))
    }

    /// `for x in xs`, `for (let x in xs)`, or `for (init; cond; update)`.
    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let parenthesized = self.match_token(&TokenKind::LeftParen);

        if matches!(self.peek().kind, TokenKind::Let | TokenKind::Var)
            && self.check_nth(2, &TokenKind::In)
        {
            self.advance();
        }

        if matches!(self.peek().kind, TokenKind::Identifier(_)) && self.check_nth(1, &TokenKind::In)
        {
            let variable = self.expect_identifier()?;
            self.expect(&TokenKind::In)?;
            let iterable = self.expression()?;
            if parenthesized {
                self.expect(&TokenKind::RightParen)?;
            }
            let body = self.block()?;
            let span = start.merge(&self.previous_span());
            return Ok(self.make_stmt(
                StmtKind::ForIn {
                    variable,
                    iterable,
                    body: Box::new(body),
                },
                span,
            ));
        }

        let init = if self.match_token(&TokenKind::Semicolon) {
            None
        } else {
            let init_span = self.current_span();
            let init = if matches!(
                self.peek().kind,
                TokenKind::Let | TokenKind::Var | TokenKind::Const
            ) {
                let decl = self.var_decl_core()?;
                self.make_stmt(StmtKind::VarDecl(decl), init_span)
            } else {
                let expr = self.expression()?;
                self.make_stmt(StmtKind::Expression(expr), init_span)
            };
            self.expect(&TokenKind::Semicolon)?;
            Some(Box::new(init))
        };

        let condition = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::Semicolon)?;

        let update = if matches!(
            self.peek().kind,
            TokenKind::RightParen | TokenKind::LeftBrace | TokenKind::Colon
        ) {
            None
        } else {
            Some(self.expression()?)
        };
        if parenthesized {
            self.expect(&TokenKind::RightParen)?;
        }

        let body = self.block()?;
        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(
            StmtKind::For {
                init,
                condition,
                update,
                body: Box::new(body),
            },
            span,
        ))
    }

    fn return_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let value = if self.at_statement_end() {
            None
        } else {
            Some(self.expression()?)
        };
        self.end_statement()?;
        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(StmtKind::Return(value), span))
    }

    fn throw_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        if self.at_statement_end() {
            return Err(ParserError::general(
                "'raise' needs an exception value",
                start,
            ));
        }
        let value = self.expression()?;
        self.end_statement()?;
        let span = start.merge(&value.span);
        Ok(self.make_stmt(StmtKind::Throw(value), span))
    }

    fn delete_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let array = if self.match_token(&TokenKind::LeftBracket) {
            self.expect(&TokenKind::RightBracket)?;
            true
        } else {
            false
        };
        let target = self.expression()?;
        self.end_statement()?;
        let span = start.merge(&target.span);
        Ok(self.make_stmt(StmtKind::Delete { target, array }, span))
    }

    // ===== Exceptions =====

    fn try_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let body = self.block()?;

        let mut catches = Vec::new();
        while self.check_after_newlines(&TokenKind::Catch) {
            catches.push(self.catch_clause()?);
        }

        let finally = if self.check_after_newlines(&TokenKind::Finally) {
            self.advance();
            Some(Box::new(self.block()?))
        } else {
            None
        };

        if catches.is_empty() && finally.is_none() {
            return Err(ParserError::general(
                "'try' needs at least one 'catch' or a 'finally'",
                start,
            ));
        }

        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(
            StmtKind::Try {
                body: Box::new(body),
                catches,
                finally,
            },
            span,
        ))
    }

    /// `catch (e)`, `catch (ValueError e)`, `except KeyError as e`, `except:`.
    fn catch_clause(&mut self) -> ParseResult<CatchClause> {
        let keyword = self.advance();
        let parenthesized = self.match_token(&TokenKind::LeftParen);

        let mut exception_type = None;
        let mut variable = None;
        if let TokenKind::Identifier(first) = self.peek().kind.clone() {
            self.advance();
            if self.match_token(&TokenKind::As) {
                exception_type = Some(first);
                variable = Some(self.expect_identifier()?);
            } else if let TokenKind::Identifier(second) = self.peek().kind.clone() {
                self.advance();
                exception_type = Some(first);
                variable = Some(second);
            } else if keyword.lexeme == "except" {
                exception_type = Some(first);
            } else {
                variable = Some(first);
            }
        }

        if parenthesized {
            self.expect(&TokenKind::RightParen)?;
        }
        let body = self.block()?;
        let span = keyword.span.merge(&self.previous_span());
        Ok(CatchClause {
            exception_type,
            variable,
            body,
            span,
        })
    }

    // ===== Pattern matching =====

    fn match_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let subject = self.expression()?;

        let braced = if self.match_token(&TokenKind::LeftBrace) {
            true
        } else {
            self.expect(&TokenKind::Colon)?;
            self.skip_newlines();
            self.expect(&TokenKind::Indent)?;
            false
        };

        let mut arms = Vec::new();
        loop {
            if braced {
                self.skip_layout();
                if self.match_token(&TokenKind::RightBrace) {
                    break;
                }
            } else {
                self.skip_newlines();
                if self.match_token(&TokenKind::Dedent) || self.is_at_end() {
                    break;
                }
            }
            arms.push(self.match_arm()?);
        }

        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(StmtKind::Match { subject, arms }, span))
    }

    fn match_arm(&mut self) -> ParseResult<MatchArm> {
        let start = self.current_span();
        let pattern = if self.match_token(&TokenKind::Default) {
            Pattern::Wildcard
        } else {
            self.expect(&TokenKind::Case)?;
            self.pattern()?
        };

        let guard = if self.match_token(&TokenKind::If) {
            Some(self.parse_precedence(Precedence::Or)?)
        } else {
            None
        };

        let body = if self.match_token(&TokenKind::FatArrow) {
            if self.check(&TokenKind::LeftBrace) {
                self.statement()?
            } else if self.starts_statement_keyword() {
                self.statement()?
            } else {
                // `case 1 => expr,` as in a braced arm list
                let expr = self.expression()?;
                if !self.match_token(&TokenKind::Comma) {
                    self.end_statement()?;
                }
                let span = expr.span;
                self.make_stmt(StmtKind::Expression(expr), span)
            }
        } else {
            self.block()?
        };

        let span = start.merge(&self.previous_span());
        Ok(MatchArm {
            pattern,
            guard,
            body,
            span,
        })
    }

    fn pattern(&mut self) -> ParseResult<Pattern> {
        if let TokenKind::Identifier(name) = &self.peek().kind {
            let name = name.clone();
            let ends_pattern = matches!(
                self.peek_nth(1).kind,
                TokenKind::Colon | TokenKind::FatArrow | TokenKind::If | TokenKind::LeftBrace
            );
            if name == "_" && ends_pattern {
                self.advance();
                return Ok(Pattern::Wildcard);
            }
            if ends_pattern {
                self.advance();
                return Ok(Pattern::Binding(name));
            }
        }
        Ok(Pattern::Value(self.parse_precedence(Precedence::Or)?))
    }
}
