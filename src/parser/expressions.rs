//! Expression parsing (Pratt parser).

use crate::ast::types::is_builtin_type_name;
use crate::ast::*;
use crate::error::ParserError;
use crate::lexer::TokenKind;

use super::core::{ParseResult, Parser};
use super::precedence::{get_precedence, Precedence};

impl Parser {
    pub(crate) fn expression(&mut self) -> ParseResult<Expr> {
        self.parse_precedence(Precedence::Assignment)
    }

    pub(crate) fn parse_precedence(&mut self, precedence: Precedence) -> ParseResult<Expr> {
        let mut expr = self.parse_prefix()?;

        loop {
            let next = get_precedence(&self.peek().kind);
            if next == Precedence::None || next < precedence {
                break;
            }
            expr = self.parse_infix(expr, next)?;
        }

        Ok(expr)
    }

    fn parse_prefix(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        let span = token.span;

        match &token.kind {
            TokenKind::IntLiteral(n) => {
                self.advance();
                Ok(self.make_expr(ExprKind::IntLiteral(*n), span))
            }
            TokenKind::MinIntMagnitude => Err(ParserError::general(
                format!("Integer literal {} is out of range", token.lexeme),
                span,
            )),
            TokenKind::FloatLiteral(n) => {
                self.advance();
                Ok(self.make_expr(ExprKind::FloatLiteral(*n), span))
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(self.make_expr(ExprKind::StringLiteral(s.clone()), span))
            }
            TokenKind::True => {
                self.advance();
                Ok(self.make_expr(ExprKind::BoolLiteral(true), span))
            }
            TokenKind::False => {
                self.advance();
                Ok(self.make_expr(ExprKind::BoolLiteral(false), span))
            }
            TokenKind::Null => {
                self.advance();
                Ok(self.make_expr(ExprKind::Null, span))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(self.make_expr(ExprKind::Identifier(name.clone()), span))
            }
            TokenKind::LeftParen => self.grouping_or_cast(),
            TokenKind::LeftBracket => self.list_literal(),
            TokenKind::LeftBrace => self.dict_literal(),
            TokenKind::Minus => self.unary(UnaryOp::Negate),
            TokenKind::Plus => self.unary(UnaryOp::Plus),
            TokenKind::Bang => self.unary(UnaryOp::Not),
            TokenKind::Tilde => self.unary(UnaryOp::BitNot),
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                self.advance();
                let target = self.parse_precedence(Precedence::Unary)?;
                self.check_assignable(&target)?;
                let span = span.merge(&target.span);
                Ok(self.make_expr(
                    ExprKind::Update {
                        target: Box::new(target),
                        increment: token.kind == TokenKind::PlusPlus,
                        prefix: true,
                    },
                    span,
                ))
            }
            TokenKind::New => self.new_expression(),
            TokenKind::Move => {
                self.advance();
                let inner = self.parse_precedence(Precedence::Unary)?;
                let span = span.merge(&inner.span);
                Ok(self.make_expr(ExprKind::Move(Box::new(inner)), span))
            }
            TokenKind::Lambda => self.lambda_expression(),
            TokenKind::Fn => self.fn_expression(),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_infix(&mut self, left: Expr, precedence: Precedence) -> ParseResult<Expr> {
        let token = self.advance();

        let compound = match token.kind {
            TokenKind::Equal => return self.assignment(left, None),
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Subtract),
            TokenKind::StarEqual => Some(BinaryOp::Multiply),
            TokenKind::SlashEqual => Some(BinaryOp::Divide),
            TokenKind::PercentEqual => Some(BinaryOp::Modulo),
            TokenKind::StarStarEqual => Some(BinaryOp::Power),
            TokenKind::AmpEqual => Some(BinaryOp::BitAnd),
            TokenKind::PipeEqual => Some(BinaryOp::BitOr),
            TokenKind::CaretEqual => Some(BinaryOp::BitXor),
            TokenKind::ShiftLeftEqual => Some(BinaryOp::ShiftLeft),
            TokenKind::ShiftRightEqual => Some(BinaryOp::ShiftRight),
            _ => None,
        };
        if compound.is_some() {
            return self.assignment(left, compound);
        }

        match token.kind {
            TokenKind::Question => {
                let then_branch = self.expression()?;
                self.expect(&TokenKind::Colon)?;
                let else_branch = self.parse_precedence(Precedence::Ternary)?;
                let span = left.span.merge(&else_branch.span);
                Ok(self.make_expr(
                    ExprKind::Ternary {
                        condition: Box::new(left),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                    span,
                ))
            }
            TokenKind::OrOr => self.logical_expr(left, LogicalOp::Or, precedence),
            TokenKind::AndAnd => self.logical_expr(left, LogicalOp::And, precedence),
            TokenKind::EqualEqual => self.binary_expr(left, BinaryOp::Equal, precedence),
            TokenKind::BangEqual => self.binary_expr(left, BinaryOp::NotEqual, precedence),
            TokenKind::Less => self.binary_expr(left, BinaryOp::Less, precedence),
            TokenKind::LessEqual => self.binary_expr(left, BinaryOp::LessEqual, precedence),
            TokenKind::Greater => self.binary_expr(left, BinaryOp::Greater, precedence),
            TokenKind::GreaterEqual => self.binary_expr(left, BinaryOp::GreaterEqual, precedence),
            TokenKind::Spaceship => self.binary_expr(left, BinaryOp::Compare, precedence),
            TokenKind::Pipe => self.binary_expr(left, BinaryOp::BitOr, precedence),
            TokenKind::Caret => self.binary_expr(left, BinaryOp::BitXor, precedence),
            TokenKind::Amp => self.binary_expr(left, BinaryOp::BitAnd, precedence),
            TokenKind::ShiftLeft => self.binary_expr(left, BinaryOp::ShiftLeft, precedence),
            TokenKind::ShiftRight => self.binary_expr(left, BinaryOp::ShiftRight, precedence),
            TokenKind::Plus => self.binary_expr(left, BinaryOp::Add, precedence),
            TokenKind::Minus => self.binary_expr(left, BinaryOp::Subtract, precedence),
            TokenKind::Star => self.binary_expr(left, BinaryOp::Multiply, precedence),
            TokenKind::Slash => self.binary_expr(left, BinaryOp::Divide, precedence),
            TokenKind::Percent => self.binary_expr(left, BinaryOp::Modulo, precedence),
            TokenKind::StarStar => {
                // Right-associative: parse the right side at the same level.
                let right = self.parse_precedence(Precedence::Power)?;
                let span = left.span.merge(&right.span);
                Ok(self.make_expr(
                    ExprKind::Binary {
                        left: Box::new(left),
                        operator: BinaryOp::Power,
                        right: Box::new(right),
                    },
                    span,
                ))
            }
            TokenKind::LeftParen => self.finish_call(left),
            TokenKind::LeftBracket => {
                let index = self.expression()?;
                self.expect(&TokenKind::RightBracket)?;
                let span = left.span.merge(&self.previous_span());
                Ok(self.make_expr(
                    ExprKind::Index {
                        object: Box::new(left),
                        index: Box::new(index),
                    },
                    span,
                ))
            }
            TokenKind::Dot | TokenKind::Arrow => {
                let name = self.expect_member_name()?;
                let span = left.span.merge(&self.previous_span());
                Ok(self.make_expr(
                    ExprKind::Member {
                        object: Box::new(left),
                        name,
                        arrow: token.kind == TokenKind::Arrow,
                    },
                    span,
                ))
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                self.check_assignable(&left)?;
                let span = left.span.merge(&token.span);
                Ok(self.make_expr(
                    ExprKind::Update {
                        target: Box::new(left),
                        increment: token.kind == TokenKind::PlusPlus,
                        prefix: false,
                    },
                    span,
                ))
            }
            TokenKind::As => {
                let target = self.parse_type()?;
                let span = left.span.merge(&target.span);
                Ok(self.make_expr(
                    ExprKind::Cast {
                        expr: Box::new(left),
                        target,
                    },
                    span,
                ))
            }
            _ => Err(ParserError::unexpected_token(
                "operator",
                format!("{}", token.kind),
                token.span,
            )),
        }
    }

    fn binary_expr(
        &mut self,
        left: Expr,
        operator: BinaryOp,
        precedence: Precedence,
    ) -> ParseResult<Expr> {
        let right = self.parse_precedence(precedence.next())?;
        let span = left.span.merge(&right.span);
        Ok(self.make_expr(
            ExprKind::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            },
            span,
        ))
    }

    fn logical_expr(
        &mut self,
        left: Expr,
        operator: LogicalOp,
        precedence: Precedence,
    ) -> ParseResult<Expr> {
        let right = self.parse_precedence(precedence.next())?;
        let span = left.span.merge(&right.span);
        Ok(self.make_expr(
            ExprKind::Logical {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            },
            span,
        ))
    }

    fn assignment(&mut self, target: Expr, operator: Option<BinaryOp>) -> ParseResult<Expr> {
        self.check_assignable(&target)?;
        // Right-associative: a = b = c
        let value = self.parse_precedence(Precedence::Assignment)?;
        let span = target.span.merge(&value.span);
        Ok(self.make_expr(
            ExprKind::Assign {
                target: Box::new(target),
                operator,
                value: Box::new(value),
            },
            span,
        ))
    }

    fn check_assignable(&self, target: &Expr) -> ParseResult<()> {
        match target.kind {
            ExprKind::Identifier(_) | ExprKind::Member { .. } | ExprKind::Index { .. } => Ok(()),
            _ => Err(ParserError::invalid_assignment_target(target.span)),
        }
    }

    fn unary(&mut self, operator: UnaryOp) -> ParseResult<Expr> {
        let start = self.advance().span;
        if operator == UnaryOp::Negate && self.check(&TokenKind::MinIntMagnitude) {
            let span = start.merge(&self.advance().span);
            return Ok(self.make_expr(ExprKind::IntLiteral(i64::MIN), span));
        }
        let operand = self.parse_precedence(Precedence::Unary)?;
        let span = start.merge(&operand.span);
        Ok(self.make_expr(
            ExprKind::Unary {
                operator,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn finish_call(&mut self, callee: Expr) -> ParseResult<Expr> {
        let arguments = self.arguments(&TokenKind::RightParen)?;
        let span = callee.span.merge(&self.previous_span());
        Ok(self.make_expr(
            ExprKind::Call {
                callee: Box::new(callee),
                arguments,
            },
            span,
        ))
    }

    /// Comma-separated expressions up to and including `close`.
    fn arguments(&mut self, close: &TokenKind) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        self.skip_layout_inside();
        if !self.check(close) {
            loop {
                self.skip_layout_inside();
                items.push(self.expression()?);
                self.skip_layout_inside();
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
                self.skip_layout_inside();
                if self.check(close) {
                    break;
                }
            }
        }
        self.skip_layout_inside();
        self.expect(close)?;
        Ok(items)
    }

    fn skip_layout_inside(&mut self) {
        while self.peek().kind.is_trivia() {
            self.advance();
        }
    }

    fn grouping_or_cast(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;

        if let TokenKind::Identifier(name) = &self.peek().kind {
            let is_cast = is_builtin_type_name(name)
                && name != "auto"
                && self.check_nth(1, &TokenKind::RightParen)
                && matches!(
                    self.peek_nth(2).kind,
                    TokenKind::Identifier(_)
                        | TokenKind::IntLiteral(_)
                        | TokenKind::FloatLiteral(_)
                        | TokenKind::StringLiteral(_)
                        | TokenKind::True
                        | TokenKind::False
                        | TokenKind::Null
                        | TokenKind::LeftParen
                        | TokenKind::New
                );
            if is_cast {
                let target = self.parse_type()?;
                self.expect(&TokenKind::RightParen)?;
                let operand = self.parse_precedence(Precedence::Unary)?;
                let span = start.merge(&operand.span);
                return Ok(self.make_expr(
                    ExprKind::Cast {
                        expr: Box::new(operand),
                        target,
                    },
                    span,
                ));
            }
        }

        let mut expr = self.expression()?;
        self.expect(&TokenKind::RightParen)?;
        expr.span = start.merge(&self.previous_span());
        Ok(expr)
    }

    fn list_literal(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        let items = self.arguments(&TokenKind::RightBracket)?;
        let span = start.merge(&self.previous_span());
        Ok(self.make_expr(ExprKind::List(items), span))
    }

    fn dict_literal(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        let mut entries = Vec::new();

        loop {
            self.skip_layout_inside();
            if self.check(&TokenKind::RightBrace) {
                break;
            }
            let key = self.expression()?;
            self.skip_layout_inside();
            self.expect(&TokenKind::Colon)?;
            self.skip_layout_inside();
            let value = self.expression()?;
            entries.push((key, value));
            self.skip_layout_inside();
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.skip_layout_inside();
        self.expect(&TokenKind::RightBrace)?;

        let span = start.merge(&self.previous_span());
        Ok(self.make_expr(ExprKind::Dict(entries), span))
    }

    fn new_expression(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        let type_span = self.current_span();
        let mut class_name = self.expect_identifier()?;
        while self.match_token(&TokenKind::Dot) || self.match_token(&TokenKind::DoubleColon) {
            class_name.push('.');
            class_name.push_str(&self.expect_identifier()?);
        }

        if self.match_token(&TokenKind::LeftBracket) {
            let size = self.expression()?;
            self.expect(&TokenKind::RightBracket)?;
            let span = start.merge(&self.previous_span());
            let element = TypeAnnotation::named(class_name, type_span);
            return Ok(self.make_expr(
                ExprKind::NewArray {
                    element,
                    size: Box::new(size),
                },
                span,
            ));
        }

        let arguments = if self.match_token(&TokenKind::LeftParen) {
            self.arguments(&TokenKind::RightParen)?
        } else {
            Vec::new()
        };
        let span = start.merge(&self.previous_span());
        Ok(self.make_expr(
            ExprKind::New {
                class_name,
                arguments,
            },
            span,
        ))
    }

    /// `lambda x, y: x + y`
    fn lambda_expression(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        let mut params = Vec::new();
        if !self.check(&TokenKind::Colon) {
            loop {
                let span = self.current_span();
                let name = self.expect_identifier()?;
                let default_value = if self.match_token(&TokenKind::Equal) {
                    Some(self.parse_precedence(Precedence::Ternary)?)
                } else {
                    None
                };
                params.push(Parameter {
                    name,
                    type_annotation: None,
                    default_value,
                    span,
                });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::Colon)?;
        let body = self.expression()?;
        let span = start.merge(&body.span);
        Ok(self.make_expr(
            ExprKind::Lambda {
                params,
                body: LambdaBody::Expr(Box::new(body)),
            },
            span,
        ))
    }

    /// `fn(x) => x * 2` or `fn(x) { return x * 2 }`
    fn fn_expression(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        self.expect(&TokenKind::LeftParen)?;
        let params = self.parameters()?;
        if self.match_token(&TokenKind::Arrow) {
            self.parse_type()?;
        }

        let body = if self.match_token(&TokenKind::FatArrow) {
            LambdaBody::Expr(Box::new(self.expression()?))
        } else {
            self.expect(&TokenKind::LeftBrace)?;
            LambdaBody::Block(self.brace_block_body()?)
        };
        let span = start.merge(&self.previous_span());
        Ok(self.make_expr(ExprKind::Lambda { params, body }, span))
    }
}
