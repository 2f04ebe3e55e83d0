//! Type annotation parsing.

use crate::ast::{TypeAnnotation, TypeKind};
use crate::lexer::TokenKind;

use super::core::{ParseResult, Parser};

impl Parser {
    /// Parse a type: `name`, `a.b`, `List<int>`, `int*`, `int[]`, `str?`.
    pub(crate) fn parse_type(&mut self) -> ParseResult<TypeAnnotation> {
        let start = self.current_span();
        let mut name = match &self.peek().kind {
            TokenKind::Identifier(name) => name.clone(),
            TokenKind::Null => "null".to_string(),
            _ => return Err(self.unexpected("type")),
        };
        self.advance();

        while self.match_token(&TokenKind::Dot) || self.match_token(&TokenKind::DoubleColon) {
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }

        let mut ty = if self.match_token(&TokenKind::Less) {
            let mut args = Vec::new();
            loop {
                args.push(self.parse_type()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
            self.close_type_arguments()?;
            TypeAnnotation::new(
                TypeKind::Generic { name, args },
                start.merge(&self.previous_span()),
            )
        } else {
            TypeAnnotation::named(name, start)
        };

        loop {
            if self.match_token(&TokenKind::Star) {
                ty = TypeAnnotation::new(
                    TypeKind::Pointer(Box::new(ty)),
                    start.merge(&self.previous_span()),
                );
            } else if self.check(&TokenKind::LeftBracket)
                && self.check_nth(1, &TokenKind::RightBracket)
            {
                self.advance();
                self.advance();
                ty = TypeAnnotation::new(
                    TypeKind::Array(Box::new(ty)),
                    start.merge(&self.previous_span()),
                );
            } else if self.check(&TokenKind::Question) && !self.question_starts_ternary() {
                self.advance();
                ty = TypeAnnotation::new(
                    TypeKind::Nullable(Box::new(ty)),
                    start.merge(&self.previous_span()),
                );
            } else {
                break;
            }
        }

        Ok(ty)
    }

    /// `>` closes a type argument list; `>>` closes two of them.
    fn close_type_arguments(&mut self) -> ParseResult<()> {
        if self.check(&TokenKind::ShiftRight) {
            let index = self.current;
            self.tokens[index].kind = TokenKind::Greater;
            self.tokens[index].lexeme = ">".to_string();
            return Ok(());
        }
        self.expect(&TokenKind::Greater)?;
        Ok(())
    }

    /// In `x as int ? a : b` the `?` belongs to a ternary.
    fn question_starts_ternary(&self) -> bool {
        !matches!(
            self.peek_nth(1).kind,
            TokenKind::Newline
                | TokenKind::Equal
                | TokenKind::Comma
                | TokenKind::RightParen
                | TokenKind::LeftBrace
                | TokenKind::Colon
                | TokenKind::Semicolon
                | TokenKind::Eof
        )
    }

    /// `<T, typename U, class V>` after `template`.
    pub(crate) fn type_parameters(&mut self) -> ParseResult<Vec<String>> {
        self.expect(&TokenKind::Less)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::Greater) {
            loop {
                // `typename T` / `class T`
                if matches!(&self.peek().kind, TokenKind::Identifier(n) if n == "typename") {
                    self.advance();
                } else {
                    self.match_token(&TokenKind::Class);
                }
                params.push(self.expect_identifier()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.close_type_arguments()?;
        Ok(params)
    }
}
