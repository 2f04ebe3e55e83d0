//! Lexer/Scanner for Kaede source code.
//!
//! Layout is significant: at the start of every logical line the indentation
//! is compared against an indentation stack and `Indent`/`Dedent` tokens are
//! emitted. Inside parentheses, brackets and expression braces line breaks are
//! ignored, so brace-delimited code and indented code can be mixed freely.

use crate::error::LexerError;
use crate::lexer::token::{Token, TokenKind};
use crate::span::Span;

const TAB_WIDTH: usize = 4;

/// Everything the scanner mutates while it walks the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexerState {
    /// Byte offset of the next unread character.
    pub pos: usize,
    pub line: usize,
    pub column: usize,
    /// Indentation widths of the open blocks. Never empty; the bottom is `0`.
    pub indent_stack: Vec<usize>,
    /// Open `(`, `[` and expression braces. Layout tokens are suppressed while non-zero.
    pub paren_depth: usize,
    /// One entry per open `{`; `true` when that brace opened an expression.
    pub brace_stack: Vec<bool>,
    pub at_line_start: bool,
}

impl Default for LexerState {
    fn default() -> Self {
        Self {
            pos: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            paren_depth: 0,
            brace_stack: Vec::new(),
            at_line_start: true,
        }
    }
}

impl LexerState {
    pub fn new() -> Self {
        Self::default()
    }

    fn layout_active(&self) -> bool {
        self.paren_depth == 0
    }
}

/// The lexer transforms source code into a stream of tokens.
pub struct Scanner<'a> {
    source: &'a str,
    state: LexerState,
    tokens: Vec<Token>,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            state: LexerState::new(),
            tokens: Vec::new(),
        }
    }

    pub fn state(&self) -> &LexerState {
        &self.state
    }

    /// Rewind to the beginning of the source.
    pub fn reset(&mut self) {
        self.state = LexerState::new();
        self.tokens.clear();
    }

    /// Scan all tokens from the source, ending with `Eof`.
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, LexerError> {
        self.reset();

        loop {
            if self.state.at_line_start {
                self.handle_indentation()?;
            }
            self.skip_inline_whitespace();

            let Some(c) = self.peek() else {
                break;
            };

            match c {
                '\n' => {
                    self.advance();
                    if self.state.layout_active() {
                        self.emit_newline();
                        self.state.at_line_start = true;
                    }
                }
                '#' => self.scan_line_comment(),
                '/' if self.peek_at(1) == Some('/') => self.scan_line_comment(),
                '/' if self.peek_at(1) == Some('*') => self.scan_block_comment()?,
                '"' | '\'' => self.scan_string(c)?,
                c if c.is_ascii_digit() => self.scan_number()?,
                c if c.is_alphabetic() || c == '_' => self.scan_identifier(),
                _ => self.scan_operator()?,
            }
        }

        self.finish();
        Ok(std::mem::take(&mut self.tokens))
    }

    fn finish(&mut self) {
        self.emit_newline();
        let (pos, line, column) = (self.state.pos, self.state.line, self.state.column);
        while self.state.indent_stack.len() > 1 {
            self.state.indent_stack.pop();
            self.tokens.push(Token::new(
                TokenKind::Dedent,
                "",
                Span::new(pos, pos, line, column),
            ));
        }
        self.tokens.push(Token::eof(pos, line, column));
    }

    // ===== Layout =====

    fn handle_indentation(&mut self) -> Result<(), LexerError> {
        self.state.at_line_start = false;
        let line_start = self.state.pos;
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width += TAB_WIDTH - width % TAB_WIDTH,
                '\r' => {}
                _ => break,
            }
            self.advance();
        }

        // Blank and comment-only lines do not affect indentation.
        match self.peek() {
            None | Some('\n') | Some('#') => return Ok(()),
            Some('/') if matches!(self.peek_at(1), Some('/') | Some('*')) => return Ok(()),
            _ => {}
        }

        let span = Span::new(line_start, self.state.pos, self.state.line, 1);
        let top = self.current_indent();
        if width > top {
            self.state.indent_stack.push(width);
            self.tokens.push(Token::new(TokenKind::Indent, "", span));
        } else if width < top {
            while self.current_indent() > width {
                self.state.indent_stack.pop();
                self.tokens.push(Token::new(TokenKind::Dedent, "", span));
            }
            if self.current_indent() != width {
                if self.state.brace_stack.is_empty() {
                    return Err(LexerError::indentation_mismatch(width, span));
                }
                // Inside a brace block the column is only cosmetic.
                self.state.indent_stack.push(width);
            }
        }
        Ok(())
    }

    fn current_indent(&self) -> usize {
        self.state.indent_stack.last().copied().unwrap_or(0)
    }

    fn emit_newline(&mut self) {
        let needed = self
            .tokens
            .iter()
            .rev()
            .find(|t| !matches!(t.kind, TokenKind::Comment(_)))
            .is_some_and(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::Indent));
        if needed {
            let pos = self.state.pos;
            let span = Span::new(pos, pos, self.state.line, self.state.column);
            self.tokens.push(Token::new(TokenKind::Newline, "\n", span));
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c == ' ' || c == '\t' || c == '\r' || (c == '\n' && !self.state.layout_active()) {
                self.advance();
            } else {
                break;
            }
        }
    }

    // ===== Comments =====

    fn scan_line_comment(&mut self) {
        let (start, line, column) = self.mark();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
        let text = &self.source[start..self.state.pos];
        let body = text
            .trim_start_matches('#')
            .trim_start_matches("//")
            .trim()
            .to_string();
        self.push_token(TokenKind::Comment(body), start, line, column);
    }

    fn scan_block_comment(&mut self) -> Result<(), LexerError> {
        let (start, line, column) = self.mark();
        self.advance();
        self.advance();
        loop {
            match self.peek() {
                None => {
                    return Err(LexerError::unterminated_comment(Span::new(
                        start,
                        self.state.pos,
                        line,
                        column,
                    )))
                }
                Some('*') if self.peek_at(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    break;
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
        let text = &self.source[start + 2..self.state.pos - 2];
        self.push_token(TokenKind::Comment(text.trim().to_string()), start, line, column);
        Ok(())
    }

    // ===== Literals =====

    fn scan_string(&mut self, quote: char) -> Result<(), LexerError> {
        let (start, line, column) = self.mark();
        self.advance();
        let mut value = String::new();

        loop {
            let Some(c) = self.advance() else {
                return Err(LexerError::unterminated_string(Span::new(
                    start,
                    self.state.pos,
                    line,
                    column,
                )));
            };
            if c == quote {
                break;
            }
            if c != '\\' {
                value.push(c);
                continue;
            }

            let escape_span = Span::new(self.state.pos - 1, self.state.pos, self.state.line, self.state.column - 1);
            let Some(e) = self.advance() else {
                return Err(LexerError::unterminated_string(Span::new(
                    start,
                    self.state.pos,
                    line,
                    column,
                )));
            };
            match e {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                'a' => value.push('\x07'),
                'b' => value.push('\x08'),
                'f' => value.push('\x0c'),
                'v' => value.push('\x0b'),
                '\\' => value.push('\\'),
                '\'' => value.push('\''),
                '"' => value.push('"'),
                '\n' => {}
                'x' => {
                    let hex: String = (0..2).filter_map(|_| self.advance_if(|c| c.is_ascii_hexdigit())).collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 2)
                        .and_then(char::from_u32)
                        .ok_or_else(|| LexerError::invalid_escape('x', escape_span))?;
                    value.push(code);
                }
                'u' if self.peek() == Some('{') => {
                    self.advance();
                    let hex: String = std::iter::from_fn(|| self.advance_if(|c| c.is_ascii_hexdigit())).collect();
                    let closed = self.advance_if(|c| c == '}').is_some();
                    let code = u32::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| closed)
                        .and_then(char::from_u32)
                        .ok_or_else(|| LexerError::invalid_escape('u', escape_span))?;
                    value.push(code);
                }
                '0'..='7' => {
                    let mut digits = e.to_string();
                    while digits.len() < 3 {
                        match self.advance_if(|c| ('0'..='7').contains(&c)) {
                            Some(d) => digits.push(d),
                            None => break,
                        }
                    }
                    let code = u32::from_str_radix(&digits, 8)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| LexerError::invalid_escape(e, escape_span))?;
                    value.push(code);
                }
                other => return Err(LexerError::invalid_escape(other, escape_span)),
            }
        }

        self.push_token(TokenKind::StringLiteral(value), start, line, column);
        Ok(())
    }

    fn scan_number(&mut self) -> Result<(), LexerError> {
        let (start, line, column) = self.mark();

        let radix = match (self.peek(), self.peek_at(1)) {
            (Some('0'), Some('x' | 'X')) => Some(16),
            (Some('0'), Some('b' | 'B')) => Some(2),
            (Some('0'), Some('o' | 'O')) => Some(8),
            _ => None,
        };

        if let Some(radix) = radix {
            self.advance();
            self.advance();
            while self.advance_if(|c| c.is_ascii_alphanumeric() || c == '_').is_some() {}
            let text = &self.source[start..self.state.pos];
            let span = Span::new(start, self.state.pos, line, column);
            let digits: String = text[2..].chars().filter(|&c| c != '_').collect();
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| LexerError::invalid_number(text, span))?;
            self.push_token(TokenKind::IntLiteral(value), start, line, column);
            return Ok(());
        }

        let mut is_float = false;
        while self.advance_if(|c| c.is_ascii_digit() || c == '_').is_some() {}
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.advance_if(|c| c.is_ascii_digit() || c == '_').is_some() {}
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let exponent_follows = match self.peek_at(1) {
                Some(c) if c.is_ascii_digit() => true,
                Some('+' | '-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                _ => false,
            };
            if exponent_follows {
                is_float = true;
                self.advance();
                self.advance();
                while self.advance_if(|c| c.is_ascii_digit()).is_some() {}
            }
        }
        let literal_end = self.state.pos;

        let suffix = self.advance_if(|c| c.is_alphabetic());
        let trailing = self.advance_if(|c| c.is_alphanumeric() || c == '_').is_some();
        let text = &self.source[start..self.state.pos];
        let span = Span::new(start, self.state.pos, line, column);
        if trailing {
            return Err(LexerError::invalid_number(text, span));
        }
        let as_float = match suffix {
            None => is_float,
            Some('f' | 'F' | 'd' | 'D') => true,
            Some('l' | 'L' | 'u' | 'U') if !is_float => false,
            Some(_) => return Err(LexerError::invalid_number(text, span)),
        };

        let digits: String = self.source[start..literal_end]
            .chars()
            .filter(|&c| c != '_')
            .collect();
        let kind = if as_float {
            TokenKind::FloatLiteral(
                digits
                    .parse::<f64>()
                    .map_err(|_| LexerError::invalid_number(text, span))?,
            )
        } else {
            match digits.parse::<i64>() {
                Ok(value) => TokenKind::IntLiteral(value),
                Err(_) if digits.parse::<u64>() == Ok(i64::MIN.unsigned_abs()) => {
                    TokenKind::MinIntMagnitude
                }
                Err(_) => return Err(LexerError::invalid_number(text, span)),
            }
        };
        self.push_token(kind, start, line, column);
        Ok(())
    }

    fn scan_identifier(&mut self) {
        let (start, line, column) = self.mark();
        while self.advance_if(|c| c.is_alphanumeric() || c == '_').is_some() {}
        let text = &self.source[start..self.state.pos];
        let kind = TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Identifier(text.to_string()));
        self.push_token(kind, start, line, column);
    }

    // ===== Operators =====

    fn scan_operator(&mut self) -> Result<(), LexerError> {
        let (start, line, column) = self.mark();

        // Longest match first, so `<<=` wins over `<<` and `<`.
        let matched = (1..=3).rev().find_map(|len| {
            let text = self.source.get(start..start + len)?;
            TokenKind::operator(text).map(|kind| (kind, len))
        });
        let Some((kind, len)) = matched else {
            let c = self.peek().unwrap_or('\0');
            return Err(LexerError::unexpected_char(
                c,
                Span::new(start, start + c.len_utf8(), line, column),
            ));
        };
        for _ in 0..len {
            self.advance();
        }

        match kind {
            TokenKind::LeftParen | TokenKind::LeftBracket => self.state.paren_depth += 1,
            TokenKind::RightParen | TokenKind::RightBracket => {
                self.state.paren_depth = self.state.paren_depth.saturating_sub(1)
            }
            TokenKind::LeftBrace => {
                let expression = self.opens_expression_brace();
                self.state.brace_stack.push(expression);
                if expression {
                    self.state.paren_depth += 1;
                }
            }
            TokenKind::RightBrace => {
                if self.state.brace_stack.pop() == Some(true) {
                    self.state.paren_depth = self.state.paren_depth.saturating_sub(1);
                }
            }
            _ => {}
        }

        self.push_token(kind, start, line, column);
        Ok(())
    }

    /// A `{` is a dict literal rather than a block when it follows a token
    /// that expects an operand.
    fn opens_expression_brace(&self) -> bool {
        if self.state.paren_depth > 0 {
            return true;
        }
        let previous = self
            .tokens
            .iter()
            .rev()
            .find(|t| !matches!(t.kind, TokenKind::Comment(_)));
        matches!(
            previous.map(|t| &t.kind),
            Some(
                TokenKind::Equal
                    | TokenKind::PlusEqual
                    | TokenKind::MinusEqual
                    | TokenKind::StarEqual
                    | TokenKind::SlashEqual
                    | TokenKind::PercentEqual
                    | TokenKind::Comma
                    | TokenKind::Return
                    | TokenKind::FatArrow
                    | TokenKind::Question
                    | TokenKind::Plus
                    | TokenKind::EqualEqual
                    | TokenKind::BangEqual
                    | TokenKind::In
            )
        )
    }

    // ===== Character helpers =====

    fn mark(&self) -> (usize, usize, usize) {
        (self.state.pos, self.state.line, self.state.column)
    }

    fn push_token(&mut self, kind: TokenKind, start: usize, line: usize, column: usize) {
        let lexeme = &self.source[start..self.state.pos];
        self.tokens.push(Token::new(
            kind,
            lexeme,
            Span::new(start, self.state.pos, line, column),
        ));
    }

    fn peek(&self) -> Option<char> {
        self.source[self.state.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.source[self.state.pos..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.state.pos += c.len_utf8();
        if c == '\n' {
            self.state.line += 1;
            self.state.column = 1;
        } else {
            self.state.column += 1;
        }
        Some(c)
    }

    fn advance_if(&mut self, pred: impl Fn(char) -> bool) -> Option<char> {
        match self.peek() {
            Some(c) if pred(c) => self.advance(),
            _ => None,
        }
    }
}

/// Tokenize a whole source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexerError> {
    Scanner::new(source).scan_tokens()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Identifier(name.to_string())
    }

    #[test]
    fn test_longest_operator_wins() {
        assert_eq!(
            kinds("a <<= b << c < d <=> e"),
            vec![
                ident("a"),
                TokenKind::ShiftLeftEqual,
                ident("b"),
                TokenKind::ShiftLeft,
                ident("c"),
                TokenKind::Less,
                ident("d"),
                TokenKind::Spaceship,
                ident("e"),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        assert_eq!(
            kinds("if x:\n    a\nb\n"),
            vec![
                TokenKind::If,
                ident("x"),
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                ident("a"),
                TokenKind::Newline,
                TokenKind::Dedent,
                ident("b"),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_dedents_closed_at_eof() {
        let tokens = kinds("def f():\n  if x:\n    y");
        let dedents = tokens.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(tokens.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn test_indentation_mismatch_is_an_error() {
        let err = tokenize("if x:\n  a\n b").unwrap_err();
        match err {
            LexerError::IndentationMismatch { found, span } => {
                assert_eq!(found, 1);
                assert_eq!(span.line, 3);
            }
            other => panic!("expected indentation error, got {other:?}"),
        }
    }

    #[test]
    fn test_newlines_ignored_inside_parens() {
        assert_eq!(
            kinds("f(1,\n      2)"),
            vec![
                ident("f"),
                TokenKind::LeftParen,
                TokenKind::IntLiteral(1),
                TokenKind::Comma,
                TokenKind::IntLiteral(2),
                TokenKind::RightParen,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_blank_and_comment_lines_keep_indentation() {
        let tokens = kinds("if x:\n    a\n\n# note\n    b\n");
        assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Indent).count(), 1);
        assert!(tokens.contains(&TokenKind::Comment("note".to_string())));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("0xFF 0b1010 0o17 1_000_000 3.25 1e3 2.5e-1 7f 9L"),
            vec![
                TokenKind::IntLiteral(255),
                TokenKind::IntLiteral(10),
                TokenKind::IntLiteral(15),
                TokenKind::IntLiteral(1_000_000),
                TokenKind::FloatLiteral(3.25),
                TokenKind::FloatLiteral(1000.0),
                TokenKind::FloatLiteral(0.25),
                TokenKind::FloatLiteral(7.0),
                TokenKind::IntLiteral(9),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(matches!(tokenize("0x"), Err(LexerError::InvalidNumber(..))));
        assert!(matches!(tokenize("12abc"), Err(LexerError::InvalidNumber(..))));
        assert!(matches!(tokenize("0b102"), Err(LexerError::InvalidNumber(..))));
        assert!(matches!(
            tokenize("9223372036854775809"),
            Err(LexerError::InvalidNumber(..))
        ));
    }

    #[test]
    fn test_min_int_magnitude() {
        assert_eq!(
            kinds("-9223372036854775808"),
            vec![
                TokenKind::Minus,
                TokenKind::MinIntMagnitude,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\tb\x41\101\n""#),
            vec![
                TokenKind::StringLiteral("it's".to_string()),
                TokenKind::StringLiteral("a\tbAA\n".to_string()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string_reports_start() {
        let err = tokenize("x = \"abc").unwrap_err();
        assert_eq!(err, LexerError::UnterminatedString(Span::new(4, 8, 1, 5)));
    }

    #[test]
    fn test_bad_escape() {
        assert!(matches!(tokenize(r#""\q""#), Err(LexerError::InvalidEscape('q', _))));
    }

    #[test]
    fn test_comments_are_tokens() {
        assert_eq!(
            kinds("a // one\n/* two */ b # three"),
            vec![
                ident("a"),
                TokenKind::Comment("one".to_string()),
                TokenKind::Newline,
                TokenKind::Comment("two".to_string()),
                ident("b"),
                TokenKind::Comment("three".to_string()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
        assert!(matches!(
            tokenize("/* never closed"),
            Err(LexerError::UnterminatedComment(_))
        ));
    }

    #[test]
    fn test_unknown_character() {
        let err = tokenize("a @ b").unwrap_err();
        assert_eq!(err, LexerError::UnexpectedChar('@', Span::new(2, 3, 1, 3)));
    }

    #[test]
    fn test_keyword_aliases() {
        assert_eq!(
            kinds("def func True None and not"),
            vec![
                TokenKind::Fn,
                TokenKind::Fn,
                TokenKind::True,
                TokenKind::Null,
                TokenKind::AndAnd,
                TokenKind::Bang,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("let x = 1\n  + 2").unwrap();
        let plus = tokens.iter().find(|t| t.kind == TokenKind::Plus).unwrap();
        assert_eq!((plus.line(), plus.column()), (2, 3));
        assert_eq!(plus.offset(), 12);
        assert_eq!(plus.lexeme, "+");
    }

    #[test]
    fn test_dict_brace_suppresses_layout() {
        let tokens = kinds("d = {\n  'a': 1,\n}\n");
        assert!(!tokens.contains(&TokenKind::Indent));
        assert!(!tokens.contains(&TokenKind::Dedent));
    }

    #[test]
    fn test_state_resets_between_runs() {
        let mut scanner = Scanner::new("if x:\n  y\n");
        let first = scanner.scan_tokens().unwrap();
        let second = scanner.scan_tokens().unwrap();
        assert_eq!(first, second);
        assert_eq!(scanner.state().indent_stack, vec![0]);
    }
}
