//! Declaration parsing: functions, classes, enums, namespaces, variables,
//! templates and imports.

use crate::ast::*;
use crate::error::ParserError;
use crate::lexer::TokenKind;
use crate::span::Span;

use super::core::{ParseResult, Parser};
use super::precedence::Precedence;

const ACCESS_SPECIFIERS: &[&str] = &["public", "private", "protected"];

impl Parser {
    pub(crate) fn declaration(&mut self) -> ParseResult<Stmt> {
        match self.peek().kind {
            TokenKind::Import | TokenKind::From => self.import_declaration(),
            TokenKind::Using => self.using_declaration(),
            TokenKind::Export => self.export_declaration(),
            TokenKind::Template => self.template_declaration(),
            TokenKind::Fn if matches!(self.peek_nth(1).kind, TokenKind::Identifier(_)) => {
                let start = self.advance().span;
                let decl = self.function_declaration(start, None, false)?;
                let span = decl.span;
                Ok(self.make_stmt(StmtKind::Function(decl), span))
            }
            TokenKind::Class | TokenKind::Struct => self.class_declaration(),
            TokenKind::Enum => self.enum_declaration(),
            TokenKind::Namespace => self.namespace_declaration(),
            TokenKind::Let | TokenKind::Var | TokenKind::Const => self.var_declaration(),
            TokenKind::Static => self.static_declaration(),
            TokenKind::Identifier(_) => {
                if let Some(stmt) = self.typed_declaration()? {
                    return Ok(stmt);
                }
                if self.looks_like_bare_signature() {
                    let start = self.current_span();
                    let decl = self.function_declaration(start, None, false)?;
                    let span = decl.span;
                    return Ok(self.make_stmt(StmtKind::Function(decl), span));
                }
                self.statement()
            }
            _ => self.statement(),
        }
    }

    // ===== Variables =====

    fn var_declaration(&mut self) -> ParseResult<Stmt> {
        let start = self.current_span();
        let decl = self.var_decl_core()?;
        self.end_statement()?;
        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(StmtKind::VarDecl(decl), span))
    }

    /// `let x`, `var x: int = 1`, `const int N = 4`; no terminator.
    pub(crate) fn var_decl_core(&mut self) -> ParseResult<VarDecl> {
        let kind = match self.advance().kind {
            TokenKind::Let => VarKind::Let,
            TokenKind::Var => VarKind::Var,
            TokenKind::Const => VarKind::Const,
            _ => VarKind::Static,
        };
        self.var_decl_rest(kind)
    }

    fn var_decl_rest(&mut self, kind: VarKind) -> ParseResult<VarDecl> {
        // C-style `const int N`
        let mut type_annotation = None;
        if matches!(self.peek_nth(1).kind, TokenKind::Identifier(_))
            && matches!(self.peek().kind, TokenKind::Identifier(_))
        {
            type_annotation = Some(self.parse_type()?);
        }

        let name = self.expect_identifier()?;
        if self.match_token(&TokenKind::Colon) {
            type_annotation = Some(self.parse_type()?);
        }
        let initializer = if self.match_token(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };

        Ok(VarDecl {
            name,
            kind,
            type_annotation,
            initializer,
        })
    }

    /// `static fn f()`, `static let x = 1`, `static int count = 0`, `static x = 1`.
    fn static_declaration(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        match self.peek().kind {
            TokenKind::Fn => {
                self.advance();
                let decl = self.function_declaration(start, None, true)?;
                let span = decl.span;
                Ok(self.make_stmt(StmtKind::Function(decl), span))
            }
            TokenKind::Let | TokenKind::Var | TokenKind::Const => {
                self.advance();
                self.static_var_rest(start)
            }
            _ => self.static_var_rest(start),
        }
    }

    fn static_var_rest(&mut self, start: Span) -> ParseResult<Stmt> {
        let decl = self.var_decl_rest(VarKind::Static)?;
        self.end_statement()?;
        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(StmtKind::VarDecl(decl), span))
    }

    /// C-style declarations that start with a type: `int x = 1`, `Point* p`,
    /// `List<int> xs`, `int add(int a, int b) { ... }`.
    /// Returns `None` (with the position restored) when the tokens are not one.
    fn typed_declaration(&mut self) -> ParseResult<Option<Stmt>> {
        if !self.may_start_typed_declaration() {
            return Ok(None);
        }

        let saved = self.current;
        let saved_tokens = if self.check_nth(1, &TokenKind::Less) {
            Some(self.tokens.clone())
        } else {
            None
        };
        let restore = |parser: &mut Parser| {
            parser.current = saved;
            if let Some(tokens) = saved_tokens.clone() {
                parser.tokens = tokens;
            }
        };

        let start = self.current_span();
        let Ok(ty) = self.parse_type() else {
            restore(self);
            return Ok(None);
        };
        if !matches!(self.peek().kind, TokenKind::Identifier(_)) {
            restore(self);
            return Ok(None);
        }

        if self.check_nth(1, &TokenKind::LeftParen) {
            let decl = self.function_declaration(start, Some(ty), false)?;
            let span = decl.span;
            return Ok(Some(self.make_stmt(StmtKind::Function(decl), span)));
        }

        if !matches!(
            self.peek_nth(1).kind,
            TokenKind::Equal
                | TokenKind::Semicolon
                | TokenKind::Newline
                | TokenKind::RightBrace
                | TokenKind::Dedent
                | TokenKind::Eof
        ) {
            restore(self);
            return Ok(None);
        }

        let name = self.expect_identifier()?;
        let initializer = if self.match_token(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.end_statement()?;
        let span = start.merge(&self.previous_span());
        Ok(Some(self.make_stmt(
            StmtKind::VarDecl(VarDecl {
                name,
                kind: VarKind::Var,
                type_annotation: Some(ty),
                initializer,
            }),
            span,
        )))
    }

    fn may_start_typed_declaration(&self) -> bool {
        match self.peek_nth(1).kind {
            TokenKind::Identifier(_) | TokenKind::Less => true,
            TokenKind::Star | TokenKind::Question => {
                matches!(self.peek_nth(2).kind, TokenKind::Identifier(_))
            }
            TokenKind::LeftBracket => self.check_nth(2, &TokenKind::RightBracket),
            _ => false,
        }
    }

    /// `name(...) -> T`, `name(...):` or `name(...) {` with no `fn` keyword.
    fn looks_like_bare_signature(&self) -> bool {
        if !self.check_nth(1, &TokenKind::LeftParen) {
            return false;
        }
        let mut depth = 0usize;
        let mut n = 1;
        loop {
            match self.peek_nth(n).kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            n += 1;
        }
        let close_line = self.peek_nth(n).span.line;
        let after = self.peek_nth(n + 1);
        match after.kind {
            TokenKind::Arrow => true,
            TokenKind::Colon => self.check_nth(n + 2, &TokenKind::Newline),
            TokenKind::LeftBrace => after.span.line == close_line,
            _ => false,
        }
    }

    // ===== Functions =====

    /// The function name is next; any introducing keyword is already consumed.
    /// `return_type` is set for C-style `int add(...)` declarations.
    pub(crate) fn function_declaration(
        &mut self,
        start: Span,
        return_type: Option<TypeAnnotation>,
        is_static: bool,
    ) -> ParseResult<FunctionDecl> {
        let name = self.expect_member_name()?;
        self.function_rest(start, name, return_type, is_static)
    }

    fn function_rest(
        &mut self,
        start: Span,
        name: String,
        mut return_type: Option<TypeAnnotation>,
        is_static: bool,
    ) -> ParseResult<FunctionDecl> {
        let type_params = if self.check(&TokenKind::Less) {
            self.type_parameters()?
        } else {
            Vec::new()
        };

        self.expect(&TokenKind::LeftParen)?;
        let params = self.parameters()?;

        if self.match_token(&TokenKind::Arrow) {
            return_type = Some(self.parse_type()?);
        }
        // `const` after a C++ method signature
        self.match_token(&TokenKind::Const);

        let body = self.function_body()?;
        let span = start.merge(&self.previous_span());
        Ok(FunctionDecl {
            name,
            type_params,
            params,
            return_type,
            body,
            is_static,
            span,
        })
    }

    fn function_body(&mut self) -> ParseResult<Vec<Stmt>> {
        if self.match_token(&TokenKind::FatArrow) {
            let value = self.expression()?;
            self.end_statement()?;
            let span = value.span;
            return Ok(vec![self.make_stmt(StmtKind::Return(Some(value)), span)]);
        }
        // Forward declaration: `int f(int x);`
        if self.match_token(&TokenKind::Semicolon) {
            return Ok(Vec::new());
        }
        let block = self.block()?;
        match block.kind {
            StmtKind::Block(body) => Ok(body),
            _ => Ok(vec![block]),
        }
    }

    /// Parameters up to and including `)`; the `(` is already consumed.
    /// Accepts `name`, `name: Type`, `Type name` and `= default` on any of them.
    pub(crate) fn parameters(&mut self) -> ParseResult<Vec<Parameter>> {
        let mut params = Vec::new();
        loop {
            self.skip_layout();
            if self.match_token(&TokenKind::RightParen) {
                break;
            }

            let span = self.current_span();
            self.match_token(&TokenKind::Const);
            let mut type_annotation = None;
            let type_first = matches!(self.peek().kind, TokenKind::Identifier(_))
                && matches!(
                    self.peek_nth(1).kind,
                    TokenKind::Identifier(_)
                        | TokenKind::Star
                        | TokenKind::Amp
                        | TokenKind::Less
                        | TokenKind::LeftBracket
                );
            if type_first {
                type_annotation = Some(self.parse_type()?);
                // reference parameters: `int& x`
                self.match_token(&TokenKind::Amp);
            }

            let name = self.expect_identifier()?;
            if type_annotation.is_none() && self.match_token(&TokenKind::Colon) {
                type_annotation = Some(self.parse_type()?);
            }
            let default_value = if self.match_token(&TokenKind::Equal) {
                Some(self.parse_precedence(Precedence::Ternary)?)
            } else {
                None
            };

            if params.iter().any(|p: &Parameter| p.name == name) {
                return Err(ParserError::general(
                    format!("duplicate parameter '{}'", name),
                    span,
                ));
            }
            params.push(Parameter {
                name,
                type_annotation,
                default_value,
                span: span.merge(&self.previous_span()),
            });

            self.skip_layout();
            if !self.match_token(&TokenKind::Comma) {
                self.expect(&TokenKind::RightParen)?;
                break;
            }
        }
        Ok(params)
    }

    // ===== Classes and structs =====

    fn class_declaration(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance();
        let is_struct = keyword.kind == TokenKind::Struct;
        let name = self.expect_identifier()?;
        let type_params = if self.check(&TokenKind::Less) {
            self.type_parameters()?
        } else {
            Vec::new()
        };

        // `extends Base`, `(Base)` or `: public Base`
        let mut base = None;
        if self.match_token(&TokenKind::Extends) {
            base = Some(self.dotted_name()?);
        } else if self.check(&TokenKind::LeftParen) {
            self.advance();
            if !self.check(&TokenKind::RightParen) {
                base = Some(self.dotted_name()?);
            }
            self.expect(&TokenKind::RightParen)?;
        } else if self.check(&TokenKind::Colon)
            && matches!(self.peek_nth(1).kind, TokenKind::Identifier(_))
        {
            self.advance();
            if self.is_access_specifier() {
                self.advance();
            }
            base = Some(self.dotted_name()?);
        }

        let mut class = ClassDecl {
            name,
            type_params,
            base,
            fields: Vec::new(),
            methods: Vec::new(),
            is_struct,
        };

        let braced = self.open_body()?;
        loop {
            if self.close_body(braced) {
                break;
            }
            self.class_member(&mut class)?;
        }
        // `struct P { ... };`
        if braced {
            self.match_token(&TokenKind::Semicolon);
        }

        let span = keyword.span.merge(&self.previous_span());
        Ok(self.make_stmt(StmtKind::Class(class), span))
    }

    /// Opens a `{` or `: NEWLINE INDENT` body. Returns whether it is braced.
    fn open_body(&mut self) -> ParseResult<bool> {
        if self.match_token(&TokenKind::LeftBrace) {
            return Ok(true);
        }
        self.expect(&TokenKind::Colon)?;
        self.skip_newlines();
        self.expect(&TokenKind::Indent)?;
        Ok(false)
    }

    /// Skips separators and consumes the closing token if it is next.
    fn close_body(&mut self, braced: bool) -> bool {
        if braced {
            self.skip_layout();
            self.match_token(&TokenKind::RightBrace) || self.is_at_end()
        } else {
            while matches!(
                self.peek().kind,
                TokenKind::Newline | TokenKind::Semicolon
            ) {
                self.advance();
            }
            self.match_token(&TokenKind::Dedent) || self.is_at_end()
        }
    }

    fn is_access_specifier(&self) -> bool {
        matches!(&self.peek().kind, TokenKind::Identifier(n) if ACCESS_SPECIFIERS.contains(&n.as_str()))
    }

    fn class_member(&mut self, class: &mut ClassDecl) -> ParseResult<()> {
        // `public:` sections and `public` prefixes carry no meaning here.
        if self.is_access_specifier() {
            self.advance();
            if self.match_token(&TokenKind::Colon) {
                return Ok(());
            }
        }
        if self.match_token(&TokenKind::Pass) {
            return self.end_statement();
        }

        let start = self.current_span();
        let is_static = self.match_token(&TokenKind::Static);

        match self.peek().kind.clone() {
            TokenKind::Fn => {
                self.advance();
                let method = self.function_declaration(start, None, is_static)?;
                class.methods.push(strip_self_param(method));
            }
            TokenKind::Let | TokenKind::Var | TokenKind::Const => {
                let decl = self.var_decl_core()?;
                self.end_statement()?;
                class.fields.push(FieldDecl {
                    name: decl.name,
                    type_annotation: decl.type_annotation,
                    initializer: decl.initializer,
                    is_static,
                    span: start.merge(&self.previous_span()),
                });
            }
            // `~Name()` destructor
            TokenKind::Tilde => {
                self.advance();
                self.expect_identifier()?;
                let method =
                    self.function_rest(start, "__del__".to_string(), None, is_static)?;
                class.methods.push(method);
            }
            TokenKind::Identifier(name) => {
                if self.check_nth(1, &TokenKind::LeftParen) {
                    // constructor or untyped method
                    self.advance();
                    let method = self.function_rest(start, name, None, is_static)?;
                    class.methods.push(strip_self_param(method));
                } else if matches!(
                    self.peek_nth(1).kind,
                    TokenKind::Colon | TokenKind::Equal
                ) || self.at_field_end(1)
                {
                    // `x: int = 0`, `x = 0`, `x`
                    self.advance();
                    let type_annotation = if self.match_token(&TokenKind::Colon) {
                        Some(self.parse_type()?)
                    } else {
                        None
                    };
                    let initializer = if self.match_token(&TokenKind::Equal) {
                        Some(self.expression()?)
                    } else {
                        None
                    };
                    self.end_statement()?;
                    class.fields.push(FieldDecl {
                        name,
                        type_annotation,
                        initializer,
                        is_static,
                        span: start.merge(&self.previous_span()),
                    });
                } else {
                    self.typed_member(class, start, is_static)?;
                }
            }
            _ => return Err(self.unexpected("class member")),
        }
        Ok(())
    }

    fn at_field_end(&self, n: usize) -> bool {
        matches!(
            self.peek_nth(n).kind,
            TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::RightBrace
                | TokenKind::Dedent
                | TokenKind::Eof
        )
    }

    /// `int x = 0;` or `float area() { ... }` inside a class body.
    fn typed_member(
        &mut self,
        class: &mut ClassDecl,
        start: Span,
        is_static: bool,
    ) -> ParseResult<()> {
        let ty = self.parse_type()?;
        self.match_token(&TokenKind::Amp);
        let name = self.expect_member_name()?;

        if self.check(&TokenKind::LeftParen) || self.check(&TokenKind::Less) {
            let method = self.function_rest(start, name, Some(ty), is_static)?;
            class.methods.push(strip_self_param(method));
            return Ok(());
        }

        let initializer = if self.match_token(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.end_statement()?;
        class.fields.push(FieldDecl {
            name,
            type_annotation: Some(ty),
            initializer,
            is_static,
            span: start.merge(&self.previous_span()),
        });
        Ok(())
    }

    // ===== Enums and namespaces =====

    /// `enum Color { Red, Green = 5, Blue }` or the indented form.
    fn enum_declaration(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        // `enum class Color`
        self.match_token(&TokenKind::Class);
        let name = self.expect_identifier()?;

        let braced = self.open_body()?;
        let mut variants: Vec<EnumVariant> = Vec::new();
        loop {
            if self.close_body(braced) {
                break;
            }
            let span = self.current_span();
            let variant = self.expect_identifier()?;
            let value = if self.match_token(&TokenKind::Equal) {
                Some(self.parse_precedence(Precedence::Ternary)?)
            } else {
                None
            };
            if variants.iter().any(|v| v.name == variant) {
                return Err(ParserError::general(
                    format!("duplicate variant '{}' in enum '{}'", variant, name),
                    span,
                ));
            }
            variants.push(EnumVariant {
                name: variant,
                value,
                span,
            });
            self.match_token(&TokenKind::Comma);
        }
        if braced {
            self.match_token(&TokenKind::Semicolon);
        }

        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(StmtKind::Enum(EnumDecl { name, variants }), span))
    }

    fn namespace_declaration(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let name = self.dotted_name()?;
        let body = if self.match_token(&TokenKind::LeftBrace) {
            self.brace_block_body()?
        } else {
            self.expect(&TokenKind::Colon)?;
            self.suite()?
        };
        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(StmtKind::Namespace { name, body }, span))
    }

    // ===== Templates =====

    /// `template<typename T> class Box { ... }`
    fn template_declaration(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let params = self.type_parameters()?;
        self.skip_newlines();
        let mut declaration = self.declaration()?;

        match &mut declaration.kind {
            StmtKind::Function(func) => func.type_params = params.clone(),
            StmtKind::Class(class) => class.type_params = params.clone(),
            _ => {}
        }

        let span = start.merge(&declaration.span);
        Ok(self.make_stmt(
            StmtKind::Template {
                params,
                declaration: Box::new(declaration),
            },
            span,
        ))
    }

    // ===== Modules =====

    /// `import a.b`, `import a as b`, `import "path"`, `from a import x, y`.
    fn import_declaration(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance();
        let decl = if keyword.kind == TokenKind::From {
            let module = self.module_name()?;
            self.expect(&TokenKind::Import)?;
            let mut items = Vec::new();
            if self.match_token(&TokenKind::Star) {
                items.push("*".to_string());
            } else {
                let parenthesized = self.match_token(&TokenKind::LeftParen);
                loop {
                    items.push(self.expect_identifier()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
                if parenthesized {
                    self.expect(&TokenKind::RightParen)?;
                }
            }
            ImportDecl {
                module,
                items,
                alias: None,
            }
        } else {
            let module = self.module_name()?;
            let alias = if self.match_token(&TokenKind::As) {
                Some(self.expect_identifier()?)
            } else {
                None
            };
            ImportDecl {
                module,
                items: Vec::new(),
                alias,
            }
        };
        self.end_statement()?;
        let span = keyword.span.merge(&self.previous_span());
        Ok(self.make_stmt(StmtKind::Import(decl), span))
    }

    fn module_name(&mut self) -> ParseResult<String> {
        if let TokenKind::StringLiteral(path) = &self.peek().kind {
            let path = path.clone();
            self.advance();
            return Ok(path);
        }
        self.dotted_name()
    }

    /// `using namespace foo` or `using foo`.
    fn using_declaration(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        self.match_token(&TokenKind::Namespace);
        let name = self.dotted_name()?;
        self.end_statement()?;
        let span = start.merge(&self.previous_span());
        Ok(self.make_stmt(StmtKind::Using(name), span))
    }

    fn export_declaration(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let inner = self.declaration()?;
        if !matches!(
            inner.kind,
            StmtKind::Function(_)
                | StmtKind::Class(_)
                | StmtKind::Enum(_)
                | StmtKind::VarDecl(_)
                | StmtKind::Namespace { .. }
                | StmtKind::Template { .. }
        ) {
            return Err(ParserError::general(
                "only declarations can be exported",
                inner.span,
            ));
        }
        let span = start.merge(&inner.span);
        Ok(self.make_stmt(StmtKind::Export(Box::new(inner)), span))
    }

    /// `a`, `a.b.c` or `a::b`.
    fn dotted_name(&mut self) -> ParseResult<String> {
        let mut name = self.expect_identifier()?;
        while self.match_token(&TokenKind::Dot) || self.match_token(&TokenKind::DoubleColon) {
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }
        Ok(name)
    }
}

/// Methods get `self` implicitly; an explicit leading `self`/`this` is dropped.
fn strip_self_param(mut method: FunctionDecl) -> FunctionDecl {
    if method
        .params
        .first()
        .is_some_and(|p| p.name == "self" || p.name == "this")
    {
        method.params.remove(0);
    }
    method
}
