//! Token definitions for the Kaede lexer.

use std::fmt;

use crate::span::Span;

/// All token types in Kaede.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    IntLiteral(i64),
    /// `9223372036854775808`: only valid as the operand of a unary minus.
    MinIntMagnitude,
    FloatLiteral(f64),
    StringLiteral(String),
    Identifier(String),

    // Declaration keywords
    Let,
    Var,
    Const,
    Static,
    Fn,
    Class,
    Struct,
    Enum,
    Namespace,
    Template,
    Extends,
    Import,
    From,
    As,
    Using,
    Export,

    // Statement keywords
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Pass,
    Try,
    Catch,
    Finally,
    Throw,
    Match,
    Case,
    Default,

    // Expression keywords
    New,
    Delete,
    Move,
    Lambda,
    True,
    False,
    Null,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    Equal,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Spaceship,
    Bang,
    AndAnd,
    OrOr,
    Amp,
    Pipe,
    Caret,
    Tilde,
    ShiftLeft,
    ShiftRight,
    PlusPlus,
    MinusMinus,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PercentEqual,
    StarStarEqual,
    AmpEqual,
    PipeEqual,
    CaretEqual,
    ShiftLeftEqual,
    ShiftRightEqual,
    Arrow,    // ->
    FatArrow, // =>
    Question,
    Colon,
    DoubleColon,
    Dot,
    Comma,
    Semicolon,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,

    // Layout
    Newline,
    Indent,
    Dedent,
    Comment(String),

    Eof,
}

impl TokenKind {
    /// Look up a keyword. Several spellings map onto one kind.
    pub fn keyword(s: &str) -> Option<TokenKind> {
        let kind = match s {
            "let" => TokenKind::Let,
            "var" => TokenKind::Var,
            "const" => TokenKind::Const,
            "static" => TokenKind::Static,
            "fn" | "def" | "func" | "function" => TokenKind::Fn,
            "class" => TokenKind::Class,
            "struct" => TokenKind::Struct,
            "enum" => TokenKind::Enum,
            "namespace" => TokenKind::Namespace,
            "template" => TokenKind::Template,
            "extends" => TokenKind::Extends,
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "as" => TokenKind::As,
            "using" => TokenKind::Using,
            "export" => TokenKind::Export,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "pass" => TokenKind::Pass,
            "try" => TokenKind::Try,
            "catch" | "except" => TokenKind::Catch,
            "finally" => TokenKind::Finally,
            "throw" | "raise" => TokenKind::Throw,
            "match" => TokenKind::Match,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "new" => TokenKind::New,
            "delete" => TokenKind::Delete,
            "move" => TokenKind::Move,
            "lambda" => TokenKind::Lambda,
            "true" | "True" => TokenKind::True,
            "false" | "False" => TokenKind::False,
            "null" | "None" | "nil" => TokenKind::Null,
            "and" => TokenKind::AndAnd,
            "or" => TokenKind::OrOr,
            "not" => TokenKind::Bang,
            _ => return None,
        };
        Some(kind)
    }

    /// Operator lookup by exact spelling.
    pub fn operator(s: &str) -> Option<TokenKind> {
        let kind = match s {
            "<<=" => TokenKind::ShiftLeftEqual,
            ">>=" => TokenKind::ShiftRightEqual,
            "**=" => TokenKind::StarStarEqual,
            "<=>" => TokenKind::Spaceship,
            "==" => TokenKind::EqualEqual,
            "!=" => TokenKind::BangEqual,
            "<=" => TokenKind::LessEqual,
            ">=" => TokenKind::GreaterEqual,
            "&&" => TokenKind::AndAnd,
            "||" => TokenKind::OrOr,
            "<<" => TokenKind::ShiftLeft,
            ">>" => TokenKind::ShiftRight,
            "**" => TokenKind::StarStar,
            "++" => TokenKind::PlusPlus,
            "--" => TokenKind::MinusMinus,
            "+=" => TokenKind::PlusEqual,
            "-=" => TokenKind::MinusEqual,
            "*=" => TokenKind::StarEqual,
            "/=" => TokenKind::SlashEqual,
            "%=" => TokenKind::PercentEqual,
            "&=" => TokenKind::AmpEqual,
            "|=" => TokenKind::PipeEqual,
            "^=" => TokenKind::CaretEqual,
            "->" => TokenKind::Arrow,
            "=>" => TokenKind::FatArrow,
            "::" => TokenKind::DoubleColon,
            "+" => TokenKind::Plus,
            "-" => TokenKind::Minus,
            "*" => TokenKind::Star,
            "/" => TokenKind::Slash,
            "%" => TokenKind::Percent,
            "=" => TokenKind::Equal,
            "<" => TokenKind::Less,
            ">" => TokenKind::Greater,
            "!" => TokenKind::Bang,
            "&" => TokenKind::Amp,
            "|" => TokenKind::Pipe,
            "^" => TokenKind::Caret,
            "~" => TokenKind::Tilde,
            "?" => TokenKind::Question,
            ":" => TokenKind::Colon,
            "." => TokenKind::Dot,
            "," => TokenKind::Comma,
            ";" => TokenKind::Semicolon,
            "(" => TokenKind::LeftParen,
            ")" => TokenKind::RightParen,
            "{" => TokenKind::LeftBrace,
            "}" => TokenKind::RightBrace,
            "[" => TokenKind::LeftBracket,
            "]" => TokenKind::RightBracket,
            _ => return None,
        };
        Some(kind)
    }

    /// Layout and comment tokens carry no syntax of their own inside brace blocks.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Comment(_)
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::IntLiteral(n) => write!(f, "{}", n),
            TokenKind::MinIntMagnitude => write!(f, "{}", i64::MIN.unsigned_abs()),
            TokenKind::FloatLiteral(n) => write!(f, "{}", n),
            TokenKind::StringLiteral(s) => write!(f, "\"{}\"", s),
            TokenKind::Identifier(name) => write!(f, "{}", name),
            TokenKind::Comment(_) => write!(f, "comment"),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Indent => write!(f, "indent"),
            TokenKind::Dedent => write!(f, "dedent"),
            TokenKind::Eof => write!(f, "end of file"),
            other => write!(f, "{}", other.spelling()),
        }
    }
}

impl TokenKind {
    fn spelling(&self) -> &'static str {
        match self {
            TokenKind::Let => "let",
            TokenKind::Var => "var",
            TokenKind::Const => "const",
            TokenKind::Static => "static",
            TokenKind::Fn => "fn",
            TokenKind::Class => "class",
            TokenKind::Struct => "struct",
            TokenKind::Enum => "enum",
            TokenKind::Namespace => "namespace",
            TokenKind::Template => "template",
            TokenKind::Extends => "extends",
            TokenKind::Import => "import",
            TokenKind::From => "from",
            TokenKind::As => "as",
            TokenKind::Using => "using",
            TokenKind::Export => "export",
            TokenKind::Return => "return",
            TokenKind::If => "if",
            TokenKind::Elif => "elif",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::In => "in",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Pass => "pass",
            TokenKind::Try => "try",
            TokenKind::Catch => "catch",
            TokenKind::Finally => "finally",
            TokenKind::Throw => "throw",
            TokenKind::Match => "match",
            TokenKind::Case => "case",
            TokenKind::Default => "default",
            TokenKind::New => "new",
            TokenKind::Delete => "delete",
            TokenKind::Move => "move",
            TokenKind::Lambda => "lambda",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::StarStar => "**",
            TokenKind::Equal => "=",
            TokenKind::EqualEqual => "==",
            TokenKind::BangEqual => "!=",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Spaceship => "<=>",
            TokenKind::Bang => "!",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::ShiftLeft => "<<",
            TokenKind::ShiftRight => ">>",
            TokenKind::PlusPlus => "++",
            TokenKind::MinusMinus => "--",
            TokenKind::PlusEqual => "+=",
            TokenKind::MinusEqual => "-=",
            TokenKind::StarEqual => "*=",
            TokenKind::SlashEqual => "/=",
            TokenKind::PercentEqual => "%=",
            TokenKind::StarStarEqual => "**=",
            TokenKind::AmpEqual => "&=",
            TokenKind::PipeEqual => "|=",
            TokenKind::CaretEqual => "^=",
            TokenKind::ShiftLeftEqual => "<<=",
            TokenKind::ShiftRightEqual => ">>=",
            TokenKind::Arrow => "->",
            TokenKind::FatArrow => "=>",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::DoubleColon => "::",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftBrace => "{",
            TokenKind::RightBrace => "}",
            TokenKind::LeftBracket => "[",
            TokenKind::RightBracket => "]",
            _ => "?",
        }
    }
}

/// A token with its source text and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The exact source text the token was read from.
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
        }
    }

    pub fn eof(pos: usize, line: usize, column: usize) -> Self {
        Self {
            kind: TokenKind::Eof,
            lexeme: String::new(),
            span: Span::new(pos, pos, line, column),
        }
    }

    pub fn line(&self) -> usize {
        self.span.line
    }

    pub fn column(&self) -> usize {
        self.span.column
    }

    pub fn offset(&self) -> usize {
        self.span.start
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}
