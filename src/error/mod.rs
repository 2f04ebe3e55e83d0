//! Error types for every phase of the pipeline.

use std::fmt;

use crate::span::Span;
use crate::vm::value::Value;
use thiserror::Error;

/// Lexer errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexerError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, Span),

    #[error("Unterminated string at {0}")]
    UnterminatedString(Span),

    #[error("Unterminated block comment at {0}")]
    UnterminatedComment(Span),

    #[error("Invalid escape sequence '\\{0}' at {1}")]
    InvalidEscape(char, Span),

    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),

    #[error("Unindent to column {found} does not match any outer indentation level at {span}")]
    IndentationMismatch { found: usize, span: Span },
}

impl LexerError {
    pub fn unexpected_char(c: char, span: Span) -> Self {
        Self::UnexpectedChar(c, span)
    }

    pub fn unterminated_string(span: Span) -> Self {
        Self::UnterminatedString(span)
    }

    pub fn unterminated_comment(span: Span) -> Self {
        Self::UnterminatedComment(span)
    }

    pub fn invalid_escape(c: char, span: Span) -> Self {
        Self::InvalidEscape(c, span)
    }

    pub fn invalid_number(s: impl Into<String>, span: Span) -> Self {
        Self::InvalidNumber(s.into(), span)
    }

    pub fn indentation_mismatch(found: usize, span: Span) -> Self {
        Self::IndentationMismatch { found, span }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedChar(_, span) => *span,
            Self::UnterminatedString(span) => *span,
            Self::UnterminatedComment(span) => *span,
            Self::InvalidEscape(_, span) => *span,
            Self::InvalidNumber(_, span) => *span,
            Self::IndentationMismatch { span, .. } => *span,
        }
    }
}

/// Parser errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParserError {
    #[error("Unexpected token '{found}', expected {expected} at {span}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Unexpected end of file at {0}")]
    UnexpectedEof(Span),

    #[error("Invalid assignment target at {0}")]
    InvalidAssignmentTarget(Span),

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl ParserError {
    pub fn unexpected_token(
        expected: impl Into<String>,
        found: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::UnexpectedToken {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn unexpected_eof(span: Span) -> Self {
        Self::UnexpectedEof(span)
    }

    pub fn invalid_assignment_target(span: Span) -> Self {
        Self::InvalidAssignmentTarget(span)
    }

    pub fn general(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedToken { span, .. } => *span,
            Self::UnexpectedEof(span) => *span,
            Self::InvalidAssignmentTarget(span) => *span,
            Self::General { span, .. } => *span,
        }
    }
}

/// Every diagnostic collected by one recovering parse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParseErrors(pub Vec<ParserError>);

impl ParseErrors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParserError> {
        self.0.iter()
    }

    /// Position of the first diagnostic.
    pub fn span(&self) -> Span {
        self.0.first().map(ParserError::span).unwrap_or_default()
    }
}

impl fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseErrors {}

/// Bytecode compilation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Cannot instantiate template: {message} at {span}")]
    TemplateInstantiation { message: String, span: Span },

    #[error("Cannot assign to constant '{name}' at {span}")]
    ConstAssignment { name: String, span: Span },

    #[error("'{name}' is already defined at {span}")]
    DuplicateDefinition { name: String, span: Span },

    #[error("'{keyword}' outside of a loop at {span}")]
    OutsideLoop { keyword: String, span: Span },

    #[error("Invalid target for {operation} at {span}")]
    InvalidTarget { operation: String, span: Span },

    #[error("Too many constants in function '{function}' at {span}")]
    TooManyConstants { function: String, span: Span },

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl CompileError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn template(message: impl Into<String>, span: Span) -> Self {
        Self::TemplateInstantiation {
            message: message.into(),
            span,
        }
    }

    pub fn const_assignment(name: impl Into<String>, span: Span) -> Self {
        Self::ConstAssignment {
            name: name.into(),
            span,
        }
    }

    pub fn duplicate(name: impl Into<String>, span: Span) -> Self {
        Self::DuplicateDefinition {
            name: name.into(),
            span,
        }
    }

    pub fn outside_loop(keyword: impl Into<String>, span: Span) -> Self {
        Self::OutsideLoop {
            keyword: keyword.into(),
            span,
        }
    }

    pub fn invalid_target(operation: impl Into<String>, span: Span) -> Self {
        Self::InvalidTarget {
            operation: operation.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::TemplateInstantiation { span, .. } => *span,
            Self::ConstAssignment { span, .. } => *span,
            Self::DuplicateDefinition { span, .. } => *span,
            Self::OutsideLoop { span, .. } => *span,
            Self::InvalidTarget { span, .. } => *span,
            Self::TooManyConstants { span, .. } => *span,
            Self::General { span, .. } => *span,
        }
    }
}

/// What went wrong at runtime, independent of where.
#[derive(Debug, Clone, Error)]
pub enum RuntimeErrorKind {
    #[error("Division by zero")]
    DivisionByZero,

    #[error("Integer overflow in {0}")]
    Overflow(String),

    #[error("Undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("'{target}' has no attribute '{name}'")]
    NoSuchAttribute { target: String, name: String },

    #[error("Index out of bounds: {index} (length {length})")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("'{0}' is not callable")]
    NotCallable(String),

    #[error("'{name}' expects {expected} arguments, got {got}")]
    WrongArity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("Maximum call depth of {0} exceeded")]
    RecursionLimit(usize),

    #[error("Invalid free of address {0:#x}")]
    InvalidFree(usize),

    #[error("Out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    #[error("Use of deleted object of class '{0}'")]
    UseAfterDelete(String),

    #[error("Invalid bytecode: {0}")]
    InvalidBytecode(String),

    #[error("Uncaught exception: {0}")]
    Raised(Value),

    #[error("{0}")]
    General(String),
}

impl RuntimeErrorKind {
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError(message.into())
    }

    pub fn no_such_attribute(target: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NoSuchAttribute {
            target: target.into(),
            name: name.into(),
        }
    }

    /// The exception class name a typed `catch` clause matches against.
    pub fn exception_name(&self) -> &'static str {
        match self {
            Self::DivisionByZero => "ZeroDivisionError",
            Self::Overflow(_) => "OverflowError",
            Self::UndefinedVariable(_) => "NameError",
            Self::NoSuchAttribute { .. } => "AttributeError",
            Self::IndexOutOfBounds { .. } => "IndexError",
            Self::KeyNotFound(_) => "KeyError",
            Self::TypeError(_) | Self::NotCallable(_) | Self::WrongArity { .. } => "TypeError",
            Self::RecursionLimit(_) => "RecursionError",
            Self::InvalidFree(_) | Self::OutOfMemory(_) | Self::UseAfterDelete(_) => {
                "MemoryError"
            }
            Self::InvalidBytecode(_) => "BytecodeError",
            Self::Raised(_) => "Exception",
            Self::General(_) => "RuntimeError",
        }
    }
}

/// A runtime failure with the position it surfaced at.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub span: Span,
    /// Name of the function executing when the error was raised.
    pub function: Option<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, span: Span) -> Self {
        Self {
            kind,
            span,
            function: None,
        }
    }

    pub fn in_function(mut self, name: impl Into<String>) -> Self {
        self.function = Some(name.into());
        self
    }

    pub fn span(&self) -> Span {
        self.span
    }

    /// Short kind name for diagnostics, e.g. `ZeroDivisionError`.
    pub fn kind_name(&self) -> String {
        match &self.kind {
            RuntimeErrorKind::Raised(Value::Exception(exc)) => exc.kind.clone(),
            RuntimeErrorKind::Raised(Value::Object(obj)) => obj.class.name.clone(),
            kind => kind.exception_name().to_string(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}", self.kind, self.span.line)?;
        if let Some(function) = &self.function {
            write!(f, " in '{}'", function)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Errors in the portable binary module format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Not a Kaede module: bad magic bytes")]
    BadMagic,

    #[error("Unsupported module format version {0}")]
    UnsupportedVersion(u16),

    #[error("Module truncated while reading {0}")]
    Truncated(&'static str),

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("Invalid constant tag {0}")]
    InvalidConstantTag(u8),

    #[error("Invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },

    #[error("Too long to encode: {what} ({len})")]
    TooLong { what: &'static str, len: usize },
}

/// A unified error type for all phases, tagged with the source unit it came from.
#[derive(Debug, Error)]
pub enum KaedeError {
    #[error("{unit}: lexer error: {source}")]
    Lexer { unit: String, source: LexerError },

    #[error("{unit}: parse errors:\n{source}")]
    Parser { unit: String, source: ParseErrors },

    #[error("{unit}: compile error: {source}")]
    Compile { unit: String, source: CompileError },

    #[error("{unit}: runtime error: {source}")]
    Runtime { unit: String, source: RuntimeError },

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KaedeError {
    pub fn lexer(unit: impl Into<String>, source: LexerError) -> Self {
        Self::Lexer {
            unit: unit.into(),
            source,
        }
    }

    pub fn parser(unit: impl Into<String>, source: ParseErrors) -> Self {
        Self::Parser {
            unit: unit.into(),
            source,
        }
    }

    pub fn compile(unit: impl Into<String>, source: CompileError) -> Self {
        Self::Compile {
            unit: unit.into(),
            source,
        }
    }

    pub fn runtime(unit: impl Into<String>, source: RuntimeError) -> Self {
        Self::Runtime {
            unit: unit.into(),
            source,
        }
    }

    /// Short category used in CLI diagnostics.
    pub fn kind(&self) -> String {
        match self {
            Self::Lexer { .. } => "lexical".to_string(),
            Self::Parser { .. } => "syntax".to_string(),
            Self::Compile { .. } => "compile".to_string(),
            Self::Runtime { source, .. } => source.kind_name(),
            Self::Format(_) => "format".to_string(),
            Self::Io(_) => "io".to_string(),
        }
    }

    /// Source unit name, when the error came from compiling or running one.
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Lexer { unit, .. }
            | Self::Parser { unit, .. }
            | Self::Compile { unit, .. }
            | Self::Runtime { unit, .. } => Some(unit),
            Self::Format(_) | Self::Io(_) => None,
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Lexer { source, .. } => Some(source.span()),
            Self::Parser { source, .. } => Some(source.span()),
            Self::Compile { source, .. } => Some(source.span()),
            Self::Runtime { source, .. } => Some(source.span()),
            Self::Format(_) | Self::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_display_includes_line_and_function() {
        let err = RuntimeError::new(RuntimeErrorKind::DivisionByZero, Span::at_line(3))
            .in_function("main");
        assert_eq!(err.to_string(), "Division by zero at line 3 in 'main'");
        assert_eq!(err.kind_name(), "ZeroDivisionError");
    }

    #[test]
    fn parse_errors_join_every_diagnostic() {
        let errors = ParseErrors(vec![
            ParserError::general("first", Span::new(0, 1, 1, 1)),
            ParserError::general("second", Span::new(5, 6, 2, 1)),
        ]);
        assert_eq!(errors.to_string(), "first at 1:1\nsecond at 2:1");
        assert_eq!(errors.span().line, 1);
    }

    #[test]
    fn kaede_error_carries_unit() {
        let err = KaedeError::lexer(
            "demo.kd",
            LexerError::unterminated_string(Span::new(0, 3, 1, 1)),
        );
        assert_eq!(err.unit(), Some("demo.kd"));
        assert_eq!(err.kind(), "lexical");
        assert_eq!(err.span().map(|s| s.line), Some(1));
    }
}
