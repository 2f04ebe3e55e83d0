//! Operator precedence for Pratt parsing.

use crate::lexer::TokenKind;

/// Operator precedence levels (higher = tighter binding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None = 0,
    Assignment = 1,     // = += -= ...
    Ternary = 2,        // ?:
    Or = 3,             // || or
    And = 4,            // && and
    Equality = 5,       // == !=
    Relational = 6,     // < <= > >= <=>
    BitOr = 7,          // |
    BitXor = 8,         // ^
    BitAnd = 9,         // &
    Shift = 10,         // << >>
    Additive = 11,      // + -
    Multiplicative = 12, // * / %
    Unary = 13,         // ! - + ~ ++ --
    Power = 14,         // **
    Postfix = 15,       // () [] . -> ++ -- as
    Primary = 16,
}

impl Precedence {
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Ternary,
            Precedence::Ternary => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Relational,
            Precedence::Relational => Precedence::BitOr,
            Precedence::BitOr => Precedence::BitXor,
            Precedence::BitXor => Precedence::BitAnd,
            Precedence::BitAnd => Precedence::Shift,
            Precedence::Shift => Precedence::Additive,
            Precedence::Additive => Precedence::Multiplicative,
            Precedence::Multiplicative => Precedence::Unary,
            Precedence::Unary => Precedence::Power,
            Precedence::Power => Precedence::Postfix,
            Precedence::Postfix => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

pub fn get_precedence(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::Equal
        | TokenKind::PlusEqual
        | TokenKind::MinusEqual
        | TokenKind::StarEqual
        | TokenKind::SlashEqual
        | TokenKind::PercentEqual
        | TokenKind::StarStarEqual
        | TokenKind::AmpEqual
        | TokenKind::PipeEqual
        | TokenKind::CaretEqual
        | TokenKind::ShiftLeftEqual
        | TokenKind::ShiftRightEqual => Precedence::Assignment,
        TokenKind::Question => Precedence::Ternary,
        TokenKind::OrOr => Precedence::Or,
        TokenKind::AndAnd => Precedence::And,
        TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
        TokenKind::Less
        | TokenKind::LessEqual
        | TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Spaceship => Precedence::Relational,
        TokenKind::Pipe => Precedence::BitOr,
        TokenKind::Caret => Precedence::BitXor,
        TokenKind::Amp => Precedence::BitAnd,
        TokenKind::ShiftLeft | TokenKind::ShiftRight => Precedence::Shift,
        TokenKind::Plus | TokenKind::Minus => Precedence::Additive,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Multiplicative,
        TokenKind::StarStar => Precedence::Power,
        TokenKind::LeftParen
        | TokenKind::LeftBracket
        | TokenKind::Dot
        | TokenKind::Arrow
        | TokenKind::PlusPlus
        | TokenKind::MinusMinus
        | TokenKind::As => Precedence::Postfix,
        _ => Precedence::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered_lowest_to_highest() {
        let mut level = Precedence::Assignment;
        let mut seen = vec![level];
        while level != Precedence::Primary {
            level = level.next();
            seen.push(level);
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert!(get_precedence(&TokenKind::Question) < get_precedence(&TokenKind::OrOr));
        assert!(get_precedence(&TokenKind::Spaceship) < get_precedence(&TokenKind::Pipe));
        assert!(get_precedence(&TokenKind::Star) < get_precedence(&TokenKind::StarStar));
    }
}
