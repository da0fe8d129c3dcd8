use std::{iter::Peekable, num::ParseIntError};

use crate::token::{Span, Token, TokenKind, KEYWORDS};

pub const SUGGESTED_TOKENS_CAPACITY: usize = 8_192;

/// Lexes the provided string, producing the tokens into the provided buffer.
pub fn lex(src: &str, tokens: &mut Vec<Token>) {
    Lexer::new(src, tokens).lex();
}

/// A convenience function that allocates a new buffer per lexed input and
/// returns it.
pub fn lex_in_new(src: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(SUGGESTED_TOKENS_CAPACITY);
    lex(src, &mut tokens);
    tokens
}

/// The Mica lexer
struct Lexer<'src, 'tok> {
    src: &'src str,
    iter: Peekable<std::str::Chars<'src>>,
    cursor: usize,
    current_lo: usize,
    tokens: &'tok mut Vec<Token>,
}

impl Lexer<'_, '_> {
    /// Scans the source string until the input is exhausted.
    ///
    /// Tokens are written into the provided tokens buffer.
    fn lex(mut self) {
        assert_eq!(self.tokens.len(), 0, "must pass clean tokens buffer");
        loop {
            let next = self.scan_token_kind();
            let is_eof = matches!(next, TokenKind::Eof);
            self.produce(next);
            if is_eof {
                break;
            }
        }
    }

    /// Tries to scan the current character.
    fn scan_token_kind(&mut self) -> TokenKind {
        use TokenKind::*;
        match self.mark_advance() {
            '\0' => Eof,
            '+' => Plus,
            '-' => Minus,
            '*' => Star,
            '/' => match self.peek() {
                '/' => self.inline_comment(),
                '*' => self.block_comment(),
                _ => Slash,
            },
            ':' => match self.peek() {
                '=' => self.advance_with(Assign),
                _ => Colon,
            },
            ',' => Comma,
            '.' => Dot,
            '(' => LParen,
            ')' => RParen,
            c if c.is_ascii_alphabetic() || c == '_' => self.identifier_or_keyword(),
            c if c.is_ascii_digit() => self.number(),
            c if c.is_ascii_whitespace() => self.whitespace(),
            _ => TokenKind::ErrorUnexpectedChar,
        }
    }

    fn identifier_or_keyword(&mut self) -> TokenKind {
        let valid_identifier_suffix = |c: char| c.is_ascii_alphanumeric() || c == '_';

        while valid_identifier_suffix(self.peek()) {
            self.advance();
        }
        match KEYWORDS.get(self.substr()).copied() {
            Some(keyword) => keyword,
            None => TokenKind::Identifier,
        }
    }

    fn number(&mut self) -> TokenKind {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        TokenKind::Number
    }

    fn whitespace(&mut self) -> TokenKind {
        while self.peek().is_ascii_whitespace() {
            self.advance();
        }
        TokenKind::Whitespace
    }

    fn inline_comment(&mut self) -> TokenKind {
        assert_eq!(self.advance(), '/');
        while !matches!(self.peek(), '\n' | '\0') {
            self.advance();
        }
        TokenKind::InlineComment
    }

    fn block_comment(&mut self) -> TokenKind {
        assert_eq!(self.advance(), '*');
        loop {
            match self.advance() {
                '*' => (), // start closing comment
                '\0' => return TokenKind::ErrorUnclosedComment,
                _ => continue, // keep scanning comment...
            }
            match self.advance() {
                '/' => break, // finished closing comment
                '\0' => return TokenKind::ErrorUnclosedComment,
                _ => continue, // couldn't close it, keep scanning...
            }
        }
        TokenKind::BlockComment
    }
}

impl Lexer<'_, '_> {
    /// Constructs a new lexer with the default state.
    fn new<'src, 'tok>(src: &'src str, tokens: &'tok mut Vec<Token>) -> Lexer<'src, 'tok> {
        Lexer {
            src,
            iter: src.chars().peekable(),
            cursor: 0,
            current_lo: 0,
            tokens,
        }
    }

    /// Starts a new token "mark" and advances the iterator.
    fn mark_advance(&mut self) -> char {
        self.current_lo = self.cursor;
        self.advance()
    }

    /// Returns the next character and advances the iterator.
    fn advance(&mut self) -> char {
        self.iter
            .next()
            .inspect(|c| self.cursor += c.len_utf8())
            .unwrap_or('\0')
    }

    /// Advances and returns the provided value.
    fn advance_with<T>(&mut self, value: T) -> T {
        self.advance();
        value
    }

    /// Returns the next character without advancing the iterator.
    fn peek(&mut self) -> char {
        self.iter.peek().copied().unwrap_or('\0')
    }

    /// Returns the current span.
    fn span(&self) -> Span {
        Span::new_of_bounds(self.current_lo..self.cursor)
    }

    /// Returns the substring of the current marked bounds.
    fn substr(&self) -> &str {
        self.span().substr(self.src)
    }

    /// Produces a token using the marked bounds.
    fn produce(&mut self, kind: TokenKind) {
        self.tokens.push(Token::new(kind, self.span()));
    }
}

pub mod extract {
    use super::*;

    pub fn int(token: Token, src: &str) -> Result<u64, ParseIntError> {
        debug_assert_eq!(token.kind, TokenKind::Number);
        token.span().substr(src).parse()
    }

    pub fn ident<'src>(token: Token, src: &'src str) -> &'src str {
        debug_assert_eq!(token.kind, TokenKind::Identifier);
        token.span().substr(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tests_with_span() {
        use TokenKind::*;
        let cases = cases!(match .. {
            "+-*/" => [
                (Plus, 0..1),
                (Minus, 1..2),
                (Star, 2..3),
                (Slash, 3..4),
                (Eof, 4..4),
            ],
            "class end do var new" => [
                (Class, 0..5),
                (Whitespace, 5..6),
                (End, 6..9),
                (Whitespace, 9..10),
                (Do, 10..12),
                (Whitespace, 12..13),
                (Var, 13..16),
                (Whitespace, 16..17),
                (New, 17..20),
                (Eof, 20..20),
            ],
            "Class/CLASS/classes" => [
                (Identifier, 0..5),
                (Slash, 5..6),
                (Identifier, 6..11),
                (Slash, 11..12),
                (Identifier, 12..19),
                (Eof, 19..19),
            ],
            "x:=1" => [
                (Identifier, 0..1),
                (Assign, 1..3),
                (Number, 3..4),
                (Eof, 4..4),
            ],
            "p : Point , q . norm ( )" => [
                (Identifier, 0..1),
                (Whitespace, 1..2),
                (Colon, 2..3),
                (Whitespace, 3..4),
                (Identifier, 4..9),
                (Whitespace, 9..10),
                (Comma, 10..11),
                (Whitespace, 11..12),
                (Identifier, 12..13),
                (Whitespace, 13..14),
                (Dot, 14..15),
                (Whitespace, 15..16),
                (Identifier, 16..20),
                (Whitespace, 20..21),
                (LParen, 21..22),
                (Whitespace, 22..23),
                (RParen, 23..24),
                (Eof, 24..24),
            ],
            "1/11/111/01/123456789" => [
                (Number, 0..1),
                (Slash, 1..2),
                (Number, 2..4),
                (Slash, 4..5),
                (Number, 5..8),
                (Slash, 8..9),
                (Number, 9..11),
                (Slash, 11..12),
                (Number, 12..21),
                (Eof, 21..21),
            ],
            "a // line comment\nb" => [
                (Identifier, 0..1),
                (Whitespace, 1..2),
                (InlineComment, 2..17),
                (Whitespace, 17..18),
                (Identifier, 18..19),
                (Eof, 19..19),
            ],
            "1 /* block * comment */ 2 /**/ 3" => [
                (Number, 0..1),
                (Whitespace, 1..2),
                (BlockComment, 2..23),
                (Whitespace, 23..24),
                (Number, 24..25),
                (Whitespace, 25..26),
                (BlockComment, 26..30),
                (Whitespace, 30..31),
                (Number, 31..32),
                (Eof, 32..32),
            ],
            "// comment without line break" => [(InlineComment, 0..29), (Eof, 29..29),],
            "/* unclosed" => [
                //
                (ErrorUnclosedComment, 0..11),
                (Eof, 11..11),
            ],
            "a ? b" => [
                (Identifier, 0..1),
                (Whitespace, 1..2),
                (ErrorUnexpectedChar, 2..3),
                (Whitespace, 3..4),
                (Identifier, 4..5),
                (Eof, 5..5),
            ],
        });

        for (input, tokens) in cases {
            let lexed = lex_in_new(input);
            assert_eq!(lexed, tokens.as_slice());
        }
    }

    macro_rules! cases {
        (match .. {
            $($str:expr => [$(($kind:expr, $range:expr)),* $(,)?]),* $(,)?
        }) => {{
            &[$((
                $str,
                vec![
                    $(Token::new($kind, Span::new_of_bounds($range.start..$range.end))),*
                ],
            )),*]
        }};
    }
    use cases;
}
