use std::{fmt, ops::Range};

#[derive(Copy, Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct Token {
    pub kind: TokenKind,
    lo: usize,
    len: u32,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Token {
        Token {
            kind,
            lo: span.lo,
            len: span.len,
        }
    }

    pub fn span(&self) -> Span {
        Span {
            lo: self.lo,
            len: self.len,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:?}, {})", self.kind, self.span())
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Span {
    pub lo: usize,
    pub len: u32,
}

impl Span {
    pub fn new_of_bounds(Range { start: lo, end: hi }: Range<usize>) -> Span {
        debug_assert!(hi >= lo);
        Self::new_of_length(lo, u32::try_from(hi - lo).unwrap())
    }

    pub fn new_of_length(lo: usize, len: u32) -> Span {
        Span { lo, len }
    }

    pub fn substr(self, src: &str) -> &str {
        &src[self.lo..self.lo + self.len as usize]
    }

    pub fn wrap<T>(self, item: T) -> Spanned<T> {
        Spanned { span: self, item }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span({self})")
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lo = self.lo;
        let hi = lo + self.len as usize;
        write!(f, "{lo}..{hi}")
    }
}

/// A value paired with the source region it originated from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub item: T,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Class,
    End,
    Do,
    Var,
    New,

    Plus,
    Minus,
    Star,
    Slash,
    /// `:=`
    Assign,
    Colon,
    Comma,
    Dot,
    LParen,
    RParen,

    Identifier,
    Number,

    Whitespace,
    InlineComment,
    BlockComment,
    Eof,

    ErrorUnexpectedChar,
    ErrorUnclosedComment,
}

impl TokenKind {
    /// Tokens the parser skips over without looking at them.
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::InlineComment | TokenKind::BlockComment
        )
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            TokenKind::ErrorUnexpectedChar | TokenKind::ErrorUnclosedComment
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Class => "`class`",
            TokenKind::End => "`end`",
            TokenKind::Do => "`do`",
            TokenKind::Var => "`var`",
            TokenKind::New => "`new`",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Assign => "`:=`",
            TokenKind::Colon => "`:`",
            TokenKind::Comma => "`,`",
            TokenKind::Dot => "`.`",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::Identifier => "identifier",
            TokenKind::Number => "number",
            TokenKind::Whitespace => "whitespace",
            TokenKind::InlineComment | TokenKind::BlockComment => "comment",
            TokenKind::Eof => "end of input",
            TokenKind::ErrorUnexpectedChar => "unexpected character",
            TokenKind::ErrorUnclosedComment => "unclosed comment",
        };
        f.write_str(text)
    }
}

pub static KEYWORDS: phf::Map<&'static str, TokenKind> = phf::phf_map! {
    "class" => TokenKind::Class,
    "end" => TokenKind::End,
    "do" => TokenKind::Do,
    "var" => TokenKind::Var,
    "new" => TokenKind::New,
};
