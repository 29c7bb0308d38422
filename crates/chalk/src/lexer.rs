//! Tokenizer for Chalk source text.
//!
//! The token patterns are matched longest-first by `logos`; whitespace and
//! comments are skipped. The [`Lexer`] wrapper adds 1-based line tracking and
//! turns exhaustion into a repeating [`TokenKind::Eof`].
//!
//! Tokens never copy source text: downstream code slices the source with
//! [`Token::text`].

use logos::Logos;
use strum::IntoStaticStr;

/// Every terminal symbol of the grammar.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[logos(skip r"([ \t\r\n\x0B\x0C]+|//[^\n]*|/\*([^*]|\*+[^*/])*\*+/)")]
pub enum TokenKind {
    // Reserved words
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("do")]
    Do,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("if")]
    If,
    #[token("return")]
    Return,
    #[token("while")]
    While,
    #[token("function")]
    Function,
    #[token("in")]
    In,
    #[token("null")]
    Null,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("var")]
    Var,
    #[token("class")]
    Class,
    #[token("is")]
    Is,
    #[token("static")]
    Static,
    #[token("super")]
    Super,
    #[token("this")]
    This,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("try")]
    Try,
    #[token("except")]
    Except,
    #[token("as")]
    As,
    #[token("finally")]
    Finally,

    #[regex(r"[A-Za-z_][A-Za-z_0-9]*")]
    Identifier,
    #[regex(r"[0-9]+")]
    Constant,
    #[regex(r"0[xX][0-9a-fA-F]+")]
    HexConstant,
    #[regex(r"0[bB][01]+")]
    BinaryConstant,
    #[regex(r#""([^"\\]|\\.|\\\n)*""#)]
    String,

    // Punctuation and operators
    #[token("{")]
    OpenBrace,
    #[token("}")]
    CloseBrace,
    #[token("(")]
    OpenParentheses,
    #[token(")")]
    CloseParentheses,
    #[token("[")]
    OpenBracket,
    #[token("]")]
    CloseBracket,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("..")]
    DotDot,
    #[token("...")]
    DotDotDot,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,
    #[token("=")]
    Assign,
    #[token("+=")]
    AddAssign,
    #[token("-=")]
    SubtractAssign,
    #[token("*=")]
    MultiplyAssign,
    #[token("/=")]
    DivideAssign,
    #[token("%=")]
    ModuloAssign,
    #[token("<<=")]
    LeftAssign,
    #[token(">>=")]
    RightAssign,
    #[token("&=")]
    AndAssign,
    #[token("^=")]
    XorAssign,
    #[token("|=")]
    OrAssign,
    #[token("?=")]
    NullAssign,
    #[token("==")]
    IsEqual,
    #[token("!=")]
    IsNotEqual,
    #[token("<")]
    LessThan,
    #[token("<=")]
    LessOrEqual,
    #[token(">")]
    GreaterThan,
    #[token(">=")]
    GreaterOrEqual,
    #[token("<<")]
    LeftShift,
    #[token(">>")]
    RightShift,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Asterisk,
    #[token("/")]
    Divide,
    #[token("%")]
    Modulo,
    #[token("&")]
    BitAnd,
    #[token("|")]
    BitOr,
    #[token("^")]
    Xor,
    #[token("~")]
    BitNot,
    #[token("!")]
    LogicalNot,
    #[token("&&")]
    LogicalAnd,
    #[token("||")]
    LogicalOr,
    #[token("++")]
    Increment,
    #[token("--")]
    Decrement,

    /// End of input. Produced repeatedly once the source is exhausted.
    Eof,
}

impl TokenKind {
    /// Returns true for the operators that may follow an assignable expression.
    #[must_use]
    pub fn is_assignment_operator(self) -> bool {
        matches!(
            self,
            Self::Assign
                | Self::AddAssign
                | Self::SubtractAssign
                | Self::MultiplyAssign
                | Self::DivideAssign
                | Self::ModuloAssign
                | Self::LeftAssign
                | Self::RightAssign
                | Self::AndAssign
                | Self::XorAssign
                | Self::OrAssign
                | Self::NullAssign
        )
    }
}

/// A lexed token: kind plus its location in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first byte of the token.
    pub position: u32,
    /// Length of the token in bytes.
    pub size: u32,
    /// 1-based source line the token starts on.
    pub line: u32,
}

impl Token {
    /// Returns the source text this token covers.
    #[must_use]
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        let start = self.position as usize;
        source.get(start..start + self.size as usize).unwrap_or("")
    }
}

/// A byte sequence that matches no token pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexError {
    pub position: u32,
    pub line: u32,
}

/// Streaming tokenizer over one source buffer.
pub struct Lexer<'src> {
    inner: logos::Lexer<'src, TokenKind>,
    source: &'src str,
    line: u32,
    /// Offset up to which newlines have been counted into `line`.
    scanned: usize,
}

impl<'src> Lexer<'src> {
    /// Creates a lexer that numbers the first source line `line`.
    #[must_use]
    pub fn new(source: &'src str, line: u32) -> Self {
        Self {
            inner: TokenKind::lexer(source),
            source,
            line: line.max(1),
            scanned: 0,
        }
    }

    /// Returns the next token, or `Eof` once the input is exhausted.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        match self.inner.next() {
            Some(result) => {
                let span = self.inner.span();
                self.advance_to(span.start);
                let position = offset_u32(span.start);
                match result {
                    Ok(kind) => Ok(Token {
                        kind,
                        position,
                        size: offset_u32(span.end - span.start),
                        line: self.line,
                    }),
                    Err(()) => Err(LexError {
                        position,
                        line: self.line,
                    }),
                }
            }
            None => {
                self.advance_to(self.source.len());
                Ok(Token {
                    kind: TokenKind::Eof,
                    position: offset_u32(self.source.len()),
                    size: 0,
                    line: self.line,
                })
            }
        }
    }

    /// Counts newlines between the last scanned offset and `offset`.
    fn advance_to(&mut self, offset: usize) {
        if offset <= self.scanned {
            return;
        }
        let skipped = &self.source.as_bytes()[self.scanned..offset];
        let newlines = skipped.iter().filter(|&&b| b == b'\n').count();
        self.line = self.line.saturating_add(u32::try_from(newlines).unwrap_or(u32::MAX));
        self.scanned = offset;
    }
}

fn offset_u32(offset: usize) -> u32 {
    u32::try_from(offset).unwrap_or(u32::MAX)
}
