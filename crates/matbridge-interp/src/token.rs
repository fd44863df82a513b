//! Token types produced by the lexer.

use std::fmt;

/// Reserved words. These are never treated as identifiers or commands.
pub const KEYWORDS: &[&str] = &[
    "if", "elseif", "else", "end", "for", "while", "break", "continue", "return", "function",
    "switch", "case", "otherwise", "try", "catch",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based source line.
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize) -> Self {
        Self { kind, line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // ── Literals ──────────────────────────────────────────────
    Number(f64),
    /// Imaginary literal such as `2i`.
    Imaginary(f64),
    /// Character vector, quotes removed and doubled quotes collapsed.
    Str(String),
    Ident(String),
    /// Command syntax: `hold on`, `clear x y`.
    Command {
        name: String,
        args: Vec<String>,
    },

    // ── Keywords ──────────────────────────────────────────────
    If,
    Elseif,
    Else,
    End,
    For,
    While,
    Break,
    Continue,
    Return,
    /// Recognised only to reject it with a clear message.
    Unsupported(String),

    // ── Arithmetic ────────────────────────────────────────────
    Plus,
    Minus,
    Star,
    Slash,
    Backslash,
    Caret,
    DotStar,
    DotSlash,
    DotBackslash,
    DotCaret,
    Transpose,
    DotTranspose,

    // ── Relational / logical ──────────────────────────────────
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    AndAnd,
    OrOr,
    Not,

    // ── Punctuation ───────────────────────────────────────────
    Assign,
    Colon,
    Comma,
    Semicolon,
    Newline,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    At,
    Dot,

    Eof,
}

impl TokenKind {
    pub fn keyword(word: &str) -> Option<TokenKind> {
        Some(match word {
            "if" => TokenKind::If,
            "elseif" => TokenKind::Elseif,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "for" => TokenKind::For,
            "while" => TokenKind::While,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "return" => TokenKind::Return,
            "function" | "switch" | "case" | "otherwise" | "try" | "catch" => {
                TokenKind::Unsupported(word.to_string())
            }
            _ => return None,
        })
    }

    /// True for tokens after which a `'` means transpose.
    pub fn ends_value(&self) -> bool {
        matches!(
            self,
            TokenKind::Number(_)
                | TokenKind::Imaginary(_)
                | TokenKind::Str(_)
                | TokenKind::Ident(_)
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Transpose
                | TokenKind::DotTranspose
                | TokenKind::End
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Number(n) => return write!(f, "{n}"),
            TokenKind::Imaginary(n) => return write!(f, "{n}i"),
            TokenKind::Str(s) => return write!(f, "'{s}'"),
            TokenKind::Ident(name) => return f.write_str(name),
            TokenKind::Command { name, .. } => return f.write_str(name),
            TokenKind::Unsupported(word) => return f.write_str(word),
            TokenKind::If => "if",
            TokenKind::Elseif => "elseif",
            TokenKind::Else => "else",
            TokenKind::End => "end",
            TokenKind::For => "for",
            TokenKind::While => "while",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Return => "return",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Backslash => "\\",
            TokenKind::Caret => "^",
            TokenKind::DotStar => ".*",
            TokenKind::DotSlash => "./",
            TokenKind::DotBackslash => ".\\",
            TokenKind::DotCaret => ".^",
            TokenKind::Transpose => "'",
            TokenKind::DotTranspose => ".'",
            TokenKind::Eq => "==",
            TokenKind::Ne => "~=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::And => "&",
            TokenKind::Or => "|",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Not => "~",
            TokenKind::Assign => "=",
            TokenKind::Colon => ":",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Newline => "newline",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::At => "@",
            TokenKind::Dot => ".",
            TokenKind::Eof => "end of input",
        };
        f.write_str(text)
    }
}
