//! Source text to token stream.
//!
//! The language has three context-sensitive corners the lexer resolves on its
//! own so the parser can stay context-free:
//! - `'` is a transpose after a value and a quote elsewhere;
//! - inside `[...]` and `{...}` whitespace and newlines separate elements and
//!   rows (`[1 -2]` has two elements, `[1 - 2]` has one);
//! - a statement of the form `word arg ...` is command syntax.
//!
//! `%` starts a line comment, `%{ ... %}` on their own lines bracket a block
//! comment, and `...` continues a statement on the next line.

use crate::error::{InterpError, InterpResult};
use crate::token::{Token, TokenKind};

pub fn tokenize(source: &str) -> InterpResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    /// Open brackets: `(`, `[` or `{`.
    brackets: Vec<char>,
    tokens: Vec<Token>,
    statement_start: bool,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            brackets: Vec::new(),
            tokens: Vec::new(),
            statement_start: true,
        }
    }

    fn run(mut self) -> InterpResult<Vec<Token>> {
        loop {
            let spaced = self.skip_blanks();
            let Some(c) = self.peek() else {
                self.push(TokenKind::Eof);
                break;
            };

            if spaced && self.in_matrix() && self.prev_ends_value() && self.starts_element() {
                self.push(TokenKind::Comma);
            }

            match c {
                '%' => {
                    self.skip_comment();
                    continue;
                }
                '\r' => {
                    self.pos += 1;
                    continue;
                }
                '\n' => {
                    self.pos += 1;
                    self.newline_token();
                    self.line += 1;
                    continue;
                }
                _ => {}
            }

            if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
            {
                self.number()?;
            } else if c.is_alphabetic() {
                self.word();
            } else if c == '\'' {
                if self.prev_ends_value() && !(spaced && self.in_matrix()) {
                    self.pos += 1;
                    self.push(TokenKind::Transpose);
                } else {
                    self.string('\'')?;
                }
            } else if c == '"' {
                self.string('"')?;
            } else {
                self.operator(c)?;
            }
        }
        if let Some(open) = self.brackets.last() {
            return Err(InterpError::syntax(
                format!("Unbalanced '{open}': missing closing bracket."),
                self.line,
            ));
        }
        Ok(self.tokens)
    }

    // ── Character helpers ─────────────────────────────────────

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind) {
        self.statement_start = matches!(
            kind,
            TokenKind::Newline | TokenKind::Else
        ) || (self.brackets.is_empty()
            && matches!(kind, TokenKind::Semicolon | TokenKind::Comma));
        self.tokens.push(Token::new(kind, self.line));
    }

    fn prev_ends_value(&self) -> bool {
        self.tokens.last().is_some_and(|t| t.kind.ends_value())
    }

    fn in_matrix(&self) -> bool {
        matches!(self.brackets.last(), Some('[') | Some('{'))
    }

    /// Skip spaces, tabs and `...` continuations. Returns whether anything
    /// was skipped.
    fn skip_blanks(&mut self) -> bool {
        let start = self.pos;
        loop {
            match self.peek() {
                Some(' ') | Some('\t') => self.pos += 1,
                Some('.') if self.peek_at(1) == Some('.') && self.peek_at(2) == Some('.') => {
                    while let Some(c) = self.peek() {
                        self.pos += 1;
                        if c == '\n' {
                            self.line += 1;
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
        self.pos > start
    }

    /// Does the text after whitespace begin a new matrix element?
    fn starts_element(&self) -> bool {
        let Some(c) = self.peek() else {
            return false;
        };
        let next = self.peek_at(1);
        match c {
            '+' | '-' => next.is_some_and(|n| !n.is_whitespace() && n != '='),
            '~' | '!' => next != Some('='),
            '.' => next.is_some_and(|n| n.is_ascii_digit()),
            '\'' | '"' | '(' | '[' | '{' | '@' => true,
            c => c.is_alphanumeric(),
        }
    }

    fn newline_token(&mut self) {
        if self.in_matrix() {
            if !matches!(
                self.tokens.last().map(|t| &t.kind),
                Some(TokenKind::Semicolon) | Some(TokenKind::LBracket) | Some(TokenKind::LBrace)
            ) {
                self.push(TokenKind::Semicolon);
            }
        } else if self.brackets.is_empty() {
            self.push(TokenKind::Newline);
        }
    }

    fn skip_comment(&mut self) {
        if self.peek_at(1) == Some('{') && self.rest_of_line_blank(2) && self.line_blank_before()
        {
            self.skip_block_comment();
            return;
        }
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn rest_of_line_blank(&self, offset: usize) -> bool {
        self.chars[self.pos + offset..]
            .iter()
            .take_while(|c| **c != '\n')
            .all(|c| c.is_whitespace())
    }

    fn line_blank_before(&self) -> bool {
        self.chars[..self.pos]
            .iter()
            .rev()
            .take_while(|c| **c != '\n')
            .all(|c| c.is_whitespace())
    }

    fn skip_block_comment(&mut self) {
        let mut depth = 0usize;
        while self.pos < self.chars.len() {
            let line_end = self.chars[self.pos..]
                .iter()
                .position(|c| *c == '\n')
                .map(|p| self.pos + p)
                .unwrap_or(self.chars.len());
            let text: String = self.chars[self.pos..line_end].iter().collect();
            match text.trim() {
                "%{" => depth += 1,
                "%}" => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.pos = line_end;
            if depth == 0 {
                return;
            }
            if self.pos < self.chars.len() {
                self.pos += 1;
                self.line += 1;
            }
        }
    }

    // ── Scanners ──────────────────────────────────────────────

    fn number(&mut self) -> InterpResult<()> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.')
            && !matches!(self.peek_at(1), Some('*' | '/' | '\\' | '^' | '\''))
        {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += digit_at;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let value: f64 = text
            .parse()
            .map_err(|_| InterpError::syntax(format!("Invalid number '{text}'."), self.line))?;
        let imaginary = matches!(self.peek(), Some('i' | 'j'))
            && !self
                .peek_at(1)
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if imaginary {
            self.pos += 1;
            self.push(TokenKind::Imaginary(value));
        } else {
            self.push(TokenKind::Number(value));
        }
        Ok(())
    }

    fn word(&mut self) {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        if let Some(kind) = TokenKind::keyword(&word) {
            self.push(kind);
            return;
        }
        if self.statement_start && self.brackets.is_empty() && self.command_follows() {
            let args = self.command_args();
            self.push(TokenKind::Command { name: word, args });
            return;
        }
        self.push(TokenKind::Ident(word));
    }

    /// `word` at statement start, then blanks, then a bare word, with no `=`
    /// or `(` before the end of the statement.
    fn command_follows(&self) -> bool {
        let mut i = self.pos;
        let mut blanks = 0;
        while matches!(self.chars.get(i), Some(' ') | Some('\t')) {
            i += 1;
            blanks += 1;
        }
        if blanks == 0 {
            return false;
        }
        let Some(first) = self.chars.get(i) else {
            return false;
        };
        if !(first.is_alphanumeric() || *first == '-') {
            return false;
        }
        let mut j = i;
        while let Some(c) = self.chars.get(j) {
            match c {
                '\n' | ';' | ',' | '%' => break,
                '=' | '(' => return false,
                _ => j += 1,
            }
        }
        // `a b` where `b` starts an operator-free word but the word is
        // followed by an operator is still an expression.
        let rest: String = self.chars[i..j].iter().collect();
        !rest
            .split_whitespace()
            .any(|w| w.chars().any(|c| "+*/^<>&|~'".contains(c)))
    }

    fn command_args(&mut self) -> Vec<String> {
        let mut args = Vec::new();
        let mut current = String::new();
        while let Some(c) = self.peek() {
            match c {
                '\n' | ';' | ',' | '%' => break,
                ' ' | '\t' => {
                    if !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                    }
                }
                '\'' => {
                    self.pos += 1;
                    while let Some(q) = self.peek() {
                        if q == '\n' {
                            break;
                        }
                        self.pos += 1;
                        if q == '\'' {
                            if self.peek() == Some('\'') {
                                self.pos += 1;
                                current.push('\'');
                                continue;
                            }
                            break;
                        }
                        current.push(q);
                    }
                    continue;
                }
                c => current.push(c),
            }
            self.pos += 1;
        }
        if !current.is_empty() {
            args.push(current);
        }
        args
    }

    fn string(&mut self, quote: char) -> InterpResult<()> {
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(InterpError::syntax(
                        "Character vector is not terminated properly.",
                        self.line,
                    ));
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    if self.peek() == Some(quote) {
                        self.pos += 1;
                        text.push(quote);
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    self.pos += 1;
                    text.push(c);
                }
            }
        }
        self.push(TokenKind::Str(text));
        Ok(())
    }

    fn operator(&mut self, c: char) -> InterpResult<()> {
        let next = self.peek_at(1);
        let (kind, width) = match (c, next) {
            ('.', Some('*')) => (TokenKind::DotStar, 2),
            ('.', Some('/')) => (TokenKind::DotSlash, 2),
            ('.', Some('\\')) => (TokenKind::DotBackslash, 2),
            ('.', Some('^')) => (TokenKind::DotCaret, 2),
            ('.', Some('\'')) => (TokenKind::DotTranspose, 2),
            ('=', Some('=')) => (TokenKind::Eq, 2),
            ('~', Some('=')) | ('!', Some('=')) => (TokenKind::Ne, 2),
            ('<', Some('=')) => (TokenKind::Le, 2),
            ('>', Some('=')) => (TokenKind::Ge, 2),
            ('&', Some('&')) => (TokenKind::AndAnd, 2),
            ('|', Some('|')) => (TokenKind::OrOr, 2),
            ('.', _) => (TokenKind::Dot, 1),
            ('=', _) => (TokenKind::Assign, 1),
            ('~', _) | ('!', _) => (TokenKind::Not, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('&', _) => (TokenKind::And, 1),
            ('|', _) => (TokenKind::Or, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('\\', _) => (TokenKind::Backslash, 1),
            ('^', _) => (TokenKind::Caret, 1),
            (':', _) => (TokenKind::Colon, 1),
            (',', _) => (TokenKind::Comma, 1),
            (';', _) => (TokenKind::Semicolon, 1),
            ('@', _) => (TokenKind::At, 1),
            ('(', _) | ('[', _) | ('{', _) => {
                self.brackets.push(c);
                let kind = match c {
                    '(' => TokenKind::LParen,
                    '[' => TokenKind::LBracket,
                    _ => TokenKind::LBrace,
                };
                (kind, 1)
            }
            (')', _) | (']', _) | ('}', _) => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if self.brackets.pop() != Some(open) {
                    return Err(InterpError::syntax(
                        format!("Unbalanced or unexpected '{c}'."),
                        self.line,
                    ));
                }
                if open != '(' {
                    self.trim_trailing_separator();
                }
                let kind = match c {
                    ')' => TokenKind::RParen,
                    ']' => TokenKind::RBracket,
                    _ => TokenKind::RBrace,
                };
                (kind, 1)
            }
            _ => {
                return Err(InterpError::syntax(
                    format!("Invalid character '{c}' in expression."),
                    self.line,
                ));
            }
        };
        self.pos += width;
        self.push(kind);
        Ok(())
    }

    /// Drop a row separator produced by a newline just before `]` or `}`.
    fn trim_trailing_separator(&mut self) {
        if matches!(
            self.tokens.last().map(|t| &t.kind),
            Some(TokenKind::Semicolon)
        ) {
            self.tokens.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn transpose_and_quote() {
        let k = kinds("a' + 'b'");
        assert_eq!(
            k,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Transpose,
                TokenKind::Plus,
                TokenKind::Str("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn whitespace_separates_matrix_elements() {
        let k = kinds("[1 -2]");
        assert_eq!(
            k,
            vec![
                TokenKind::LBracket,
                TokenKind::Number(1.0),
                TokenKind::Comma,
                TokenKind::Minus,
                TokenKind::Number(2.0),
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
        let k = kinds("[1 - 2]");
        assert!(!k.contains(&TokenKind::Comma));
    }

    #[test]
    fn quote_after_space_in_matrix_is_string() {
        let k = kinds("[a 'x']");
        assert!(k.contains(&TokenKind::Str("x".into())));
        assert!(!k.contains(&TokenKind::Transpose));
    }

    #[test]
    fn newlines_in_brackets_are_row_separators() {
        let k = kinds("[1 2\n3 4\n]");
        let semis = k.iter().filter(|t| **t == TokenKind::Semicolon).count();
        assert_eq!(semis, 1);
    }

    #[test]
    fn continuation_joins_lines() {
        let toks = tokenize("x = 1 + ...\n  2").unwrap();
        assert!(!toks.iter().any(|t| t.kind == TokenKind::Newline));
        assert_eq!(toks.last().unwrap().line, 2);
    }

    #[test]
    fn comments_are_skipped() {
        let k = kinds("x = 1 % set x\n%% Section\ny = 2");
        let idents: Vec<_> = k
            .iter()
            .filter(|t| matches!(t, TokenKind::Ident(_)))
            .collect();
        assert_eq!(idents.len(), 2);
    }

    #[test]
    fn block_comment() {
        let k = kinds("%{\nx = 1\n%}\ny = 2");
        assert_eq!(
            k.iter()
                .filter(|t| matches!(t, TokenKind::Ident(_)))
                .count(),
            1
        );
    }

    #[test]
    fn command_syntax() {
        let k = kinds("hold on\nclose all;\nclear x y");
        assert_eq!(
            k[0],
            TokenKind::Command {
                name: "hold".into(),
                args: vec!["on".into()]
            }
        );
        assert!(k.contains(&TokenKind::Command {
            name: "clear".into(),
            args: vec!["x".into(), "y".into()]
        }));
    }

    #[test]
    fn assignment_is_not_command() {
        let k = kinds("x = y");
        assert_eq!(k[0], TokenKind::Ident("x".into()));
        let k = kinds("a + b");
        assert_eq!(k[0], TokenKind::Ident("a".into()));
    }

    #[test]
    fn imaginary_and_exponent() {
        assert_eq!(kinds("2.5e3")[0], TokenKind::Number(2500.0));
        assert_eq!(kinds("3i")[0], TokenKind::Imaginary(3.0));
        assert_eq!(kinds("3.*x")[1], TokenKind::DotStar);
    }

    #[test]
    fn unterminated_string_reports_line() {
        let err = tokenize("x = 1\ny = 'abc").unwrap_err();
        assert_eq!(err.line(), Some(2));
    }
}
