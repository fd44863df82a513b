//! Recursive-descent parser.
//!
//! Precedence (lowest → highest):
//! 1. `||`
//! 2. `&&`
//! 3. `|`
//! 4. `&`
//! 5. `==`, `~=`, `<`, `<=`, `>`, `>=`
//! 6. `:` (range)
//! 7. `+`, `-`
//! 8. `*`, `/`, `\`, `.*`, `./`, `.\`
//! 9. unary `+`, `-`, `~`
//! 10. `^`, `.^` (left-associative; the exponent may carry a unary sign)
//! 11. postfix `'`, `.'`, `()`, `{}`

use crate::ast::{BinOp, Expr, LValue, PostfixOp, Stmt, StmtKind, Subscript, UnaryOp};
use crate::error::{InterpError, InterpResult};
use crate::lexer::tokenize;
use crate::token::{Token, TokenKind};

/// Parse a whole script.
pub fn parse(source: &str) -> InterpResult<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).program()
}

/// Parse a single expression, e.g. for `str2num`.
pub fn parse_expression(source: &str) -> InterpResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expr()?;
    if !parser.at(&TokenKind::Eof) {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Nesting depth of `(...)`/`{...}` subscripts, where `end` is a value.
    index_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            index_depth: 0,
        }
    }

    // ── Token cursor ──────────────────────────────────────────

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> InterpResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(InterpError::syntax(
                format!("Expected '{kind}' but found '{}'.", self.peek()),
                self.line(),
            ))
        }
    }

    fn unexpected(&self) -> InterpError {
        InterpError::syntax(
            format!("Parse error at '{}': usage might be invalid syntax.", self.peek()),
            self.line(),
        )
    }

    // ── Statements ────────────────────────────────────────────

    fn program(&mut self) -> InterpResult<Vec<Stmt>> {
        let body = self.block(&[])?;
        if !self.at(&TokenKind::Eof) {
            return Err(self.unexpected());
        }
        Ok(body)
    }

    /// Statements up to (not including) one of `stops` or end of input.
    fn block(&mut self, stops: &[TokenKind]) -> InterpResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            while matches!(
                self.peek(),
                TokenKind::Newline | TokenKind::Semicolon | TokenKind::Comma
            ) {
                self.advance();
            }
            if self.at(&TokenKind::Eof) || stops.contains(self.peek()) {
                return Ok(stmts);
            }
            stmts.push(self.statement()?);
        }
    }

    fn statement(&mut self) -> InterpResult<Stmt> {
        let line = self.line();
        let kind = match self.peek().clone() {
            TokenKind::If => self.if_statement()?,
            TokenKind::For => self.for_statement()?,
            TokenKind::While => self.while_statement()?,
            TokenKind::Break => {
                self.advance();
                self.end_statement()?;
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                self.end_statement()?;
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                self.end_statement()?;
                StmtKind::Return
            }
            TokenKind::Command { name, args } => {
                self.advance();
                self.end_statement()?;
                StmtKind::Command { name, args }
            }
            TokenKind::Unsupported(word) => {
                return Err(InterpError::syntax(
                    format!("'{word}' is not supported by the built-in engine."),
                    line,
                ));
            }
            TokenKind::End | TokenKind::Else | TokenKind::Elseif => {
                return Err(InterpError::syntax(
                    format!("Illegal use of reserved keyword \"{}\".", self.peek()),
                    line,
                ));
            }
            TokenKind::LBracket => match self.try_multi_assign()? {
                Some(kind) => kind,
                None => self.expression_statement()?,
            },
            _ => self.expression_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    /// Consume a statement terminator. Returns whether the result is displayed.
    fn end_statement(&mut self) -> InterpResult<bool> {
        match self.peek() {
            TokenKind::Semicolon => {
                self.advance();
                Ok(false)
            }
            TokenKind::Comma | TokenKind::Newline => {
                self.advance();
                Ok(true)
            }
            TokenKind::Eof | TokenKind::End | TokenKind::Else | TokenKind::Elseif => Ok(true),
            _ => Err(self.unexpected()),
        }
    }

    fn expression_statement(&mut self) -> InterpResult<StmtKind> {
        let expr = self.expr()?;
        if self.eat(&TokenKind::Assign) {
            let target = to_lvalue(expr, self.line())?;
            let value = self.expr()?;
            let display = self.end_statement()?;
            return Ok(StmtKind::Assign {
                targets: vec![target],
                value,
                display,
            });
        }
        let display = self.end_statement()?;
        Ok(StmtKind::Expr { expr, display })
    }

    /// `[a, ~, c(2)] = rhs`. Restores the cursor when the bracket turns out to
    /// be a matrix literal.
    fn try_multi_assign(&mut self) -> InterpResult<Option<StmtKind>> {
        let start = self.pos;
        self.advance();
        let mut targets = Vec::new();
        loop {
            match self.peek().clone() {
                TokenKind::RBracket => {
                    self.advance();
                    break;
                }
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::Not => {
                    self.advance();
                    targets.push(LValue::Ignore);
                }
                TokenKind::Ident(name) => {
                    self.advance();
                    let subscript = match self.peek() {
                        TokenKind::LParen => Some(Subscript::Paren(self.subscript_args(
                            TokenKind::LParen,
                            TokenKind::RParen,
                        )?)),
                        TokenKind::LBrace => Some(Subscript::Brace(self.subscript_args(
                            TokenKind::LBrace,
                            TokenKind::RBrace,
                        )?)),
                        _ => None,
                    };
                    targets.push(LValue::Var { name, subscript });
                }
                _ => {
                    self.pos = start;
                    return Ok(None);
                }
            }
        }
        if !self.at(&TokenKind::Assign) || targets.is_empty() {
            self.pos = start;
            return Ok(None);
        }
        self.advance();
        let value = self.expr()?;
        let display = self.end_statement()?;
        Ok(Some(StmtKind::Assign {
            targets,
            value,
            display,
        }))
    }

    fn if_statement(&mut self) -> InterpResult<StmtKind> {
        self.advance();
        let mut branches = Vec::new();
        let cond = self.expr()?;
        let body = self.block(&[TokenKind::Elseif, TokenKind::Else, TokenKind::End])?;
        branches.push((cond, body));
        let mut otherwise = None;
        loop {
            match self.peek() {
                TokenKind::Elseif => {
                    self.advance();
                    let cond = self.expr()?;
                    let body =
                        self.block(&[TokenKind::Elseif, TokenKind::Else, TokenKind::End])?;
                    branches.push((cond, body));
                }
                TokenKind::Else => {
                    self.advance();
                    otherwise = Some(self.block(&[TokenKind::End])?);
                }
                _ => break,
            }
        }
        self.expect_end("if")?;
        Ok(StmtKind::If {
            branches,
            otherwise,
        })
    }

    fn for_statement(&mut self) -> InterpResult<StmtKind> {
        self.advance();
        let parenthesized = self.eat(&TokenKind::LParen);
        let var = match self.advance() {
            TokenKind::Ident(name) => name,
            other => {
                return Err(InterpError::syntax(
                    format!("Expected loop variable but found '{other}'."),
                    self.line(),
                ));
            }
        };
        self.expect(&TokenKind::Assign)?;
        let iter = self.expr()?;
        if parenthesized {
            self.expect(&TokenKind::RParen)?;
        }
        let body = self.block(&[TokenKind::End])?;
        self.expect_end("for")?;
        Ok(StmtKind::For { var, iter, body })
    }

    fn while_statement(&mut self) -> InterpResult<StmtKind> {
        self.advance();
        let cond = self.expr()?;
        let body = self.block(&[TokenKind::End])?;
        self.expect_end("while")?;
        Ok(StmtKind::While { cond, body })
    }

    fn expect_end(&mut self, construct: &str) -> InterpResult<()> {
        if self.eat(&TokenKind::End) {
            // `end;` is allowed.
            if matches!(self.peek(), TokenKind::Semicolon | TokenKind::Comma) {
                self.advance();
            }
            Ok(())
        } else {
            Err(InterpError::syntax(
                format!("'{construct}' block is missing its 'end'."),
                self.line(),
            ))
        }
    }

    // ── Expressions ───────────────────────────────────────────

    fn expr(&mut self) -> InterpResult<Expr> {
        self.oror()
    }

    fn oror(&mut self) -> InterpResult<Expr> {
        let mut left = self.andand()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.andand()?;
            left = Expr::OrOr(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn andand(&mut self) -> InterpResult<Expr> {
        let mut left = self.elementwise_or()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.elementwise_or()?;
            left = Expr::AndAnd(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn elementwise_or(&mut self) -> InterpResult<Expr> {
        let mut left = self.elementwise_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.elementwise_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn elementwise_and(&mut self) -> InterpResult<Expr> {
        let mut left = self.comparison()?;
        while self.eat(&TokenKind::And) {
            let right = self.comparison()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> InterpResult<Expr> {
        let mut left = self.range()?;
        loop {
            let op = match self.peek() {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::Ne => BinOp::Ne,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.range()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn range(&mut self) -> InterpResult<Expr> {
        let first = self.additive()?;
        if !self.at(&TokenKind::Colon) || self.bare_colon_follows() {
            return Ok(first);
        }
        self.advance();
        let second = self.additive()?;
        if self.at(&TokenKind::Colon) && !self.bare_colon_follows() {
            self.advance();
            let third = self.additive()?;
            return Ok(Expr::Range {
                start: Box::new(first),
                step: Some(Box::new(second)),
                stop: Box::new(third),
            });
        }
        Ok(Expr::Range {
            start: Box::new(first),
            step: None,
            stop: Box::new(second),
        })
    }

    /// `:` followed by a closer or separator is not a range operator.
    fn bare_colon_follows(&self) -> bool {
        matches!(
            self.peek_at(1),
            TokenKind::RParen | TokenKind::RBrace | TokenKind::Comma
        )
    }

    fn additive(&mut self) -> InterpResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> InterpResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::MatMul,
                TokenKind::Slash => BinOp::MatDiv,
                TokenKind::Backslash => BinOp::MatLeftDiv,
                TokenKind::DotStar => BinOp::ElMul,
                TokenKind::DotSlash => BinOp::ElDiv,
                TokenKind::DotBackslash => BinOp::ElLeftDiv,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> InterpResult<Expr> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Not => UnaryOp::Not,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> InterpResult<Expr> {
        let mut base = self.postfix()?;
        loop {
            let op = match self.peek() {
                TokenKind::Caret => BinOp::MatPow,
                TokenKind::DotCaret => BinOp::ElPow,
                _ => return Ok(base),
            };
            self.advance();
            let exponent = self.power_operand()?;
            base = Expr::Binary(op, Box::new(base), Box::new(exponent));
        }
    }

    fn power_operand(&mut self) -> InterpResult<Expr> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Not => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.power_operand()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> InterpResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    let args = self.subscript_args(TokenKind::LParen, TokenKind::RParen)?;
                    expr = Expr::Index(Box::new(expr), args);
                }
                TokenKind::LBrace => {
                    let args = self.subscript_args(TokenKind::LBrace, TokenKind::RBrace)?;
                    expr = Expr::CellIndex(Box::new(expr), args);
                }
                TokenKind::Transpose => {
                    self.advance();
                    expr = Expr::Postfix(PostfixOp::Transpose, Box::new(expr));
                }
                TokenKind::DotTranspose => {
                    self.advance();
                    expr = Expr::Postfix(PostfixOp::DotTranspose, Box::new(expr));
                }
                TokenKind::Dot => {
                    return Err(InterpError::syntax(
                        "Structure field access is not supported by the built-in engine.",
                        self.line(),
                    ));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn subscript_args(&mut self, open: TokenKind, close: TokenKind) -> InterpResult<Vec<Expr>> {
        self.expect(&open)?;
        self.index_depth += 1;
        let mut args = Vec::new();
        if !self.at(&close) {
            loop {
                let bare_colon = self.at(&TokenKind::Colon)
                    && (self.peek_at(1) == &TokenKind::Comma || self.peek_at(1) == &close);
                if bare_colon {
                    self.advance();
                    args.push(Expr::Colon);
                } else {
                    args.push(self.expr()?);
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.index_depth -= 1;
        self.expect(&close)?;
        Ok(args)
    }

    fn primary(&mut self) -> InterpResult<Expr> {
        let line = self.line();
        match self.advance() {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Imaginary(n) => Ok(Expr::Imaginary(n)),
            TokenKind::Str(s) => Ok(Expr::Str(s)),
            TokenKind::Ident(name) => Ok(Expr::Ident(name)),
            TokenKind::End if self.index_depth > 0 => Ok(Expr::End),
            TokenKind::LParen => {
                let inner = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenKind::LBracket => Ok(Expr::Matrix(self.rows(TokenKind::RBracket)?)),
            TokenKind::LBrace => Ok(Expr::CellLiteral(self.rows(TokenKind::RBrace)?)),
            TokenKind::At => self.handle(),
            other => {
                Err(InterpError::syntax(
                    format!("Parse error at '{other}': usage might be invalid syntax."),
                    line,
                ))
            }
        }
    }

    fn rows(&mut self, close: TokenKind) -> InterpResult<Vec<Vec<Expr>>> {
        let mut rows = Vec::new();
        let mut row = Vec::new();
        loop {
            match self.peek() {
                k if *k == close => {
                    self.advance();
                    break;
                }
                TokenKind::Semicolon => {
                    self.advance();
                    if !row.is_empty() {
                        rows.push(std::mem::take(&mut row));
                    }
                }
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::Eof => {
                    return Err(InterpError::syntax(
                        format!("Expected '{close}' to close the literal."),
                        self.line(),
                    ));
                }
                _ => row.push(self.expr()?),
            }
        }
        if !row.is_empty() {
            rows.push(row);
        }
        Ok(rows)
    }

    fn handle(&mut self) -> InterpResult<Expr> {
        match self.advance() {
            TokenKind::Ident(name) => Ok(Expr::FuncHandle(name)),
            TokenKind::LParen => {
                let mut params = Vec::new();
                while !self.at(&TokenKind::RParen) {
                    match self.advance() {
                        TokenKind::Ident(name) => params.push(name),
                        TokenKind::Comma => {}
                        other => {
                            return Err(InterpError::syntax(
                                format!("Invalid anonymous function parameter '{other}'."),
                                self.line(),
                            ));
                        }
                    }
                }
                self.advance();
                let outer = self.index_depth;
                self.index_depth = 0;
                let body = self.expr();
                self.index_depth = outer;
                Ok(Expr::Lambda {
                    params,
                    body: Box::new(body?),
                })
            }
            other => Err(InterpError::syntax(
                format!("Invalid function handle near '{other}'."),
                self.line(),
            )),
        }
    }
}

fn to_lvalue(expr: Expr, line: usize) -> InterpResult<LValue> {
    match expr {
        Expr::Ident(name) => Ok(LValue::Var {
            name,
            subscript: None,
        }),
        Expr::Index(base, args) => match *base {
            Expr::Ident(name) => Ok(LValue::Var {
                name,
                subscript: Some(Subscript::Paren(args)),
            }),
            _ => Err(invalid_target(line)),
        },
        Expr::CellIndex(base, args) => match *base {
            Expr::Ident(name) => Ok(LValue::Var {
                name,
                subscript: Some(Subscript::Brace(args)),
            }),
            _ => Err(invalid_target(line)),
        },
        _ => Err(invalid_target(line)),
    }
}

fn invalid_target(line: usize) -> InterpError {
    InterpError::syntax(
        "Invalid assignment target: only variables and one level of indexing can be assigned.",
        line,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(src: &str) -> StmtKind {
        let mut stmts = parse(src).unwrap();
        assert_eq!(stmts.len(), 1, "{src}");
        stmts.remove(0).kind
    }

    #[test]
    fn semicolon_suppresses_display() {
        match single("x = 1;") {
            StmtKind::Assign { display, .. } => assert!(!display),
            other => panic!("{other:?}"),
        }
        match single("x = 1") {
            StmtKind::Assign { display, .. } => assert!(display),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        let StmtKind::Expr { expr, .. } = single("-2^2") else {
            panic!()
        };
        assert!(matches!(expr, Expr::Unary(UnaryOp::Neg, _)));
    }

    #[test]
    fn range_with_step() {
        let StmtKind::Expr { expr, .. } = single("0:0.5:2") else {
            panic!()
        };
        assert!(matches!(expr, Expr::Range { step: Some(_), .. }));
    }

    #[test]
    fn end_and_colon_in_index() {
        let StmtKind::Expr { expr, .. } = single("a(end, :)") else {
            panic!()
        };
        let Expr::Index(_, args) = expr else { panic!() };
        assert_eq!(args, vec![Expr::End, Expr::Colon]);
    }

    #[test]
    fn multi_assign() {
        match single("[m, ~] = max(v);") {
            StmtKind::Assign { targets, .. } => {
                assert_eq!(targets.len(), 2);
                assert_eq!(targets[1], LValue::Ignore);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn bracket_expression_is_not_assignment() {
        assert!(matches!(single("[1 2 3]"), StmtKind::Expr { .. }));
    }

    #[test]
    fn indexed_assignment() {
        match single("x(end+1) = 4;") {
            StmtKind::Assign { targets, .. } => assert!(matches!(
                &targets[0],
                LValue::Var {
                    subscript: Some(Subscript::Paren(_)),
                    ..
                }
            )),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn control_flow_blocks() {
        let src = "for i = 1:3\n  if i == 2\n    continue\n  elseif i > 2\n    break\n  else\n    x = i;\n  end\nend\nwhile false, end";
        let stmts = parse(src).unwrap();
        assert_eq!(stmts.len(), 2);
        let StmtKind::For { body, .. } = &stmts[0].kind else {
            panic!()
        };
        let StmtKind::If {
            branches,
            otherwise,
        } = &body[0].kind
        else {
            panic!()
        };
        assert_eq!(branches.len(), 2);
        assert!(otherwise.is_some());
    }

    #[test]
    fn missing_end_is_reported() {
        let err = parse("if x\n y = 1").unwrap_err();
        assert!(err.to_string().contains("missing its 'end'"));
    }

    #[test]
    fn statement_lines_are_recorded() {
        let stmts = parse("a = 1;\n\nb = 2;").unwrap();
        assert_eq!(stmts[1].line, 3);
    }

    #[test]
    fn lambda_body() {
        let StmtKind::Assign { value, .. } = single("f = @(x, y) x + y;") else {
            panic!()
        };
        assert_eq!(value.to_string(), "@(x,y)x+y");
    }

    #[test]
    fn unsupported_keyword() {
        let err = parse("function y = f(x)").unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }
}
