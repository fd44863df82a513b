//! Syntax tree.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    MatMul,
    MatDiv,
    MatLeftDiv,
    MatPow,
    ElMul,
    ElDiv,
    ElLeftDiv,
    ElPow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::MatMul => "*",
            BinOp::MatDiv => "/",
            BinOp::MatLeftDiv => "\\",
            BinOp::MatPow => "^",
            BinOp::ElMul => ".*",
            BinOp::ElDiv => "./",
            BinOp::ElLeftDiv => ".\\",
            BinOp::ElPow => ".^",
            BinOp::Eq => "==",
            BinOp::Ne => "~=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&",
            BinOp::Or => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    /// `'`, conjugate transpose.
    Transpose,
    /// `.'`
    DotTranspose,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Imaginary(f64),
    Str(String),
    Ident(String),
    /// Bare `:` inside an index.
    Colon,
    /// `end` inside an index.
    End,
    Unary(UnaryOp, Box<Expr>),
    Postfix(PostfixOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    AndAnd(Box<Expr>, Box<Expr>),
    OrOr(Box<Expr>, Box<Expr>),
    Range {
        start: Box<Expr>,
        step: Option<Box<Expr>>,
        stop: Box<Expr>,
    },
    /// `base(args)`: indexing or a function call.
    Index(Box<Expr>, Vec<Expr>),
    /// `base{args}`
    CellIndex(Box<Expr>, Vec<Expr>),
    Matrix(Vec<Vec<Expr>>),
    CellLiteral(Vec<Vec<Expr>>),
    /// `@name`
    FuncHandle(String),
    /// `@(params) body`
    Lambda { params: Vec<String>, body: Box<Expr> },
    /// Parenthesized expression, kept so rendered source round-trips.
    Paren(Box<Expr>),
}

/// One level of indexing on an assignment target.
#[derive(Debug, Clone, PartialEq)]
pub enum Subscript {
    Paren(Vec<Expr>),
    Brace(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    Var {
        name: String,
        subscript: Option<Subscript>,
    },
    /// `~` in a multi-output assignment.
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr {
        expr: Expr,
        display: bool,
    },
    Assign {
        targets: Vec<LValue>,
        value: Expr,
        display: bool,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return,
    Command {
        name: String,
        args: Vec<String>,
    },
}

/// Renders expressions back to source form, used for anonymous function text.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Imaginary(n) => write!(f, "{n}i"),
            Expr::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Expr::Ident(name) => f.write_str(name),
            Expr::Colon => f.write_str(":"),
            Expr::End => f.write_str("end"),
            Expr::Unary(op, inner) => {
                let sym = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::Not => "~",
                };
                write!(f, "{sym}{inner}")
            }
            Expr::Postfix(PostfixOp::Transpose, inner) => write!(f, "{inner}'"),
            Expr::Postfix(PostfixOp::DotTranspose, inner) => write!(f, "{inner}.'"),
            Expr::Binary(op, l, r) => write!(f, "{l}{}{r}", op.symbol()),
            Expr::AndAnd(l, r) => write!(f, "{l}&&{r}"),
            Expr::OrOr(l, r) => write!(f, "{l}||{r}"),
            Expr::Range { start, step, stop } => match step {
                Some(step) => write!(f, "{start}:{step}:{stop}"),
                None => write!(f, "{start}:{stop}"),
            },
            Expr::Index(base, args) => write!(f, "{base}({})", join(args, ",")),
            Expr::CellIndex(base, args) => write!(f, "{base}{{{}}}", join(args, ",")),
            Expr::Matrix(rows) => write!(f, "[{}]", join_rows(rows)),
            Expr::CellLiteral(rows) => write!(f, "{{{}}}", join_rows(rows)),
            Expr::FuncHandle(name) => write!(f, "@{name}"),
            Expr::Lambda { params, body } => write!(f, "@({}){body}", params.join(",")),
            Expr::Paren(inner) => write!(f, "({inner})"),
        }
    }
}

fn join(items: &[Expr], sep: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

fn join_rows(rows: &[Vec<Expr>]) -> String {
    rows.iter()
        .map(|row| join(row, ","))
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lambda_renders_compactly() {
        let body = Expr::Binary(
            BinOp::ElPow,
            Box::new(Expr::Ident("x".into())),
            Box::new(Expr::Number(2.0)),
        );
        let lambda = Expr::Lambda {
            params: vec!["x".into()],
            body: Box::new(body),
        };
        assert_eq!(lambda.to_string(), "@(x)x.^2");
    }
}
