//! Arithmetic formulas over trends, compiled to SQL expressions.
//!
//! ```text
//! expr     := term (("+" | "-") term)*
//! term     := unary (("*" | "/" | "//" | "%") unary)*
//! unary    := ("+" | "-") unary | operand
//! operand  := real | integer | "(" expr ")" | name "(" expr ("," expr)* ")" | ident
//! ident    := part ("." part)?
//! part     := word | '"' quoted '"'
//! ```
//!
//! Identifiers refer to trends, optionally qualified by data source, and are
//! rendered as `"<table>"."<trend>"` after resolving the table that stores
//! the trend.
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use super::error::{Error, InputError, NoSuchTrendError};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormulaError {
    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },
    #[error("unterminated quoted identifier starting at position {position}")]
    UnterminatedQuote { position: usize },
    #[error("unexpected '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },
    #[error("unexpected end of formula")]
    UnexpectedEnd,
}

impl From<FormulaError> for Error {
    fn from(err: FormulaError) -> Error {
        Error::Input(InputError::from_msg(format!("Invalid formula: {err}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    fn as_str(self) -> &'static str {
        match self {
            Sign::Plus => "+",
            Sign::Minus => "-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    FloorDiv,
    Mod,
    Add,
    Sub,
}

impl BinaryOp {
    fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Integer(String),
    Real(String),
    Identifier {
        namespace: Option<String>,
        name: String,
    },
    Unary {
        sign: Sign,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Group(Box<Expr>),
}

impl Expr {
    /// All trend identifiers in the expression, in order of appearance.
    pub fn identifiers(&self) -> Vec<(Option<&str>, &str)> {
        let mut identifiers = Vec::new();

        self.collect_identifiers(&mut identifiers);

        identifiers
    }

    fn collect_identifiers<'a>(&'a self, identifiers: &mut Vec<(Option<&'a str>, &'a str)>) {
        match self {
            Expr::Integer(_) | Expr::Real(_) => {}
            Expr::Identifier { namespace, name } => {
                identifiers.push((namespace.as_deref(), name.as_str()));
            }
            Expr::Unary { expr, .. } | Expr::Group(expr) => expr.collect_identifiers(identifiers),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_identifiers(identifiers);
                rhs.collect_identifiers(identifiers);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_identifiers(identifiers);
                }
            }
        }
    }

    /// Render the expression as SQL, resolving identifiers through `context`.
    pub fn render<F>(&self, context: &mut Context<F>) -> Result<String, NoSuchTrendError>
    where
        F: FnMut(Option<&str>, &str) -> Option<TrendMeta>,
    {
        match self {
            Expr::Integer(value) | Expr::Real(value) => Ok(value.clone()),
            Expr::Identifier { namespace, name } => {
                context.trend_column(namespace.as_deref(), name)
            }
            Expr::Unary { sign, expr } => Ok(format!("{}{}", sign.as_str(), expr.render(context)?)),
            Expr::Binary { op, lhs, rhs } => Ok(format!(
                "{} {} {}",
                lhs.render(context)?,
                op.as_str(),
                rhs.render(context)?
            )),
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| arg.render(context))
                    .collect::<Result<Vec<String>, NoSuchTrendError>>()?;

                Ok(format!("{}({})", name.to_uppercase(), args.join(", ")))
            }
            Expr::Group(expr) => Ok(format!("({})", expr.render(context)?)),
        }
    }
}

/// Location of a trend: the data source and trend names as registered, and
/// the table holding the trend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendMeta {
    pub data_source: String,
    pub trend: String,
    pub table: String,
}

/// State accumulated while rendering a formula.
pub struct Context<F>
where
    F: FnMut(Option<&str>, &str) -> Option<TrendMeta>,
{
    lookup: F,
    tables: Vec<String>,
    trends: Vec<(String, String)>,
    table_by_trend: HashMap<(String, String), String>,
}

impl<F> Context<F>
where
    F: FnMut(Option<&str>, &str) -> Option<TrendMeta>,
{
    pub fn new(lookup: F) -> Context<F> {
        Context {
            lookup,
            tables: Vec::new(),
            trends: Vec::new(),
            table_by_trend: HashMap::new(),
        }
    }

    /// Distinct tables referenced so far, in order of first reference.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Distinct (data source, trend) pairs referenced so far.
    pub fn trends(&self) -> &[(String, String)] {
        &self.trends
    }

    pub fn table_of(&self, data_source: &str, trend: &str) -> Option<&str> {
        self.table_by_trend
            .get(&(data_source.to_string(), trend.to_string()))
            .map(String::as_str)
    }

    fn trend_column(
        &mut self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<String, NoSuchTrendError> {
        let trend_meta = (self.lookup)(namespace, name).ok_or_else(|| NoSuchTrendError {
            identifier: match namespace {
                Some(namespace) => format!("{namespace}.{name}"),
                None => name.to_string(),
            },
        })?;

        let trend_ident = (trend_meta.data_source.clone(), trend_meta.trend.clone());

        if !self.table_by_trend.contains_key(&trend_ident) {
            self.trends.push(trend_ident.clone());
            self.table_by_trend
                .insert(trend_ident, trend_meta.table.clone());
        }

        if !self.tables.contains(&trend_meta.table) {
            self.tables.push(trend_meta.table.clone());
        }

        Ok(format!("\"{}\".\"{}\"", trend_meta.table, trend_meta.trend))
    }
}

/// Formula compiled to SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFormula {
    pub sql: String,
    pub tables: Vec<String>,
    pub trends: Vec<(String, String)>,
}

/// Parse `formula` and render it with `lookup` resolving the trends.
pub fn compile<F>(formula: &str, lookup: F) -> Result<CompiledFormula, Error>
where
    F: FnMut(Option<&str>, &str) -> Option<TrendMeta>,
{
    let expr = parse(formula)?;

    let mut context = Context::new(lookup);

    let sql = expr.render(&mut context)?;

    Ok(CompiledFormula {
        sql,
        tables: context.tables,
        trends: context.trends,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Integer(String),
    Real(String),
    Word(String),
    Quoted(String),
    Dot,
    Comma,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Integer(s) | Token::Real(s) | Token::Word(s) => write!(f, "{s}"),
            Token::Quoted(s) => write!(f, "\"{s}\""),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::DoubleSlash => write!(f, "//"),
            Token::Percent => write!(f, "%"),
        }
    }
}

fn tokenize(formula: &str) -> Result<Vec<(usize, Token)>, FormulaError> {
    let chars: Vec<char> = formula.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    let take_digits = |mut pos: usize| {
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }

        pos
    };

    while pos < chars.len() {
        let c = chars[pos];
        let start = pos;

        let token = match c {
            c if c.is_whitespace() => {
                pos += 1;
                continue;
            }
            '0'..='9' => {
                pos = take_digits(pos);

                let mut real = false;

                if pos + 1 < chars.len() && chars[pos] == '.' && chars[pos + 1].is_ascii_digit() {
                    pos = take_digits(pos + 1);
                    real = true;
                }

                if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
                    let mut exp = pos + 1;

                    if exp < chars.len() && (chars[exp] == '+' || chars[exp] == '-') {
                        exp += 1;
                    }

                    if exp < chars.len() && chars[exp].is_ascii_digit() {
                        pos = take_digits(exp);
                        real = true;
                    }
                }

                let text: String = chars[start..pos].iter().collect();

                if real {
                    Token::Real(text)
                } else {
                    Token::Integer(text)
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }

                Token::Word(chars[start..pos].iter().collect())
            }
            '"' => {
                let end = chars[pos + 1..]
                    .iter()
                    .position(|&c| c == '"')
                    .ok_or(FormulaError::UnterminatedQuote { position: start })?;

                pos += end + 2;

                Token::Quoted(chars[start + 1..pos - 1].iter().collect())
            }
            '/' if pos + 1 < chars.len() && chars[pos + 1] == '/' => {
                pos += 2;
                Token::DoubleSlash
            }
            _ => {
                pos += 1;

                match c {
                    '.' => Token::Dot,
                    ',' => Token::Comma,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    character => {
                        return Err(FormulaError::UnexpectedCharacter {
                            character,
                            position: start,
                        })
                    }
                }
            }
        };

        tokens.push((start, token));
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn next(&mut self) -> Result<(usize, Token), FormulaError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(FormulaError::UnexpectedEnd)?;

        self.pos += 1;

        Ok(token)
    }

    fn unexpected(position: usize, token: &Token) -> FormulaError {
        FormulaError::UnexpectedToken {
            token: token.to_string(),
            position,
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), FormulaError> {
        let (position, token) = self.next()?;

        if &token == expected {
            Ok(())
        } else {
            Err(Parser::unexpected(position, &token))
        }
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;

        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };

            self.pos += 1;

            let rhs = self.term()?;

            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;

        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::DoubleSlash) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(lhs),
            };

            self.pos += 1;

            let rhs = self.unary()?;

            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        let sign = match self.peek() {
            Some(Token::Plus) => Sign::Plus,
            Some(Token::Minus) => Sign::Minus,
            _ => return self.operand(),
        };

        self.pos += 1;

        Ok(Expr::Unary {
            sign,
            expr: Box::new(self.unary()?),
        })
    }

    fn operand(&mut self) -> Result<Expr, FormulaError> {
        let (position, token) = self.next()?;

        match token {
            Token::Integer(value) => Ok(Expr::Integer(value)),
            Token::Real(value) => Ok(Expr::Real(value)),
            Token::LParen => {
                let expr = self.expr()?;

                self.expect(&Token::RParen)?;

                Ok(Expr::Group(Box::new(expr)))
            }
            Token::Word(name) if self.peek() == Some(&Token::LParen) => {
                if !name.chars().all(char::is_alphabetic) {
                    return Err(Parser::unexpected(position, &Token::Word(name)));
                }

                self.pos += 1;

                let mut args = vec![self.expr()?];

                loop {
                    let (position, token) = self.next()?;

                    match token {
                        Token::Comma => args.push(self.expr()?),
                        Token::RParen => break,
                        other => return Err(Parser::unexpected(position, &other)),
                    }
                }

                Ok(Expr::Call { name, args })
            }
            Token::Word(first) | Token::Quoted(first) => {
                if self.peek() != Some(&Token::Dot) {
                    return Ok(Expr::Identifier {
                        namespace: None,
                        name: first,
                    });
                }

                self.pos += 1;

                match self.next()? {
                    (_, Token::Word(name) | Token::Quoted(name)) => Ok(Expr::Identifier {
                        namespace: Some(first),
                        name,
                    }),
                    (position, other) => Err(Parser::unexpected(position, &other)),
                }
            }
            other => Err(Parser::unexpected(position, &other)),
        }
    }
}

/// Parse a formula into an expression tree.
pub fn parse(formula: &str) -> Result<Expr, FormulaError> {
    let mut parser = Parser {
        tokens: tokenize(formula)?,
        pos: 0,
    };

    let expr = parser.expr()?;

    match parser.tokens.get(parser.pos) {
        Some((position, token)) => Err(Parser::unexpected(*position, token)),
        None => Ok(expr),
    }
}
