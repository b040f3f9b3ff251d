//! Row filter expressions
//!
//! A small boolean language over named columns:
//!
//! ```text
//! sensitivity > 0.95 and l4_quality_flag == 1
//! `geolocation/degrade_flag` == 0 or not (land_cover_data.landsat_treecover < 60)
//! ```
//!
//! Each comparison puts a column on one side and a literal (number, quoted
//! string, `true`/`false`) on the other. Dotted column names are rewritten
//! to slash form; backticks quote names containing slashes.

use crate::columns::ColumnSpec;
use crate::error::{Result, SubsetError};
use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Float64Array, StringArray};
use arrow::compute::kernels::cmp;
use arrow::compute::{and, cast, not, or, prep_null_mask_filter};
use arrow::datatypes::{DataType, Float64Type};
use arrow::record_batch::RecordBatch;
use std::fmt;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    /// The operator seen from the other side: `a < b` is `b > a`
    fn flip(self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::LtEq => CmpOp::GtEq,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::GtEq => CmpOp::LtEq,
            op => op,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Str(s) => write!(f, "{:?}", s),
            Literal::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        column: ColumnSpec,
        op: CmpOp,
        literal: Literal,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::And(l, r) => write!(f, "({} and {})", l, r),
            Expr::Or(l, r) => write!(f, "({} or {})", l, r),
            Expr::Not(e) => write!(f, "not {}", e),
            Expr::Compare {
                column,
                op,
                literal,
            } => write!(f, "`{}` {} {}", column, op.symbol(), literal),
        }
    }
}

/// A compiled row filter
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    expr: Expr,
}

impl Query {
    /// Compile `text`; blank text means no filter
    pub fn parse(text: &str) -> Result<Option<Self>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            nesting: 0,
            comparisons: 0,
        };
        let expr = parser.expr()?;
        if let Some(token) = parser.peek() {
            return Err(SubsetError::Query(format!(
                "unexpected {} in {:?}",
                token, text
            )));
        }

        Ok(Some(Self {
            text: text.trim().to_string(),
            expr,
        }))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Referenced columns in first-seen order, without repeats
    pub fn columns(&self) -> Vec<ColumnSpec> {
        let mut out = Vec::new();
        collect_columns(&self.expr, &mut out);
        out
    }

    /// Evaluate against `batch`; rows where a comparison meets a null are
    /// not selected by that comparison
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        evaluate(&self.expr, batch)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Mask of rows selected by `query`, all true when there is none
pub fn mask(batch: &RecordBatch, query: Option<&Query>) -> Result<BooleanArray> {
    match query {
        Some(query) => query.evaluate(batch),
        None => Ok(BooleanArray::from(vec![true; batch.num_rows()])),
    }
}

fn collect_columns(expr: &Expr, out: &mut Vec<ColumnSpec>) {
    match expr {
        Expr::And(l, r) | Expr::Or(l, r) => {
            collect_columns(l, out);
            collect_columns(r, out);
        }
        Expr::Not(e) => collect_columns(e, out),
        Expr::Compare { column, .. } => {
            if !out.contains(column) {
                out.push(column.clone());
            }
        }
    }
}

fn evaluate(expr: &Expr, batch: &RecordBatch) -> Result<BooleanArray> {
    match expr {
        Expr::And(l, r) => Ok(and(&evaluate(l, batch)?, &evaluate(r, batch)?)?),
        Expr::Or(l, r) => Ok(or(&evaluate(l, batch)?, &evaluate(r, batch)?)?),
        Expr::Not(e) => Ok(not(&evaluate(e, batch)?)?),
        Expr::Compare {
            column,
            op,
            literal,
        } => compare(batch, column, *op, literal),
    }
}

fn compare(batch: &RecordBatch, column: &ColumnSpec, op: CmpOp, literal: &Literal) -> Result<BooleanArray> {
    let name = column.name();
    let array = batch
        .column_by_name(&name)
        .ok_or_else(|| SubsetError::UnknownColumn(name.clone()))?;

    if matches!(
        array.data_type(),
        DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _)
    ) {
        return Err(SubsetError::Query(format!(
            "{} has several components per row; select one with {}[i]",
            name, name
        )));
    }

    let result = match literal {
        Literal::Number(n) => {
            let values = cast(array, &DataType::Float64)?;
            let scalar = Float64Array::new_scalar(*n);
            let result = apply(op, &values, &scalar)?;
            with_nan_semantics(result, &values, op)?
        }
        Literal::Str(s) => {
            let values = cast(array, &DataType::Utf8)?;
            apply(op, &values, &StringArray::new_scalar(s.as_str()))?
        }
        Literal::Bool(b) => {
            let values = cast(array, &DataType::Boolean)?;
            apply(op, &values, &BooleanArray::new_scalar(*b))?
        }
    };

    Ok(prep_null_mask_filter(&result))
}

fn apply(op: CmpOp, lhs: &dyn arrow::array::Datum, rhs: &dyn arrow::array::Datum) -> Result<BooleanArray> {
    let result = match op {
        CmpOp::Eq => cmp::eq(lhs, rhs),
        CmpOp::NotEq => cmp::neq(lhs, rhs),
        CmpOp::Lt => cmp::lt(lhs, rhs),
        CmpOp::LtEq => cmp::lt_eq(lhs, rhs),
        CmpOp::Gt => cmp::gt(lhs, rhs),
        CmpOp::GtEq => cmp::gt_eq(lhs, rhs),
    }?;
    Ok(result)
}

/// Arrow orders NaN above every number; a NaN sample only satisfies `!=`
fn with_nan_semantics(result: BooleanArray, values: &ArrayRef, op: CmpOp) -> Result<BooleanArray> {
    let values = values.as_primitive::<Float64Type>();
    if !values.values().iter().any(|v| v.is_nan()) {
        return Ok(result);
    }

    let is_nan: BooleanArray = values.values().iter().map(|v| Some(v.is_nan())).collect();
    Ok(match op {
        CmpOp::NotEq => or(&result, &is_nan)?,
        _ => and(&result, &not(&is_nan)?)?,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Column(String),
    Literal(Literal),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::And => f.write_str("'and'"),
            Token::Or => f.write_str("'or'"),
            Token::Not => f.write_str("'not'"),
            Token::Cmp(op) => write!(f, "'{}'", op.symbol()),
            Token::Column(name) => write!(f, "column {}", name),
            Token::Literal(lit) => write!(f, "literal {}", lit),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' => {
                tokens.push(Token::And);
                i += if next == Some('&') { 2 } else { 1 };
            }
            '|' => {
                tokens.push(Token::Or);
                i += if next == Some('|') { 2 } else { 1 };
            }
            '~' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let (op, len) = match (c, next) {
                    ('=', Some('=')) => (CmpOp::Eq, 2),
                    ('!', Some('=')) => (CmpOp::NotEq, 2),
                    ('<', Some('=')) => (CmpOp::LtEq, 2),
                    ('>', Some('=')) => (CmpOp::GtEq, 2),
                    ('<', _) => (CmpOp::Lt, 1),
                    ('>', _) => (CmpOp::Gt, 1),
                    _ => {
                        return Err(SubsetError::Query(format!(
                            "unexpected {:?} at offset {} (use == and !=)",
                            c, i
                        )));
                    }
                };
                tokens.push(Token::Cmp(op));
                i += len;
            }
            '`' => {
                let end = find_closing(&chars, i, '`')?;
                let name: String = chars[i + 1..end].iter().collect();
                tokens.push(Token::Column(name));
                i = end + 1;
            }
            '\'' | '"' => {
                let end = find_closing(&chars, i, c)?;
                let value: String = chars[i + 1..end].iter().collect();
                tokens.push(Token::Literal(Literal::Str(value)));
                i = end + 1;
            }
            c if c.is_ascii_digit()
                || ((c == '-' || c == '+' || c == '.')
                    && next.is_some_and(|n| n.is_ascii_digit() || n == '.')) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() {
                    let d = chars[i];
                    let exponent_sign = (d == '-' || d == '+') && matches!(chars[i - 1], 'e' | 'E');
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal.parse::<f64>().map_err(|_| {
                    SubsetError::Query(format!("invalid number {:?}", literal))
                })?;
                tokens.push(Token::Literal(Literal::Number(value)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '/'))
                {
                    i += 1;
                }
                // Optional component suffix
                if chars.get(i) == Some(&'[') {
                    let end = find_closing(&chars, i, ']')?;
                    i = end + 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::Literal(Literal::Bool(true)),
                    "false" => Token::Literal(Literal::Bool(false)),
                    _ => Token::Column(word),
                });
            }
            other => {
                return Err(SubsetError::Query(format!(
                    "unexpected {:?} at offset {}",
                    other, i
                )));
            }
        }
    }

    Ok(tokens)
}

fn find_closing(chars: &[char], open: usize, close: char) -> Result<usize> {
    chars[open + 1..]
        .iter()
        .position(|&c| c == close)
        .map(|p| open + 1 + p)
        .ok_or_else(|| SubsetError::Query(format!("unterminated {:?} at offset {}", chars[open], open)))
}

/// Deepest nesting of `not` and parentheses
const MAX_NESTING: usize = 64;

/// Most comparisons in one query
const MAX_COMPARISONS: usize = 1024;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    comparisons: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn enter(&mut self) -> Result<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(SubsetError::Query(format!(
                "nested more than {} levels deep",
                MAX_NESTING
            )));
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.enter()?;
            let inner = self.unary();
            self.nesting -= 1;
            return Ok(Expr::Not(Box::new(inner?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            self.enter()?;
            let inner = self.expr();
            self.nesting -= 1;
            let inner = inner?;
            return match self.next() {
                Some(Token::RParen) => Ok(inner),
                Some(token) => Err(SubsetError::Query(format!("expected ')', found {}", token))),
                None => Err(SubsetError::Query("expected ')' at end of query".to_string())),
            };
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        self.comparisons += 1;
        if self.comparisons > MAX_COMPARISONS {
            return Err(SubsetError::Query(format!(
                "more than {} comparisons",
                MAX_COMPARISONS
            )));
        }
        let left = self.operand()?;
        let op = match self.next() {
            Some(Token::Cmp(op)) => op,
            Some(token) => {
                return Err(SubsetError::Query(format!(
                    "expected a comparison operator, found {}",
                    token
                )));
            }
            None => {
                return Err(SubsetError::Query(
                    "expected a comparison operator at end of query".to_string(),
                ));
            }
        };
        let right = self.operand()?;

        match (left, right) {
            (Operand::Column(column), Operand::Literal(literal)) => Ok(Expr::Compare {
                column,
                op,
                literal,
            }),
            (Operand::Literal(literal), Operand::Column(column)) => Ok(Expr::Compare {
                column,
                op: op.flip(),
                literal,
            }),
            (Operand::Column(a), Operand::Column(b)) => Err(SubsetError::Query(format!(
                "cannot compare column {} with column {}",
                a, b
            ))),
            (Operand::Literal(a), Operand::Literal(b)) => Err(SubsetError::Query(format!(
                "comparison of {} with {} references no column",
                a, b
            ))),
        }
    }

    fn operand(&mut self) -> Result<Operand> {
        match self.next() {
            Some(Token::Column(name)) => Ok(Operand::Column(
                ColumnSpec::parse(&name).map_err(|e| SubsetError::Query(e.to_string()))?,
            )),
            Some(Token::Literal(literal)) => Ok(Operand::Literal(literal)),
            Some(token) => Err(SubsetError::Query(format!(
                "expected a column or literal, found {}",
                token
            ))),
            None => Err(SubsetError::Query(
                "expected a column or literal at end of query".to_string(),
            )),
        }
    }
}

enum Operand {
    Column(ColumnSpec),
    Literal(Literal),
}
