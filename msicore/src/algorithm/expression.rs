use std::fmt;
use std::str::FromStr;

use statrs::statistics::{Data, Median, Statistics};

use crate::data::frame::FrameSlice;
use crate::error::{CoreError, Result};

/// Reduction of one column of the horizon sub-frame to a scalar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnReduction {
    Mean,
    Sum,
    Median,
    Std,
    Var,
    Min,
    Max,
    Count,
    First,
    Last,
}

impl FromStr for ColumnReduction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(ColumnReduction::Mean),
            "sum" => Ok(ColumnReduction::Sum),
            "median" => Ok(ColumnReduction::Median),
            "std" => Ok(ColumnReduction::Std),
            "var" => Ok(ColumnReduction::Var),
            "min" => Ok(ColumnReduction::Min),
            "max" => Ok(ColumnReduction::Max),
            "count" => Ok(ColumnReduction::Count),
            "first" => Ok(ColumnReduction::First),
            "last" => Ok(ColumnReduction::Last),
            other => Err(CoreError::Expression(format!("unknown column method '{}'", other))),
        }
    }
}

impl ColumnReduction {
    /// Reduce the non-missing values of a column, NaN when there are none.
    pub fn apply(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return match self {
                ColumnReduction::Sum | ColumnReduction::Count => 0.0,
                _ => f64::NAN,
            };
        }
        match self {
            ColumnReduction::Mean => values.mean(),
            ColumnReduction::Sum => values.iter().sum(),
            ColumnReduction::Median => Data::new(values.to_vec()).median(),
            ColumnReduction::Std => values.std_dev(),
            ColumnReduction::Var => values.variance(),
            ColumnReduction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            ColumnReduction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ColumnReduction::Count => values.len() as f64,
            ColumnReduction::First => values[0],
            ColumnReduction::Last => values[values.len() - 1],
        }
    }
}

/// Scalar functions callable from an expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Log,
    Log10,
    Exp,
    Min,
    Max,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(Function::Abs),
            "sqrt" => Some(Function::Sqrt),
            "log" => Some(Function::Log),
            "log10" => Some(Function::Log10),
            "exp" => Some(Function::Exp),
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            _ => None,
        }
    }

    fn arity_ok(&self, n: usize) -> bool {
        match self {
            Function::Min | Function::Max => n >= 1,
            _ => n == 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Parsed custom aggregation expression.
///
/// # Description
///
/// The grammar covers numbers, `+ - * / **`, unary minus, parentheses,
/// column reductions such as `data['int_x'].mean()`, `len(data)` and the
/// scalar functions `abs sqrt log log10 exp min max`. Nothing else is
/// accepted, so an expression can only read the horizon it is evaluated on.
///
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Rows,
    Column { name: String, reduction: ColumnReduction },
    Negate(Box<Expr>),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Call { function: Function, args: Vec<Expr> },
}

impl Expr {
    pub fn parse(source: &str) -> Result<Expr> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, position: 0 };
        let expr = parser.expression()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(CoreError::Expression(format!("unexpected {} after expression", token))),
        }
    }

    /// Names of all columns the expression reads.
    pub fn columns(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_columns(&mut names);
        names
    }

    fn collect_columns<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Column { name, .. } => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Expr::Negate(inner) => inner.collect_columns(names),
            Expr::Binary { left, right, .. } => {
                left.collect_columns(names);
                right.collect_columns(names);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_columns(names)),
            Expr::Number(_) | Expr::Rows => {}
        }
    }

    pub fn evaluate(&self, data: &FrameSlice) -> Result<f64> {
        match self {
            Expr::Number(value) => Ok(*value),
            Expr::Rows => Ok(data.len() as f64),
            Expr::Column { name, reduction } => {
                let values = data
                    .valid(name)
                    .map_err(|_| CoreError::Expression(format!("unknown column '{}'", name)))?;
                Ok(reduction.apply(&values))
            }
            Expr::Negate(inner) => Ok(-inner.evaluate(data)?),
            Expr::Binary { op, left, right } => {
                let l = left.evaluate(data)?;
                let r = right.evaluate(data)?;
                match op {
                    BinaryOp::Add => Ok(l + r),
                    BinaryOp::Sub => Ok(l - r),
                    BinaryOp::Mul => Ok(l * r),
                    // IEEE semantics, a zero denominator gives inf or NaN
                    BinaryOp::Div => Ok(l / r),
                    BinaryOp::Pow => Ok(l.powf(r)),
                }
            }
            Expr::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(data))
                    .collect::<Result<Vec<f64>>>()?;
                let x = values[0];
                match function {
                    Function::Abs => Ok(x.abs()),
                    Function::Sqrt => Ok(x.sqrt()),
                    Function::Log => Ok(x.ln()),
                    Function::Log10 => Ok(x.log10()),
                    Function::Exp => Ok(x.exp()),
                    Function::Min => Ok(values.iter().copied().fold(f64::INFINITY, f64::min)),
                    Function::Max => Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                }
            }
        }
    }
}

impl FromStr for Expr {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Expr::parse(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    Power,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(v) => write!(f, "number {}", v),
            Token::Ident(s) => write!(f, "name '{}'", s),
            Token::Str(s) => write!(f, "string '{}'", s),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::Power => write!(f, "'**'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::Dot => write!(f, "'.'"),
            Token::Comma => write!(f, "','"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' => { tokens.push(Token::Plus); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            '/' => { tokens.push(Token::Slash); i += 1; }
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            '[' => { tokens.push(Token::LBracket); i += 1; }
            ']' => { tokens.push(Token::RBracket); i += 1; }
            ',' => { tokens.push(Token::Comma); i += 1; }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Power);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == quote)
                    .map(|p| start + p)
                    .ok_or_else(|| CoreError::Expression("unterminated string".to_string()))?;
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent, e.g. 1e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| CoreError::Expression(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(value));
            }
            '.' => { tokens.push(Token::Dot); i += 1; }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(CoreError::Expression(format!("unexpected character '{}'", other)));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(CoreError::Expression(format!("expected {}, found {}", expected, token))),
            None => Err(CoreError::Expression(format!("expected {}, found end of input", expected))),
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.term()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    // unary minus binds looser than `**`: -2 ** 2 == -4
    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.position += 1;
                Ok(Expr::Negate(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.position += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // right associative
    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if let Some(Token::Power) = self.peek() {
            self.position += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Binary { op: BinaryOp::Pow, left: Box::new(base), right: Box::new(exponent) });
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "data" => self.column_reduction(),
            Some(Token::Ident(name)) if name == "len" => {
                self.expect(Token::LParen)?;
                self.expect(Token::Ident("data".to_string()))?;
                self.expect(Token::RParen)?;
                Ok(Expr::Rows)
            }
            Some(Token::Ident(name)) => {
                let function = Function::from_name(&name)
                    .ok_or_else(|| CoreError::Expression(format!("unknown function '{}'", name)))?;
                self.expect(Token::LParen)?;
                let mut args = vec![self.expression()?];
                while let Some(Token::Comma) = self.peek() {
                    self.position += 1;
                    args.push(self.expression()?);
                }
                self.expect(Token::RParen)?;
                if !function.arity_ok(args.len()) {
                    return Err(CoreError::Expression(format!(
                        "{} takes a different number of arguments than {}",
                        name,
                        args.len()
                    )));
                }
                Ok(Expr::Call { function, args })
            }
            Some(token) => Err(CoreError::Expression(format!("unexpected {}", token))),
            None => Err(CoreError::Expression("unexpected end of input".to_string())),
        }
    }

    // data['col'].method()
    fn column_reduction(&mut self) -> Result<Expr> {
        self.expect(Token::LBracket)?;
        let name = match self.next() {
            Some(Token::Str(name)) => name,
            Some(token) => return Err(CoreError::Expression(format!("expected column name, found {}", token))),
            None => return Err(CoreError::Expression("expected column name".to_string())),
        };
        self.expect(Token::RBracket)?;
        self.expect(Token::Dot)?;
        let method = match self.next() {
            Some(Token::Ident(method)) => method,
            _ => return Err(CoreError::Expression(format!("expected a method on column '{}'", name))),
        };
        let reduction = method.parse::<ColumnReduction>()?;
        self.expect(Token::LParen)?;
        self.expect(Token::RParen)?;
        Ok(Expr::Column { name, reduction })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::{Column, MeasurementFrame};

    fn frame() -> MeasurementFrame {
        let names = (0..4).map(|i| format!("R00X{}Y1", i)).collect();
        let mut frame = MeasurementFrame::new(names);
        frame.push_column(Column::from_values("int_a", &[1.0, 2.0, 3.0, 4.0])).unwrap();
        frame.push_column(Column::new("int_b", vec![Some(2.0), None, Some(2.0), Some(4.0)])).unwrap();
        frame
    }

    fn eval(source: &str) -> Result<f64> {
        let frame = frame();
        Expr::parse(source)?.evaluate(&frame.slice(0, frame.len()))
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(eval("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(eval("-2 ** 2").unwrap(), -4.0);
        assert_eq!(eval("2 ** 3 ** 2").unwrap(), 512.0);
        assert_eq!(eval("1.5e1 / 3").unwrap(), 5.0);
    }

    #[test]
    fn test_column_reductions() {
        assert_eq!(eval("data['int_a'].mean()").unwrap(), 2.5);
        assert_eq!(eval("data['int_a'].sum() / data['int_b'].sum()").unwrap(), 10.0 / 8.0);
        assert_eq!(eval("data[\"int_b\"].count()").unwrap(), 3.0);
        assert_eq!(eval("data['int_b'].median()").unwrap(), 2.0);
        assert_eq!(eval("data['int_a'].first() + data['int_a'].last()").unwrap(), 5.0);
        assert_eq!(eval("len(data)").unwrap(), 4.0);
        let var = eval("data['int_a'].var()").unwrap();
        assert!((var - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("max(1, data['int_a'].max(), 3)").unwrap(), 4.0);
        assert_eq!(eval("abs(-3)").unwrap(), 3.0);
        assert!((eval("log10(1000)").unwrap() - 3.0).abs() < 1e-12);
        assert!(Expr::parse("sqrt(1, 2)").is_err());
    }

    #[test]
    fn test_rejects_unsafe_or_invalid_input() {
        assert!(Expr::parse("__import__('os')").is_err());
        assert!(Expr::parse("data['int_a'].drop()").is_err());
        assert!(Expr::parse("1 +").is_err());
        assert!(Expr::parse("1 2").is_err());
        assert!(Expr::parse("data['int_a'.mean()").is_err());
        assert!(Expr::parse("1; 2").is_err());
    }

    #[test]
    fn test_evaluation_errors() {
        assert!(eval("data['missing'].mean()").is_err());
        assert!(eval("1 / (data['int_a'].count() - 4)").unwrap().is_infinite());
        assert!(eval("data['int_a'].sum() / 0 - data['int_a'].sum() / 0").unwrap().is_nan());
    }

    #[test]
    fn test_columns_listed_once() {
        let expr = Expr::parse("data['int_a'].sum() / (data['int_a'].sum() + data['int_b'].sum())").unwrap();
        assert_eq!(expr.columns(), vec!["int_a", "int_b"]);
    }
}
