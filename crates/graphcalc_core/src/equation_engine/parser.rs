//! Plain-text expression grammar.
//!
//! ```text
//! equation    := list [ '=' list ] restriction*
//! restriction := '{' expr '}'
//! list        := expr (',' expr)*
//! expr        := comparison ('&' comparison)*
//! comparison  := additive (cmp additive)*
//! additive    := term (('+' | '-') term)*
//! term        := unary (('*' | '/') unary | <implicit> power)*
//! unary       := ('-' | '+') unary | power
//! power       := primary ['^' unary]
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),             // only '-'
    Call(String, Vec<Expr>),
    Compare(Box<Expr>, Relation, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    /// `sum`, `prod` or `integral` of `body` with `index` bound over `[lower, upper]`.
    Reduce {
        kind: ReduceKind,
        body: Box<Expr>,
        index: String,
        lower: Box<Expr>,
        upper: Box<Expr>,
    },
    /// `body` where `condition` holds, NaN elsewhere.
    Restrict(Box<Expr>, Box<Expr>),
    Tuple(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relation {
    pub fn holds(self, a: f64, b: f64) -> bool {
        match self {
            Relation::Eq => a == b,
            Relation::Ne => a != b,
            Relation::Lt => a < b,
            Relation::Le => a <= b,
            Relation::Gt => a > b,
            Relation::Ge => a >= b,
        }
    }

    pub fn is_inequality(self) -> bool {
        !matches!(self, Relation::Eq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Product,
    Integral,
}

/// A parsed top-level statement: `lhs [= rhs] {restriction}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub lhs: Expr,
    pub relation: Option<(Relation, Expr)>,
    pub restriction: Option<Expr>,
}

pub const CONSTANTS: &[(&str, f64)] = &[
    ("pi", std::f64::consts::PI),
    ("e", std::f64::consts::E),
    ("tau", std::f64::consts::TAU),
    ("inf", f64::INFINITY),
];

pub fn constant_value(name: &str) -> Option<f64> {
    CONSTANTS
        .iter()
        .find(|(constant, _)| *constant == name)
        .map(|(_, value)| *value)
}

/// Builtin function names accepted by the compiler, with their arity.
pub const BUILTIN_FUNCTIONS: &[(&str, usize)] = &[
    ("sin", 1),
    ("cos", 1),
    ("tan", 1),
    ("sec", 1),
    ("csc", 1),
    ("cot", 1),
    ("asin", 1),
    ("acos", 1),
    ("atan", 1),
    ("arcsin", 1),
    ("arccos", 1),
    ("arctan", 1),
    ("sinh", 1),
    ("cosh", 1),
    ("tanh", 1),
    ("sqrt", 1),
    ("cbrt", 1),
    ("exp", 1),
    ("ln", 1),
    ("log", 1),
    ("log10", 1),
    ("log2", 1),
    ("abs", 1),
    ("floor", 1),
    ("ceil", 1),
    ("round", 1),
    ("sign", 1),
    ("min", 2),
    ("max", 2),
    ("mod", 2),
    ("nroot", 2),
    ("logbase", 2),
    ("atan2", 2),
];

pub fn builtin_arity(name: &str) -> Option<usize> {
    BUILTIN_FUNCTIONS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, arity)| *arity)
}

fn reduce_kind(name: &str) -> Option<ReduceKind> {
    match name {
        "sum" => Some(ReduceKind::Sum),
        "prod" => Some(ReduceKind::Product),
        "integral" => Some(ReduceKind::Integral),
        _ => None,
    }
}

impl Expr {
    pub fn number(value: f64) -> Self {
        Expr::Number(value)
    }

    pub fn var(name: &str) -> Self {
        Expr::Variable(name.to_string())
    }

    pub fn binary(left: Expr, op: char, right: Expr) -> Self {
        Expr::Binary(Box::new(left), op, Box::new(right))
    }

    pub fn neg(operand: Expr) -> Self {
        Expr::Unary('-', Box::new(operand))
    }

    pub fn call(name: &str, arg: Expr) -> Self {
        Expr::Call(name.to_string(), vec![arg])
    }

    /// Free variable names, excluding constants and indices bound by reductions.
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_free(&mut Vec::new(), &mut out);
        out
    }

    fn collect_free(&self, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => {
                if constant_value(name).is_none() && !bound.contains(name) {
                    out.insert(name.clone());
                }
            }
            Expr::Binary(left, _, right)
            | Expr::Compare(left, _, right)
            | Expr::And(left, right)
            | Expr::Restrict(left, right) => {
                left.collect_free(bound, out);
                right.collect_free(bound, out);
            }
            Expr::Unary(_, operand) => operand.collect_free(bound, out),
            Expr::Call(_, args) | Expr::Tuple(args) => {
                for arg in args {
                    arg.collect_free(bound, out);
                }
            }
            Expr::Reduce {
                body,
                index,
                lower,
                upper,
                ..
            } => {
                lower.collect_free(bound, out);
                upper.collect_free(bound, out);
                bound.push(index.clone());
                body.collect_free(bound, out);
                bound.pop();
            }
        }
    }

    pub fn mentions(&self, name: &str) -> bool {
        self.free_variables().contains(name)
    }

    /// Names of all called functions, builtin or not.
    pub fn called_functions(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) | Expr::Variable(_) => {}
            Expr::Binary(left, _, right)
            | Expr::Compare(left, _, right)
            | Expr::And(left, right)
            | Expr::Restrict(left, right) => {
                left.called_functions(out);
                right.called_functions(out);
            }
            Expr::Unary(_, operand) => operand.called_functions(out),
            Expr::Call(name, args) => {
                out.insert(name.clone());
                for arg in args {
                    arg.called_functions(out);
                }
            }
            Expr::Tuple(args) => {
                for arg in args {
                    arg.called_functions(out);
                }
            }
            Expr::Reduce {
                body, lower, upper, ..
            } => {
                body.called_functions(out);
                lower.called_functions(out);
                upper.called_functions(out);
            }
        }
    }

    /// Rebuilds the node with every direct child replaced by `f(child)`.
    pub fn map_children(&self, f: &mut impl FnMut(&Expr) -> Expr) -> Expr {
        match self {
            Expr::Number(_) | Expr::Variable(_) => self.clone(),
            Expr::Binary(left, op, right) => {
                Expr::Binary(Box::new(f(left)), *op, Box::new(f(right)))
            }
            Expr::Unary(op, operand) => Expr::Unary(*op, Box::new(f(operand))),
            Expr::Call(name, args) => {
                Expr::Call(name.clone(), args.iter().map(&mut *f).collect())
            }
            Expr::Compare(left, relation, right) => {
                Expr::Compare(Box::new(f(left)), *relation, Box::new(f(right)))
            }
            Expr::And(left, right) => Expr::And(Box::new(f(left)), Box::new(f(right))),
            Expr::Restrict(body, condition) => {
                Expr::Restrict(Box::new(f(body)), Box::new(f(condition)))
            }
            Expr::Tuple(items) => Expr::Tuple(items.iter().map(&mut *f).collect()),
            Expr::Reduce {
                kind,
                body,
                index,
                lower,
                upper,
            } => Expr::Reduce {
                kind: *kind,
                body: Box::new(f(body)),
                index: index.clone(),
                lower: Box::new(f(lower)),
                upper: Box::new(f(upper)),
            },
        }
    }

    /// Replaces free occurrences of the named variables.
    pub fn substitute(&self, bindings: &[(String, Expr)]) -> Expr {
        match self {
            Expr::Number(_) => self.clone(),
            Expr::Variable(name) => bindings
                .iter()
                .find(|(bound, _)| bound == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| self.clone()),
            Expr::Binary(left, op, right) => Expr::Binary(
                Box::new(left.substitute(bindings)),
                *op,
                Box::new(right.substitute(bindings)),
            ),
            Expr::Unary(op, operand) => Expr::Unary(*op, Box::new(operand.substitute(bindings))),
            Expr::Call(name, args) => Expr::Call(
                name.clone(),
                args.iter().map(|arg| arg.substitute(bindings)).collect(),
            ),
            Expr::Compare(left, relation, right) => Expr::Compare(
                Box::new(left.substitute(bindings)),
                *relation,
                Box::new(right.substitute(bindings)),
            ),
            Expr::And(left, right) => Expr::And(
                Box::new(left.substitute(bindings)),
                Box::new(right.substitute(bindings)),
            ),
            Expr::Restrict(body, condition) => Expr::Restrict(
                Box::new(body.substitute(bindings)),
                Box::new(condition.substitute(bindings)),
            ),
            Expr::Tuple(items) => {
                Expr::Tuple(items.iter().map(|item| item.substitute(bindings)).collect())
            }
            Expr::Reduce {
                kind,
                body,
                index,
                lower,
                upper,
            } => {
                let inner: Vec<(String, Expr)> = bindings
                    .iter()
                    .filter(|(name, _)| name != index)
                    .cloned()
                    .collect();
                Expr::Reduce {
                    kind: *kind,
                    body: Box::new(body.substitute(&inner)),
                    index: index.clone(),
                    lower: Box::new(lower.substitute(bindings)),
                    upper: Box::new(upper.substitute(bindings)),
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", format_number(*n)),
            Expr::Variable(name) => write!(f, "{name}"),
            Expr::Binary(left, op, right) => write!(f, "({left} {op} {right})"),
            Expr::Unary(op, operand) => write!(f, "{op}{operand}"),
            Expr::Call(name, args) => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Compare(left, relation, right) => {
                let symbol = match relation {
                    Relation::Eq => "==",
                    Relation::Ne => "!=",
                    Relation::Lt => "<",
                    Relation::Le => "<=",
                    Relation::Gt => ">",
                    Relation::Ge => ">=",
                };
                write!(f, "({left} {symbol} {right})")
            }
            Expr::And(left, right) => write!(f, "({left} & {right})"),
            Expr::Reduce {
                kind,
                body,
                index,
                lower,
                upper,
            } => {
                let name = match kind {
                    ReduceKind::Sum => "sum",
                    ReduceKind::Product => "prod",
                    ReduceKind::Integral => "integral",
                };
                write!(f, "{name}({body}, {index}, {lower}, {upper})")
            }
            Expr::Restrict(body, condition) => write!(f, "{body} {{{condition}}}"),
            Expr::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Formats a float without a trailing `.0` for integral values.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// --- Tokenizer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Bar,
    Amp,
    Assign,
    Cmp(Relation),
}

/// `e3`, `E-7` or `e+2` directly after a number's digits. A bare `e` is left
/// alone so `2e` still reads as `2*e`.
fn exponent_suffix(chars: &Peekable<Chars<'_>>) -> Option<String> {
    let mut ahead = chars.clone();
    let marker = ahead.next().filter(|c| matches!(c, 'e' | 'E'))?;
    let mut suffix = String::from(marker);
    if let Some(sign) = ahead.peek().copied().filter(|c| matches!(c, '+' | '-')) {
        suffix.push(sign);
        ahead.next();
    }
    let digits: String = std::iter::from_fn(|| ahead.next_if(char::is_ascii_digit)).collect();
    if digits.is_empty() {
        return None;
    }
    suffix.push_str(&digits);
    Some(suffix)
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            if let Some(exponent) = exponent_suffix(&chars) {
                for _ in 0..exponent.len() {
                    chars.next();
                }
                num_str.push_str(&exponent);
            }
            let value = num_str
                .parse::<f64>()
                .map_err(|_| format!("Malformed number `{num_str}`"))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            chars.next();
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        Token::Caret
                    } else {
                        Token::Star
                    }
                }
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' | '[' => Token::LParen,
                ')' | ']' => Token::RParen,
                '{' => Token::LBrace,
                '}' => Token::RBrace,
                ',' => Token::Comma,
                '|' => Token::Bar,
                '&' => {
                    if chars.peek() == Some(&'&') {
                        chars.next();
                    }
                    Token::Amp
                }
                '=' => {
                    if chars.peek() == Some(&'=') {
                        chars.next();
                        Token::Cmp(Relation::Eq)
                    } else {
                        Token::Assign
                    }
                }
                '<' => {
                    if chars.peek() == Some(&'=') {
                        chars.next();
                        Token::Cmp(Relation::Le)
                    } else {
                        Token::Cmp(Relation::Lt)
                    }
                }
                '>' => {
                    if chars.peek() == Some(&'=') {
                        chars.next();
                        Token::Cmp(Relation::Ge)
                    } else {
                        Token::Cmp(Relation::Gt)
                    }
                }
                '!' if chars.peek() == Some(&'=') => {
                    chars.next();
                    Token::Cmp(Relation::Ne)
                }
                '≤' => Token::Cmp(Relation::Le),
                '≥' => Token::Cmp(Relation::Ge),
                '≠' => Token::Cmp(Relation::Ne),
                '·' | '×' => Token::Star,
                '÷' => Token::Slash,
                'π' => Token::Identifier("pi".to_string()),
                'θ' => Token::Identifier("theta".to_string()),
                other => return Err(format!("Unexpected character `{other}`")),
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}

// --- Parser ---

/// Parses a full statement, including an optional relation and domain restriction.
pub fn parse_equation(input: &str) -> Result<Equation, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("Empty expression".to_string());
    }
    let mut parser = Parser::new(tokens);
    let lhs = parser.parse_list()?;
    let relation = match parser.peek() {
        Some(Token::Assign) => {
            parser.consume();
            Some((Relation::Eq, parser.parse_list()?))
        }
        _ => None,
    };

    let (lhs, relation) = match (lhs, relation) {
        // A bare inequality like `y < x^2` is a relation, not a boolean expression.
        (Expr::Compare(left, rel, right), None) if rel.is_inequality() => {
            (*left, Some((rel, *right)))
        }
        other => other,
    };

    let mut restriction: Option<Expr> = None;
    while let Some(Token::LBrace) = parser.peek() {
        parser.consume();
        let condition = parser.parse_expression()?;
        parser.expect(Token::RBrace, "Expected '}'")?;
        restriction = Some(match restriction {
            Some(previous) => Expr::And(Box::new(previous), Box::new(condition)),
            None => condition,
        });
    }

    if let Some(token) = parser.peek() {
        return Err(format!("Unexpected token {token:?}"));
    }
    Ok(Equation {
        lhs,
        relation,
        restriction,
    })
}

/// Parses a single expression (no top-level `=`).
pub fn parse(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        return Err(format!("Unexpected token {token:?}"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    abs_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            abs_depth: 0,
        }
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).cloned()
    }

    fn consume(&mut self) -> Option<Token> {
        if self.pos < self.tokens.len() {
            let t = self.tokens[self.pos].clone();
            self.pos += 1;
            Some(t)
        } else {
            None
        }
    }

    fn expect(&mut self, token: Token, message: &str) -> Result<(), String> {
        match self.consume() {
            Some(found) if found == token => Ok(()),
            _ => Err(message.to_string()),
        }
    }

    fn parse_list(&mut self) -> Result<Expr, String> {
        let first = self.parse_expression()?;
        if self.peek() != Some(Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while let Some(Token::Comma) = self.peek() {
            self.consume();
            items.push(self.parse_expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_expression(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_comparison()?;
        while let Some(Token::Amp) = self.peek() {
            self.consume();
            let right = self.parse_comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let first = self.parse_additive()?;
        let mut chain: Option<Expr> = None;
        let mut previous = first.clone();
        while let Some(Token::Cmp(relation)) = self.peek() {
            self.consume();
            let next = self.parse_additive()?;
            let link = Expr::Compare(Box::new(previous), relation, Box::new(next.clone()));
            chain = Some(match chain {
                Some(acc) => Expr::And(Box::new(acc), Box::new(link)),
                None => link,
            });
            previous = next;
        }
        Ok(chain.unwrap_or(first))
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_term()?;

        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.consume();
                    let right = self.parse_term()?;
                    left = Expr::binary(left, '+', right);
                }
                Token::Minus => {
                    self.consume();
                    let right = self.parse_term()?;
                    left = Expr::binary(left, '-', right);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = Expr::binary(left, '*', right);
                }
                Token::Slash => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = Expr::binary(left, '/', right);
                }
                Token::Number(_) | Token::Identifier(_) | Token::LParen => {
                    let right = self.parse_power()?;
                    left = Expr::binary(left, '*', right);
                }
                // Inside |...| a bar closes the group; outside it opens a new one.
                Token::Bar if self.abs_depth == 0 => {
                    let right = self.parse_power()?;
                    left = Expr::binary(left, '*', right);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let operand = self.parse_unary()?;
                Ok(match operand {
                    Expr::Number(n) => Expr::Number(-n),
                    other => Expr::neg(other),
                })
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, String> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::binary(base, '^', exponent));
        }
        Ok(base)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.consume();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            match self.consume() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err("Expected ')'".to_string()),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume(); // eat '('
                    let args = self.parse_arguments()?;
                    if let Some(kind) = reduce_kind(&name) {
                        return build_reduce(kind, args);
                    }
                    return Ok(Expr::Call(name, args));
                }
                if builtin_arity(&name) == Some(1) {
                    // `sin x`, `ln 2x` without parentheses.
                    let arg = self.parse_power()?;
                    return Ok(Expr::Call(name, vec![arg]));
                }
                Ok(Expr::Variable(name))
            }
            Some(Token::LParen) => {
                let saved_depth = self.abs_depth;
                self.abs_depth = 0;
                let expr = self.parse_list()?;
                self.abs_depth = saved_depth;
                self.expect(Token::RParen, "Expected ')'")?;
                Ok(expr)
            }
            Some(Token::Bar) => {
                self.abs_depth += 1;
                let inner = self.parse_expression()?;
                self.abs_depth -= 1;
                self.expect(Token::Bar, "Expected closing '|'")?;
                Ok(Expr::call("abs", inner))
            }
            Some(token) => Err(format!("Unexpected token {token:?}")),
            None => Err("Unexpected end of input".to_string()),
        }
    }
}

fn build_reduce(kind: ReduceKind, args: Vec<Expr>) -> Result<Expr, String> {
    if args.len() != 4 {
        return Err(format!(
            "Malformed bounds: expected (body, index, lower, upper), got {} arguments",
            args.len()
        ));
    }
    let mut args = args.into_iter();
    let (Some(body), Some(index), Some(lower), Some(upper)) =
        (args.next(), args.next(), args.next(), args.next())
    else {
        return Err("Malformed bounds".to_string());
    };
    let Expr::Variable(index) = index else {
        return Err("Malformed bounds: index must be a variable name".to_string());
    };
    Ok(Expr::Reduce {
        kind,
        body: Box::new(body),
        index,
        lower: Box::new(lower),
        upper: Box::new(upper),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let expr = parse("-x^2").expect("should parse");
        assert_eq!(
            expr,
            Expr::neg(Expr::binary(Expr::var("x"), '^', Expr::number(2.0)))
        );
    }

    #[test]
    fn power_is_right_associative() {
        let expr = parse("2^3^2").expect("should parse");
        assert_eq!(
            expr,
            Expr::binary(
                Expr::number(2.0),
                '^',
                Expr::binary(Expr::number(3.0), '^', Expr::number(2.0))
            )
        );
    }

    #[test]
    fn implicit_multiplication_forms() {
        assert_eq!(
            parse("2x").expect("should parse"),
            Expr::binary(Expr::number(2.0), '*', Expr::var("x"))
        );
        let product = parse("(x+1)(x-1)").expect("should parse");
        assert!(matches!(product, Expr::Binary(_, '*', _)));
        let scaled = parse("3sin(x)").expect("should parse");
        assert_eq!(
            scaled,
            Expr::binary(Expr::number(3.0), '*', Expr::call("sin", Expr::var("x")))
        );
    }

    #[test]
    fn absolute_value_bars_nest_with_implicit_products() {
        let expr = parse("2|x - 1|").expect("should parse");
        assert_eq!(
            expr,
            Expr::binary(
                Expr::number(2.0),
                '*',
                Expr::call("abs", Expr::binary(Expr::var("x"), '-', Expr::number(1.0)))
            )
        );
    }

    #[test]
    fn chained_comparison_becomes_conjunction() {
        let expr = parse("-1 < x < 1").expect("should parse");
        assert!(matches!(expr, Expr::And(_, _)), "got {expr:?}");
    }

    #[test]
    fn equation_with_restriction() {
        let equation = parse_equation("y = x^2 {x > 0}").expect("should parse");
        assert_eq!(equation.lhs, Expr::var("y"));
        assert!(equation.relation.is_some());
        assert!(equation.restriction.is_some());
    }

    #[test]
    fn bare_inequality_is_a_relation() {
        let equation = parse_equation("y < x^2").expect("should parse");
        assert!(matches!(equation.relation, Some((Relation::Lt, _))));
    }

    #[test]
    fn sum_requires_four_arguments() {
        assert!(parse("sum(i, i, 1)").is_err());
        let expr = parse("sum(i^2, i, 1, 3)").expect("should parse");
        assert!(matches!(expr, Expr::Reduce { .. }));
    }

    #[test]
    fn scientific_notation_is_one_number() {
        assert_eq!(parse("1e-3").expect("should parse"), Expr::number(1e-3));
        assert_eq!(parse("2.5E4").expect("should parse"), Expr::number(2.5e4));
        assert_eq!(
            parse("2e").expect("should parse"),
            Expr::binary(Expr::number(2.0), '*', Expr::var("e"))
        );
        assert_eq!(
            parse("3e-x").expect("should parse"),
            Expr::binary(
                Expr::binary(Expr::number(3.0), '*', Expr::var("e")),
                '-',
                Expr::var("x")
            )
        );
    }

    #[test]
    fn unbalanced_parentheses_fail() {
        assert!(parse("(x + 1").is_err());
        assert!(parse("x + 1)").is_err());
        assert!(parse("|x").is_err());
    }

    #[test]
    fn sum_index_is_not_free() {
        let expr = parse("sum(a*i, i, 1, n)").expect("should parse");
        let free: Vec<String> = expr.free_variables().into_iter().collect();
        assert_eq!(free, vec!["a".to_string(), "n".to_string()]);
    }
}
