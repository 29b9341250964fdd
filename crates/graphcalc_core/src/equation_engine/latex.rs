//! LaTeX front end.
//!
//! LaTeX source is lowered to the plain-text grammar and then parsed by
//! [`super::parser`]. Single letters are separate variables, so `xy` lowers to
//! `x y` (an implicit product).

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
enum TexToken {
    Command(String),
    Char(char),
    Open,
    Close,
    Caret,
    Underscore,
}

/// Rewrites macro synonyms to their canonical spelling.
fn canonical_command(name: &str) -> &str {
    match name {
        "dfrac" | "tfrac" | "cfrac" => "frac",
        "neq" => "ne",
        "leq" | "leqslant" => "le",
        "geq" | "geqslant" => "ge",
        "arcsin" => "asin",
        "arccos" => "acos",
        "arctan" => "atan",
        "lvert" | "rvert" | "vert" | "mid" => "|",
        other => other,
    }
}

fn lex(source: &str) -> Result<Vec<TexToken>, EngineError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut depth = 0i32;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphabetic() {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    match chars.next() {
                        // `\{`, `\}` delimit a domain restriction.
                        Some('{') => tokens.push(TexToken::Char('{')),
                        Some('}') => tokens.push(TexToken::Char('}')),
                        Some('|') => tokens.push(TexToken::Char('|')),
                        Some(',' | ';' | ':' | '!' | ' ') => {}
                        Some(other) => return Err(EngineError::UnknownMacro(other.to_string())),
                        None => return Err(EngineError::parse(source, "Dangling backslash")),
                    }
                } else {
                    let canonical = canonical_command(&name);
                    if canonical == "|" {
                        tokens.push(TexToken::Char('|'));
                    } else {
                        tokens.push(TexToken::Command(canonical.to_string()));
                    }
                }
            }
            '{' => {
                depth += 1;
                tokens.push(TexToken::Open);
            }
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(EngineError::parse(source, "Unbalanced braces"));
                }
                tokens.push(TexToken::Close);
            }
            '^' => tokens.push(TexToken::Caret),
            '_' => tokens.push(TexToken::Underscore),
            c if c.is_whitespace() => {}
            c => tokens.push(TexToken::Char(c)),
        }
    }
    if depth != 0 {
        return Err(EngineError::parse(source, "Unbalanced braces"));
    }
    Ok(tokens)
}

const FUNCTION_MACROS: &[&str] = &[
    "sin", "cos", "tan", "sec", "csc", "cot", "asin", "acos", "atan", "sinh", "cosh", "tanh",
    "exp", "ln",
];

const SYMBOL_MACROS: &[&str] = &[
    "pi", "theta", "tau", "alpha", "beta", "gamma", "delta", "lambda", "mu", "sigma", "phi",
    "omega", "rho",
];

/// Lowers LaTeX to the plain-text grammar.
pub fn latex_to_plain(source: &str) -> Result<String, EngineError> {
    let tokens = lex(source)?;
    let mut lowering = Lowering {
        source,
        tokens,
        pos: 0,
    };
    let out = lowering.sequence(Stop::End)?;
    if lowering.pos < lowering.tokens.len() {
        return Err(EngineError::parse(source, "Unexpected trailing input"));
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stop {
    /// Consume to the end of input.
    End,
    /// Stop before the closing brace of the current group.
    Group,
    /// Stop before a top-level `+`, `-`, relation, comma or closing delimiter.
    Term,
    /// Stop before the differential `d<letter>` of an integral.
    Differential,
}

struct Lowering<'a> {
    source: &'a str,
    tokens: Vec<TexToken>,
    pos: usize,
}

impl Lowering<'_> {
    fn error(&self, message: &str) -> EngineError {
        EngineError::parse(self.source, message)
    }

    fn peek(&self) -> Option<&TexToken> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&TexToken> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<TexToken> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_stop(&self, stop: Stop, paren_depth: i32) -> bool {
        match (stop, self.peek()) {
            (_, None) => true,
            (Stop::End, _) => false,
            (_, Some(TexToken::Close)) => true,
            (Stop::Group, _) => false,
            (Stop::Term, Some(TexToken::Char(c))) => {
                paren_depth == 0 && matches!(c, '+' | '-' | '=' | '<' | '>' | ',' | ')' | ']')
            }
            (Stop::Term, Some(TexToken::Command(name))) => {
                paren_depth == 0 && matches!(name.as_str(), "pm" | "le" | "ge" | "ne" | "lt" | "gt")
            }
            (Stop::Differential, Some(TexToken::Char('d'))) => {
                paren_depth == 0 && matches!(self.peek_at(1), Some(TexToken::Char(c)) if c.is_alphabetic())
            }
            _ => false,
        }
    }

    fn sequence(&mut self, stop: Stop) -> Result<String, EngineError> {
        let mut out = String::new();
        let mut paren_depth = 0i32;
        while !self.at_stop(stop, paren_depth) {
            if let Some(TexToken::Char(c)) = self.peek() {
                match c {
                    '(' | '[' => paren_depth += 1,
                    ')' | ']' => paren_depth -= 1,
                    _ => {}
                }
            }
            let piece = self.atom()?;
            out.push_str(&piece);
        }
        Ok(out)
    }

    /// `{...}` → `(...)`; otherwise a single atom.
    fn argument(&mut self) -> Result<String, EngineError> {
        match self.peek() {
            Some(TexToken::Open) => {
                self.next();
                let inner = self.sequence(Stop::Group)?;
                self.expect_close()?;
                Ok(format!("({inner})"))
            }
            Some(_) => self.atom(),
            None => Err(self.error("Missing argument")),
        }
    }

    fn raw_group(&mut self) -> Result<String, EngineError> {
        match self.peek() {
            Some(TexToken::Open) => {
                self.next();
                let inner = self.sequence(Stop::Group)?;
                self.expect_close()?;
                Ok(inner)
            }
            Some(_) => self.atom(),
            None => Err(self.error("Missing argument")),
        }
    }

    fn expect_close(&mut self) -> Result<(), EngineError> {
        match self.next() {
            Some(TexToken::Close) => Ok(()),
            _ => Err(self.error("Unbalanced braces")),
        }
    }

    /// Operand of `\sin` and friends: a parenthesised group, a brace group, or a
    /// run of letters, digits and symbols such as `2x` or `\pi t`.
    fn function_operand(&mut self) -> Result<String, EngineError> {
        let opens_paren = matches!(self.peek(), Some(TexToken::Char('(')))
            || matches!(self.peek(), Some(TexToken::Command(name)) if name == "left");
        if opens_paren {
            return self.parenthesised();
        }
        match self.peek() {
            Some(TexToken::Open) => self.argument(),
            _ => {
                let mut out = String::new();
                while let Some(token) = self.peek() {
                    let accept = match token {
                        TexToken::Char(c) => c.is_alphanumeric() || *c == '.',
                        TexToken::Command(name) => SYMBOL_MACROS.contains(&name.as_str()),
                        TexToken::Caret | TexToken::Underscore => !out.is_empty(),
                        _ => false,
                    };
                    if !accept {
                        break;
                    }
                    out.push_str(&self.atom()?);
                }
                if out.is_empty() {
                    return Err(self.error("Missing function argument"));
                }
                Ok(format!("({out})"))
            }
        }
    }

    /// A `(...)` or `\left( ... \right)` group, returned with parentheses.
    fn parenthesised(&mut self) -> Result<String, EngineError> {
        if matches!(self.peek(), Some(TexToken::Command(name)) if name == "left") {
            self.next();
        }
        match self.next() {
            Some(TexToken::Char('(')) => {}
            _ => return Err(self.error("Expected '('")),
        }
        let mut out = String::from("(");
        let mut depth = 1;
        loop {
            match self.peek() {
                None => return Err(self.error("Unbalanced parentheses")),
                Some(TexToken::Command(name)) if name == "right" => {
                    self.next();
                }
                Some(TexToken::Char(')')) if depth == 1 => {
                    self.next();
                    out.push(')');
                    return Ok(out);
                }
                Some(TexToken::Char(c)) => {
                    match c {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    out.push_str(&self.atom()?);
                }
                Some(_) => out.push_str(&self.atom()?),
            }
        }
    }

    /// `_{i=1}^{n}` bounds of `\sum` / `\prod`.
    fn reduction_bounds(&mut self) -> Result<(String, String, String), EngineError> {
        if self.next() != Some(TexToken::Underscore) {
            return Err(self.error("Malformed bounds: expected _{index=lower}"));
        }
        let lower = self.raw_group()?;
        let Some((index, lower)) = lower.split_once('=') else {
            return Err(self.error("Malformed bounds: expected index=lower"));
        };
        let index = index.trim().to_string();
        if index.is_empty() || !index.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(self.error("Malformed bounds: index must be a name"));
        }
        if self.next() != Some(TexToken::Caret) {
            return Err(self.error("Malformed bounds: expected ^{upper}"));
        }
        let upper = self.raw_group()?;
        if lower.trim().is_empty() || upper.trim().is_empty() {
            return Err(self.error("Malformed bounds: empty bound"));
        }
        Ok((index, lower.trim().to_string(), upper))
    }

    fn reduction_body(&mut self) -> Result<String, EngineError> {
        let body = match self.peek() {
            Some(TexToken::Open) => self.argument()?,
            _ => self.sequence(Stop::Term)?,
        };
        if body.trim().is_empty() {
            return Err(self.error("Missing summand"));
        }
        Ok(body)
    }

    fn command(&mut self, name: &str) -> Result<String, EngineError> {
        match name {
            "frac" => {
                let numerator = self.argument()?;
                let denominator = self.argument()?;
                Ok(format!(" ({numerator}/{denominator}) "))
            }
            "sqrt" => {
                if let Some(TexToken::Char('[')) = self.peek() {
                    self.next();
                    let mut index = String::new();
                    loop {
                        match self.next() {
                            Some(TexToken::Char(']')) => break,
                            Some(TexToken::Char(c)) => index.push(c),
                            _ => return Err(self.error("Malformed root index")),
                        }
                    }
                    let radicand = self.argument()?;
                    Ok(format!(" nroot({radicand}, {index}) "))
                } else {
                    let radicand = self.argument()?;
                    Ok(format!(" sqrt{radicand} "))
                }
            }
            "log" => {
                if let Some(TexToken::Underscore) = self.peek() {
                    self.next();
                    let base = self.argument()?;
                    let operand = self.function_operand()?;
                    Ok(format!(" logbase({operand}, {base}) "))
                } else {
                    let operand = self.function_operand()?;
                    Ok(format!(" log10{operand} "))
                }
            }
            "sum" | "prod" => {
                let (index, lower, upper) = self.reduction_bounds()?;
                let body = self.reduction_body()?;
                Ok(format!(" {name}({body}, {index}, {lower}, {upper}) "))
            }
            "int" => {
                let (lower, upper) = if let Some(TexToken::Underscore) = self.peek() {
                    self.next();
                    let lower = self.raw_group()?;
                    if self.next() != Some(TexToken::Caret) {
                        return Err(self.error("Malformed bounds: expected ^{upper}"));
                    }
                    (lower, self.raw_group()?)
                } else {
                    return Err(self.error("Only definite integrals can be evaluated"));
                };
                let body = self.sequence(Stop::Differential)?;
                match (self.next(), self.next()) {
                    (Some(TexToken::Char('d')), Some(TexToken::Char(var))) => {
                        Ok(format!(" integral({body}, {var}, {lower}, {upper}) "))
                    }
                    _ => Err(self.error("Integral is missing its differential")),
                }
            }
            "operatorname" => {
                let function = self.raw_group()?;
                let function: String = function.chars().filter(|c| !c.is_whitespace()).collect();
                let operand = self.function_operand()?;
                Ok(format!(" {function}{operand} "))
            }
            "left" | "right" | "displaystyle" => Ok(String::new()),
            "cdot" | "times" | "ast" => Ok("*".to_string()),
            "div" => Ok("/".to_string()),
            // The principal branch of ± is plotted.
            "pm" => Ok("+".to_string()),
            "le" => Ok("<=".to_string()),
            "ge" => Ok(">=".to_string()),
            "lt" => Ok("<".to_string()),
            "gt" => Ok(">".to_string()),
            "ne" => Ok("!=".to_string()),
            "infty" => Ok(" inf ".to_string()),
            "quad" | "qquad" => Ok(String::new()),
            symbol if SYMBOL_MACROS.contains(&symbol) => Ok(format!(" {symbol} ")),
            function if FUNCTION_MACROS.contains(&function) => {
                let mut power = None;
                if let Some(TexToken::Caret) = self.peek() {
                    self.next();
                    power = Some(self.raw_group()?);
                }
                let operand = self.function_operand()?;
                match power.as_deref().map(str::trim) {
                    Some("-1") => {
                        let inverse = match function {
                            "sin" => "asin",
                            "cos" => "acos",
                            "tan" => "atan",
                            _ => return Err(self.error("Unsupported inverse function")),
                        };
                        Ok(format!(" {inverse}{operand} "))
                    }
                    Some(power) => Ok(format!(" ({function}{operand})^({power}) ")),
                    None => Ok(format!(" {function}{operand} ")),
                }
            }
            unknown => Err(EngineError::UnknownMacro(unknown.to_string())),
        }
    }

    fn atom(&mut self) -> Result<String, EngineError> {
        let Some(token) = self.next() else {
            return Err(self.error("Unexpected end of input"));
        };
        match token {
            TexToken::Command(name) => self.command(&name),
            TexToken::Open => {
                let inner = self.sequence(Stop::Group)?;
                self.expect_close()?;
                Ok(format!("({inner})"))
            }
            TexToken::Close => Err(self.error("Unbalanced braces")),
            TexToken::Caret => {
                let exponent = self.argument()?;
                Ok(format!("^{exponent}"))
            }
            TexToken::Underscore => Err(self.error("Unexpected subscript")),
            TexToken::Char(c) if c.is_alphabetic() => {
                // Subscripted names such as `x_1` or `a_{max}` stay one identifier.
                if let Some(TexToken::Underscore) = self.peek() {
                    self.next();
                    let subscript: String = self
                        .raw_group()?
                        .chars()
                        .filter(|c| c.is_alphanumeric())
                        .collect();
                    return Ok(format!(" {c}_{subscript} "));
                }
                Ok(format!(" {c} "))
            }
            TexToken::Char(c) => Ok(c.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squash(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn fraction_and_root() {
        let plain = latex_to_plain(r"\frac{1}{2}\sqrt{x}").expect("should lower");
        assert_eq!(squash(&plain), "((1)/(2)) sqrt( x )");
    }

    #[test]
    fn synonyms_are_normalised() {
        let a = latex_to_plain(r"\dfrac{x}{2}").expect("should lower");
        let b = latex_to_plain(r"\frac{x}{2}").expect("should lower");
        assert_eq!(a, b);
        let ne = latex_to_plain(r"x \neq 1").expect("should lower");
        assert!(ne.contains("!="));
    }

    #[test]
    fn adjacent_letters_are_separate_variables() {
        let plain = latex_to_plain("xy").expect("should lower");
        assert_eq!(squash(&plain), "x y");
    }

    #[test]
    fn sum_lowers_to_reduction_call() {
        let plain = latex_to_plain(r"\sum_{i=1}^{10} i^2 + 1").expect("should lower");
        assert_eq!(squash(&plain), "sum( i ^2, i, 1, 10) + 1");
    }

    #[test]
    fn malformed_sum_bounds_fail() {
        assert!(latex_to_plain(r"\sum^{10} i").is_err());
        assert!(latex_to_plain(r"\sum_{1}^{10} i").is_err());
    }

    #[test]
    fn unknown_macro_fails() {
        let err = latex_to_plain(r"\foo{x}").expect_err("unknown macro should fail");
        assert_eq!(err, EngineError::UnknownMacro("foo".to_string()));
    }

    #[test]
    fn unbalanced_braces_fail() {
        assert!(latex_to_plain(r"\frac{1}{2").is_err());
        assert!(latex_to_plain(r"x}").is_err());
    }

    #[test]
    fn trig_without_parentheses() {
        let plain = latex_to_plain(r"\sin 2x").expect("should lower");
        assert_eq!(squash(&plain), "sin(2 x )");
    }
}
