//! The built-in [`CasBackend`]: works on the parsed tree instead of the rule
//! table's term-at-a-time view.

use super::rules::{integrate_term, slope, split_terms, strip_coefficient};
use super::simplify::{add, call, div, mul, neg, pow, render, sub};
use super::{numeric_value, parse_plain, render_terms, Antiderivative, CasBackend, Term};
use crate::equation_engine::parser::{builtin_arity, Expr};
use crate::error::EngineError;
use anyhow::{bail, Result};
use std::f64::consts::E;

/// Polynomials above this degree are not expanded.
const MAX_DEGREE: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeBackend;

impl CasBackend for TreeBackend {
    fn name(&self) -> &str {
        "tree"
    }

    fn integrate(&self, expression: &str, variable: &str) -> Result<Antiderivative> {
        let expr = parse_plain(expression)?;
        let mut steps = Vec::new();
        if let Some(coefficients) = polynomial(&expr, variable) {
            steps.push(format!(
                "Expanded: {}",
                render_terms(&polynomial_terms(&coefficients, variable))
            ));
            steps.push("Power rule on each monomial".to_string());
            let integral = integrate_polynomial(&coefficients);
            return Ok(Antiderivative {
                expression: render_terms(&polynomial_terms(&integral, variable)),
                steps,
            });
        }

        let mut terms = Vec::new();
        for (sign, term) in split_terms(&expr) {
            let (coefficient, body) = strip_coefficient(&term);
            let scale = sign * coefficient;
            if let Some(coefficients) = polynomial(&body, variable) {
                steps.push(format!("Power rule on expanded {}", render(&body)));
                let integral = integrate_polynomial(&coefficients);
                terms.extend(
                    polynomial_terms(&integral, variable)
                        .into_iter()
                        .map(|term| term.scaled(scale)),
                );
            } else if let Some((rule, antiderivative)) = integrate_term(&body, variable) {
                steps.push(format!("{}: ∫{} d{variable}", rule.name(), render(&body)));
                terms.push(antiderivative.scaled(scale));
            } else if let Some(parts) = by_parts(&body, variable) {
                steps.push(format!("Integration by parts: ∫{} d{variable}", render(&body)));
                terms.extend(parts.into_iter().map(|term| term.scaled(scale)));
            } else {
                bail!("no rule applies to `{}`", render(&body));
            }
        }
        Ok(Antiderivative {
            expression: render_terms(&merge_like_terms(terms)),
            steps,
        })
    }

    fn differentiate(&self, expression: &str, variable: &str) -> Result<String> {
        let expr = parse_plain(expression)?;
        let derivative = derivative(&expr, variable)?;
        Ok(match polynomial(&derivative, variable) {
            Some(coefficients) => render_terms(&polynomial_terms(&coefficients, variable)),
            None => render(&derivative),
        })
    }
}

// --- Polynomials ---

fn poly_add(a: &[f64], b: &[f64], sign: f64) -> Vec<f64> {
    let mut out = vec![0.0; a.len().max(b.len())];
    for (i, value) in a.iter().enumerate() {
        out[i] += value;
    }
    for (i, value) in b.iter().enumerate() {
        out[i] += sign * value;
    }
    out
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Ascending coefficients when `expr` is a polynomial in `var` with numeric
/// coefficients. Products and integer powers are expanded.
pub(crate) fn polynomial(expr: &Expr, var: &str) -> Option<Vec<f64>> {
    if let Some(value) = numeric_value(expr) {
        return Some(vec![value]);
    }
    let coefficients = match expr {
        Expr::Variable(name) if name == var => vec![0.0, 1.0],
        Expr::Unary('-', inner) => polynomial(inner, var)?.iter().map(|c| -c).collect(),
        Expr::Binary(left, op @ ('+' | '-'), right) => {
            let sign = if *op == '+' { 1.0 } else { -1.0 };
            poly_add(&polynomial(left, var)?, &polynomial(right, var)?, sign)
        }
        Expr::Binary(left, '*', right) => poly_mul(&polynomial(left, var)?, &polynomial(right, var)?),
        Expr::Binary(left, '/', right) => {
            let k = numeric_value(right).filter(|k| *k != 0.0)?;
            polynomial(left, var)?.iter().map(|c| c / k).collect()
        }
        Expr::Binary(base, '^', exponent) => {
            let n = numeric_value(exponent)?;
            if n < 0.0 || n.fract() != 0.0 || n > MAX_DEGREE as f64 {
                return None;
            }
            let base = polynomial(base, var)?;
            if (base.len().saturating_sub(1)) * n as usize > MAX_DEGREE {
                return None;
            }
            (0..n as usize).fold(vec![1.0], |acc, _| poly_mul(&acc, &base))
        }
        _ => return None,
    };
    (coefficients.len() <= MAX_DEGREE + 1).then_some(coefficients)
}

fn monomial(var: &str, degree: usize) -> Expr {
    match degree {
        0 => Expr::Number(1.0),
        1 => Expr::var(var),
        k => pow(Expr::var(var), Expr::Number(k as f64)),
    }
}

/// Terms from the highest degree down, zeros dropped.
pub(crate) fn polynomial_terms(coefficients: &[f64], var: &str) -> Vec<Term> {
    coefficients
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, c)| **c != 0.0)
        .map(|(k, c)| Term::new(*c, monomial(var, k)))
        .collect()
}

fn integrate_polynomial(coefficients: &[f64]) -> Vec<f64> {
    std::iter::once(0.0)
        .chain(
            coefficients
                .iter()
                .enumerate()
                .map(|(k, c)| c / (k + 1) as f64),
        )
        .collect()
}

fn derivative_coefficients(coefficients: &[f64]) -> Vec<f64> {
    coefficients
        .iter()
        .enumerate()
        .skip(1)
        .map(|(k, c)| c * k as f64)
        .collect()
}

fn merge_like_terms(terms: Vec<Term>) -> Vec<Term> {
    let mut merged: Vec<Term> = Vec::with_capacity(terms.len());
    for term in terms {
        match merged.iter_mut().find(|existing| existing.body == term.body) {
            Some(existing) => existing.coefficient += term.coefficient,
            None => merged.push(term),
        }
    }
    merged
}

// --- Integration by parts ---

/// Factors whose repeated antiderivatives cycle: `e^u`, `sin u`, `cos u`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cyclic {
    Exp,
    Sin,
    Cos,
}

fn cyclic_factor<'e>(expr: &'e Expr, var: &str) -> Option<(Cyclic, &'e Expr, f64)> {
    let (kind, u) = match expr {
        Expr::Call(name, args) if args.len() == 1 => {
            let kind = match name.as_str() {
                "exp" => Cyclic::Exp,
                "sin" => Cyclic::Sin,
                "cos" => Cyclic::Cos,
                _ => return None,
            };
            (kind, &args[0])
        }
        Expr::Binary(base, '^', exponent) if numeric_value(base) == Some(E) => {
            (Cyclic::Exp, exponent.as_ref())
        }
        _ => return None,
    };
    Some((kind, u, slope(u, var)?))
}

/// The `m`-th repeated antiderivative of a cyclic factor as `(coefficient, body)`.
fn repeated_antiderivative(kind: Cyclic, u: &Expr, a: f64, m: usize) -> (f64, Expr) {
    let scale = a.powi(-(m as i32));
    let sin = || call("sin", u.clone());
    let cos = || call("cos", u.clone());
    match (kind, m % 4) {
        (Cyclic::Exp, _) => (scale, pow(Expr::var("e"), u.clone())),
        (Cyclic::Sin, 1) => (-scale, cos()),
        (Cyclic::Sin, 2) => (-scale, sin()),
        (Cyclic::Sin, 3) => (scale, cos()),
        (Cyclic::Sin, _) => (scale, sin()),
        (Cyclic::Cos, 1) => (scale, sin()),
        (Cyclic::Cos, 2) => (-scale, cos()),
        (Cyclic::Cos, 3) => (-scale, sin()),
        (Cyclic::Cos, _) => (scale, cos()),
    }
}

/// Tabular integration of `P(x) * g(a*x + b)` for polynomial `P` and cyclic `g`.
fn by_parts(body: &Expr, var: &str) -> Option<Vec<Term>> {
    let Expr::Binary(left, '*', right) = body else {
        return None;
    };
    let (coefficients, (kind, u, a)) = match (polynomial(left, var), cyclic_factor(right, var)) {
        (Some(p), Some(factor)) => (p, factor),
        _ => (polynomial(right, var)?, cyclic_factor(left, var)?),
    };
    let mut terms = Vec::new();
    let mut current = coefficients;
    let mut sign = 1.0;
    let mut m = 1;
    while current.iter().any(|c| *c != 0.0) {
        let (scale, g) = repeated_antiderivative(kind, u, a, m);
        for (j, c) in current.iter().enumerate().rev() {
            if *c != 0.0 {
                terms.push(Term::new(sign * c * scale, mul(monomial(var, j), g.clone())));
            }
        }
        current = derivative_coefficients(&current);
        sign = -sign;
        m += 1;
    }
    Some(merge_like_terms(terms))
}

// --- Differentiation ---

/// Symbolic derivative of `expr` with respect to `var`.
pub(crate) fn derivative(expr: &Expr, var: &str) -> Result<Expr> {
    Ok(match expr {
        Expr::Number(_) => Expr::Number(0.0),
        Expr::Variable(name) => Expr::Number(if name == var { 1.0 } else { 0.0 }),
        Expr::Unary('-', inner) => neg(derivative(inner, var)?),
        Expr::Binary(left, op, right) => {
            let dl = derivative(left, var)?;
            let dr = derivative(right, var)?;
            let (u, v) = (left.as_ref().clone(), right.as_ref().clone());
            match op {
                '+' => add(dl, dr),
                '-' => sub(dl, dr),
                '*' => add(mul(dl, v), mul(u, dr)),
                '/' if !right.mentions(var) => div(dl, v),
                '/' => div(
                    sub(mul(dl, v.clone()), mul(u, dr)),
                    pow(v, Expr::Number(2.0)),
                ),
                '^' => power_derivative(expr, u, v, dl, dr, var),
                other => bail!("Cannot differentiate operator `{other}`"),
            }
        }
        // `a(x + 1)` with an unknown single-letter name is a product.
        Expr::Call(name, args)
            if args.len() == 1 && name.chars().count() == 1 && builtin_arity(name).is_none() =>
        {
            derivative(&Expr::binary(Expr::var(name), '*', args[0].clone()), var)?
        }
        Expr::Call(name, args) => call_derivative(name, args, var)?,
        other => bail!("Cannot differentiate `{other}`"),
    })
}

fn power_derivative(expr: &Expr, base: Expr, exponent: Expr, db: Expr, de: Expr, var: &str) -> Expr {
    if !exponent.mentions(var) {
        let reduced = sub(exponent.clone(), Expr::Number(1.0));
        return mul(mul(exponent, pow(base, reduced)), db);
    }
    if !base.mentions(var) {
        let log_base = if numeric_value(&base) == Some(E) {
            Expr::Number(1.0)
        } else {
            call("ln", base)
        };
        return mul(mul(log_base, expr.clone()), de);
    }
    // d(u^v) = u^v (v' ln u + v u' / u)
    let inner = add(
        mul(de, call("ln", base.clone())),
        div(mul(exponent, db), base),
    );
    mul(expr.clone(), inner)
}

fn call_derivative(name: &str, args: &[Expr], var: &str) -> Result<Expr> {
    if !args.iter().any(|arg| arg.mentions(var)) {
        return Ok(Expr::Number(0.0));
    }
    let [u] = args else {
        bail!("Cannot differentiate `{name}` with {} arguments", args.len());
    };
    let du = derivative(u, var)?;
    let u = u.clone();
    let one = || Expr::Number(1.0);
    let square = |e: Expr| pow(e, Expr::Number(2.0));
    let outer = match name {
        "sin" => call("cos", u),
        "cos" => neg(call("sin", u)),
        "tan" => square(call("sec", u)),
        "sec" => mul(call("sec", u.clone()), call("tan", u)),
        "csc" => neg(mul(call("csc", u.clone()), call("cot", u))),
        "cot" => neg(square(call("csc", u))),
        "asin" | "arcsin" => div(one(), call("sqrt", sub(one(), square(u)))),
        "acos" | "arccos" => neg(div(one(), call("sqrt", sub(one(), square(u))))),
        "atan" | "arctan" => div(one(), add(one(), square(u))),
        "sinh" => call("cosh", u),
        "cosh" => call("sinh", u),
        "tanh" => sub(one(), square(call("tanh", u))),
        "sqrt" => div(one(), mul(Expr::Number(2.0), call("sqrt", u))),
        "cbrt" => div(one(), mul(Expr::Number(3.0), square(call("cbrt", u)))),
        "exp" => call("exp", u),
        "ln" | "log" => div(one(), u),
        "log10" => div(one(), mul(u, call("ln", Expr::Number(10.0)))),
        "log2" => div(one(), mul(u, call("ln", Expr::Number(2.0)))),
        "abs" => call("sign", u),
        "floor" | "ceil" | "round" | "sign" => Expr::Number(0.0),
        other => return Err(EngineError::UnknownFunction(other.to_string()).into()),
    };
    Ok(mul(outer, du))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation_engine::parser::parse;

    fn expr(source: &str) -> Expr {
        parse(source).expect("test expression should parse")
    }

    #[test]
    fn products_expand_to_polynomials() {
        assert_eq!(polynomial(&expr("(x + 1)*(x - 1)"), "x"), Some(vec![-1.0, 0.0, 1.0]));
        assert_eq!(
            polynomial(&expr("(x + 1)^3"), "x"),
            Some(vec![1.0, 3.0, 3.0, 1.0])
        );
        assert_eq!(polynomial(&expr("x^2/2"), "x"), Some(vec![0.0, 0.0, 0.5]));
        assert_eq!(polynomial(&expr("a*x"), "x"), None);
        assert_eq!(polynomial(&expr("sqrt(x)"), "x"), None);
    }

    #[test]
    fn backend_integrates_expanded_products() {
        let result = TreeBackend
            .integrate("(x + 1)*(x - 1)", "x")
            .expect("polynomial should integrate");
        assert_eq!(result.expression, "x^3/3 - x");
    }

    #[test]
    fn tabular_parts_for_polynomial_times_exponential() {
        let result = TreeBackend
            .integrate("x*e^x", "x")
            .expect("by parts should apply");
        assert_eq!(result.expression, "x*e^x - e^x");
        let result = TreeBackend
            .integrate("x*sin(x)", "x")
            .expect("by parts should apply");
        assert_eq!(result.expression, "-x*cos(x) + sin(x)");
    }

    #[test]
    fn backend_reports_unsupported_terms() {
        assert!(TreeBackend.integrate("sin(x^2)", "x").is_err());
    }

    #[test]
    fn derivatives_use_chain_rule() {
        assert_eq!(
            TreeBackend.differentiate("3*x^2 + 2*x + 1", "x").expect("differentiates"),
            "6*x + 2"
        );
        assert_eq!(
            TreeBackend.differentiate("sin(2*x)", "x").expect("differentiates"),
            "2*cos(2*x)"
        );
        assert_eq!(
            TreeBackend.differentiate("ln(x)", "x").expect("differentiates"),
            "1/x"
        );
    }

    #[test]
    fn unknown_functions_cannot_be_differentiated() {
        assert!(TreeBackend.differentiate("foo(x)", "x").is_err());
        assert_eq!(
            TreeBackend.differentiate("foo(2)", "x").expect("constant call"),
            "0"
        );
        // A single-letter call is a product, as in the compiler.
        assert_eq!(
            TreeBackend.differentiate("a(x + 1)", "x").expect("product"),
            "a"
        );
    }
}
