//! The elementary integration table.
//!
//! Each additive term has its numeric coefficient split off and its body
//! matched against the rules below in order. Inner arguments must be affine in
//! the integration variable (`a*x + b` with numeric `a`, `b`); anything else
//! is left to the backend.

use super::simplify::{call, mul, number, pow, render, sub};
use super::{numeric_value, render_terms, Term};
use crate::equation_engine::parser::Expr;
use std::f64::consts::{E, LN_10, LN_2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rule {
    Constant,
    Power,
    Reciprocal,
    Exponential,
    Trigonometric,
    Hyperbolic,
    Logarithmic,
    InverseTrigonometric,
}

impl Rule {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Rule::Constant => "Power rule (n = 0)",
            Rule::Power => "Power rule",
            Rule::Reciprocal => "Power rule (n = -1)",
            Rule::Exponential => "Exponential rule",
            Rule::Trigonometric => "Trigonometric rule",
            Rule::Hyperbolic => "Hyperbolic rule",
            Rule::Logarithmic => "Logarithm rule",
            Rule::InverseTrigonometric => "Inverse trigonometric rule",
        }
    }
}

/// `(a, b)` when `expr` is `a*var + b` for numeric `a` and `b`.
pub(crate) fn affine(expr: &Expr, var: &str) -> Option<(f64, f64)> {
    if let Some(value) = numeric_value(expr) {
        return Some((0.0, value));
    }
    match expr {
        Expr::Variable(name) if name == var => Some((1.0, 0.0)),
        Expr::Unary('-', inner) => affine(inner, var).map(|(a, b)| (-a, -b)),
        Expr::Binary(left, op @ ('+' | '-'), right) => {
            let (a1, b1) = affine(left, var)?;
            let (a2, b2) = affine(right, var)?;
            let sign = if *op == '+' { 1.0 } else { -1.0 };
            Some((a1 + sign * a2, b1 + sign * b2))
        }
        Expr::Binary(left, '*', right) => {
            let (k, inner) = match numeric_value(left) {
                Some(k) => (k, right),
                None => (numeric_value(right)?, left),
            };
            affine(inner, var).map(|(a, b)| (k * a, k * b))
        }
        Expr::Binary(left, '/', right) => {
            let k = numeric_value(right).filter(|k| *k != 0.0)?;
            affine(left, var).map(|(a, b)| (a / k, b / k))
        }
        _ => None,
    }
}

/// The slope of an affine argument, when nonzero.
pub(crate) fn slope(expr: &Expr, var: &str) -> Option<f64> {
    affine(expr, var)
        .map(|(a, _)| a)
        .filter(|a| *a != 0.0 && a.is_finite())
}

/// Top-level additive terms with their signs.
pub(crate) fn split_terms(expr: &Expr) -> Vec<(f64, Expr)> {
    match expr {
        Expr::Binary(left, op @ ('+' | '-'), right) => {
            let sign = if *op == '+' { 1.0 } else { -1.0 };
            let mut terms = split_terms(left);
            terms.extend(
                split_terms(right)
                    .into_iter()
                    .map(|(inner, term)| (sign * inner, term)),
            );
            terms
        }
        Expr::Unary('-', inner) => split_terms(inner)
            .into_iter()
            .map(|(sign, term)| (-sign, term))
            .collect(),
        other => vec![(1.0, other.clone())],
    }
}

/// Splits the numeric factor off a term: `3/4*x^2` gives `(0.75, x^2)`.
pub(crate) fn strip_coefficient(expr: &Expr) -> (f64, Expr) {
    if let Some(value) = numeric_value(expr) {
        return (value, Expr::Number(1.0));
    }
    match expr {
        Expr::Unary('-', inner) => {
            let (coefficient, body) = strip_coefficient(inner);
            (-coefficient, body)
        }
        Expr::Binary(left, '*', right) => {
            let (cl, bl) = strip_coefficient(left);
            let (cr, br) = strip_coefficient(right);
            (cl * cr, mul(bl, br))
        }
        Expr::Binary(left, '/', right) => {
            let (coefficient, body) = strip_coefficient(left);
            match numeric_value(right).filter(|k| *k != 0.0) {
                Some(k) => (coefficient / k, body),
                None => (
                    coefficient,
                    Expr::binary(body, '/', right.as_ref().clone()),
                ),
            }
        }
        other => (1.0, other.clone()),
    }
}

/// `(u, n)` for bodies equal to `u^n` with affine `u`.
fn power_form<'e>(body: &'e Expr, var: &str) -> Option<(&'e Expr, f64)> {
    if slope(body, var).is_some() {
        return Some((body, 1.0));
    }
    match body {
        Expr::Binary(base, '^', exponent) => {
            let n = numeric_value(exponent)?;
            slope(base, var)?;
            Some((base.as_ref(), n))
        }
        Expr::Call(name, args) if args.len() == 1 && (name == "sqrt" || name == "cbrt") => {
            slope(&args[0], var)?;
            Some((&args[0], if name == "sqrt" { 0.5 } else { 1.0 / 3.0 }))
        }
        Expr::Binary(numerator, '/', denominator) if numeric_value(numerator) == Some(1.0) => {
            power_form(denominator, var).map(|(u, n)| (u, -n))
        }
        _ => None,
    }
}

fn exponential(body: &Expr, var: &str) -> Option<(Rule, Term)> {
    let (base, u) = match body {
        Expr::Call(name, args) if name == "exp" && args.len() == 1 => (E, &args[0]),
        Expr::Binary(base, '^', exponent) => (numeric_value(base)?, exponent.as_ref()),
        _ => return None,
    };
    if base <= 0.0 || base == 1.0 {
        return None;
    }
    let a = slope(u, var)?;
    Some((Rule::Exponential, Term::new(1.0 / (a * base.ln()), body.clone())))
}

fn trigonometric(body: &Expr, var: &str) -> Option<(Rule, Term)> {
    match body {
        Expr::Call(name, args) if args.len() == 1 => {
            let u = &args[0];
            let a = slope(u, var)?;
            let u = u.clone();
            let (rule, coefficient, result) = match name.as_str() {
                "sin" => (Rule::Trigonometric, -1.0, call("cos", u)),
                "cos" => (Rule::Trigonometric, 1.0, call("sin", u)),
                "tan" => (Rule::Trigonometric, -1.0, call("ln", call("abs", call("cos", u)))),
                "cot" => (Rule::Trigonometric, 1.0, call("ln", call("abs", call("sin", u)))),
                "sinh" => (Rule::Hyperbolic, 1.0, call("cosh", u)),
                "cosh" => (Rule::Hyperbolic, 1.0, call("sinh", u)),
                _ => return None,
            };
            Some((rule, Term::new(coefficient / a, result)))
        }
        Expr::Binary(base, '^', exponent) if numeric_value(exponent) == Some(2.0) => {
            let Expr::Call(name, args) = base.as_ref() else {
                return None;
            };
            let u = args.first().filter(|_| args.len() == 1)?;
            let a = slope(u, var)?;
            match name.as_str() {
                "sec" => Some((Rule::Trigonometric, Term::new(1.0 / a, call("tan", u.clone())))),
                "csc" => Some((Rule::Trigonometric, Term::new(-1.0 / a, call("cot", u.clone())))),
                _ => None,
            }
        }
        Expr::Binary(left, '*', right) => {
            let (Expr::Call(f, f_args), Expr::Call(g, g_args)) = (left.as_ref(), right.as_ref())
            else {
                return None;
            };
            if f_args.len() != 1 || f_args != g_args {
                return None;
            }
            let u = &f_args[0];
            let a = slope(u, var)?;
            let mut names = [f.as_str(), g.as_str()];
            names.sort_unstable();
            match names {
                ["sec", "tan"] => Some((Rule::Trigonometric, Term::new(1.0 / a, call("sec", u.clone())))),
                ["cot", "csc"] => Some((Rule::Trigonometric, Term::new(-1.0 / a, call("csc", u.clone())))),
                _ => None,
            }
        }
        _ => None,
    }
}

fn logarithmic(body: &Expr, var: &str) -> Option<(Rule, Term)> {
    let Expr::Call(name, args) = body else {
        return None;
    };
    let u = args.first().filter(|_| args.len() == 1)?;
    let scale = match name.as_str() {
        "ln" | "log" => 1.0,
        "log10" => LN_10,
        "log2" => LN_2,
        _ => return None,
    };
    let a = slope(u, var)?;
    let result = sub(mul(u.clone(), call("ln", u.clone())), u.clone());
    Some((Rule::Logarithmic, Term::new(1.0 / (a * scale), result)))
}

fn square_base(expr: &Expr) -> Option<&Expr> {
    match expr {
        Expr::Binary(base, '^', exponent) if numeric_value(exponent) == Some(2.0) => Some(base),
        _ => None,
    }
}

fn inverse_trigonometric(body: &Expr, var: &str) -> Option<(Rule, Term)> {
    let Expr::Binary(numerator, '/', denominator) = body else {
        return None;
    };
    if numeric_value(numerator) != Some(1.0) {
        return None;
    }
    let (name, u) = match denominator.as_ref() {
        // 1/sqrt(1 - u^2)
        Expr::Call(name, args) if name == "sqrt" && args.len() == 1 => match &args[0] {
            Expr::Binary(one, '-', square) if numeric_value(one) == Some(1.0) => {
                ("asin", square_base(square)?)
            }
            _ => return None,
        },
        // 1/(1 + u^2) in either order
        Expr::Binary(left, '+', right) => {
            if numeric_value(left) == Some(1.0) {
                ("atan", square_base(right)?)
            } else if numeric_value(right) == Some(1.0) {
                ("atan", square_base(left)?)
            } else {
                return None;
            }
        }
        _ => return None,
    };
    let a = slope(u, var)?;
    Some((Rule::InverseTrigonometric, Term::new(1.0 / a, call(name, u.clone()))))
}

/// Antiderivative of a coefficient-free term body.
pub(crate) fn integrate_term(body: &Expr, var: &str) -> Option<(Rule, Term)> {
    if !body.mentions(var) {
        return Some((Rule::Constant, Term::new(1.0, mul(body.clone(), Expr::var(var)))));
    }
    if let Some((u, n)) = power_form(body, var) {
        let a = slope(u, var)?;
        return Some(if n == -1.0 {
            (
                Rule::Reciprocal,
                Term::new(1.0 / a, call("ln", call("abs", u.clone()))),
            )
        } else {
            (
                Rule::Power,
                Term::new(1.0 / (a * (n + 1.0)), pow(u.clone(), number(n + 1.0))),
            )
        });
    }
    exponential(body, var)
        .or_else(|| trigonometric(body, var))
        .or_else(|| logarithmic(body, var))
        .or_else(|| inverse_trigonometric(body, var))
}

/// Integrates term by term, or `None` if any term has no matching rule.
pub(crate) fn integrate_sum(expr: &Expr, var: &str) -> Option<(Vec<Term>, Vec<String>)> {
    let mut terms = Vec::new();
    let mut steps = Vec::new();
    for (sign, term) in split_terms(expr) {
        let (coefficient, body) = strip_coefficient(&term);
        let (rule, antiderivative) = integrate_term(&body, var)?;
        steps.push(format!(
            "{}: ∫{} d{var} = {}",
            rule.name(),
            render(&body),
            render_terms(std::slice::from_ref(&antiderivative))
        ));
        terms.push(antiderivative.scaled(sign * coefficient));
    }
    Some((terms, steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation_engine::parser::parse;

    fn expr(source: &str) -> Expr {
        parse(source).expect("test expression should parse")
    }

    #[test]
    fn affine_matcher_accepts_only_linear_arguments() {
        assert_eq!(affine(&expr("2*x + 1"), "x"), Some((2.0, 1.0)));
        assert_eq!(affine(&expr("(x - 3)/2"), "x"), Some((0.5, -1.5)));
        assert_eq!(affine(&expr("-x"), "x"), Some((-1.0, -0.0)));
        assert_eq!(affine(&expr("x^2"), "x"), None);
        assert_eq!(affine(&expr("a*x"), "x"), None);
    }

    #[test]
    fn coefficients_are_stripped() {
        let (c, body) = strip_coefficient(&expr("3/4*x^2"));
        assert!((c - 0.75).abs() < 1e-15);
        assert_eq!(render(&body), "x^2");
        let (c, body) = strip_coefficient(&expr("-x/2"));
        assert_eq!(c, -0.5);
        assert_eq!(body, Expr::var("x"));
        let (c, body) = strip_coefficient(&expr("(1/2)*sin(x)"));
        assert_eq!(c, 0.5);
        assert_eq!(render(&body), "sin(x)");
    }

    #[test]
    fn unary_minus_after_caret_is_not_a_split_point() {
        let terms = split_terms(&expr("x^-2 - 3*x + 1"));
        assert_eq!(terms.len(), 3);
        assert_eq!(terms[1].0, -1.0);
    }

    #[test]
    fn rules_fire_in_order() {
        let rule = |source: &str| integrate_term(&expr(source), "x").map(|(rule, _)| rule);
        assert_eq!(rule("1"), Some(Rule::Constant));
        assert_eq!(rule("x^(1/2)"), Some(Rule::Power));
        assert_eq!(rule("1/x"), Some(Rule::Reciprocal));
        assert_eq!(rule("e^(2*x)"), Some(Rule::Exponential));
        assert_eq!(rule("sec(x)*tan(x)"), Some(Rule::Trigonometric));
        assert_eq!(rule("ln(3*x)"), Some(Rule::Logarithmic));
        assert_eq!(rule("1/sqrt(1 - x^2)"), Some(Rule::InverseTrigonometric));
        assert_eq!(rule("1/(x^2 + 1)"), Some(Rule::InverseTrigonometric));
        assert_eq!(rule("sin(x^2)"), None);
    }

    #[test]
    fn affine_argument_divides_result() {
        let (_, term) = integrate_term(&expr("cos(2*x + 1)"), "x").expect("rule should fire");
        assert_eq!(term.coefficient, 0.5);
        assert_eq!(render(&term.body), "sin(2*x + 1)");
    }
}
