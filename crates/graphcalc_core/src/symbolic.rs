//! Symbolic integration and differentiation.
//!
//! Indefinite integrals go through a table of elementary rules term by term
//! first. When any term misses, the whole expression is handed to a
//! [`CasBackend`]; the built-in [`TreeBackend`] expands polynomials and applies
//! integration by parts.

mod rules;
pub mod simplify;
mod tree;

pub use tree::TreeBackend;

use crate::analysis::integrate_simpson;
use crate::equation_engine::parser::{parse_equation, Expr};
use crate::equation_engine::{
    compile_expr, equation_body, try_compile, CompileOptions, Scope, Syntax,
};
use crate::error::EngineError;
use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use simplify::{as_fraction, as_number, render};

/// Outcome of an indefinite integration. Never an `Err`: failure is `ok: false`
/// with a message naming the expression and variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub ok: bool,
    pub result: Option<String>,
    pub steps: Vec<String>,
    pub error: Option<String>,
}

impl IntegrationResult {
    fn success(result: String, steps: Vec<String>) -> Self {
        Self {
            ok: true,
            result: Some(result),
            steps,
            error: None,
        }
    }

    fn failure(error: String) -> Self {
        Self {
            ok: false,
            result: None,
            steps: Vec::new(),
            error: Some(error),
        }
    }
}

/// `coefficient * body`, one summand of a symbolic result.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub coefficient: f64,
    pub body: Expr,
}

impl Term {
    pub fn new(coefficient: f64, body: Expr) -> Self {
        Self { coefficient, body }
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self {
            coefficient: self.coefficient * factor,
            body: self.body,
        }
    }
}

/// An antiderivative in the plain grammar with the steps that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Antiderivative {
    pub expression: String,
    pub steps: Vec<String>,
}

/// Integration and differentiation beyond the rule table.
pub trait CasBackend {
    fn name(&self) -> &str;

    fn integrate(&self, expression: &str, variable: &str) -> Result<Antiderivative>;

    fn differentiate(&self, expression: &str, variable: &str) -> Result<String>;
}

/// Parses plain source (`**` accepted for `^`) into the evaluable body.
pub(crate) fn parse_plain(expression: &str) -> Result<Expr> {
    let normalized = expression.trim().replace("**", "^");
    if normalized.is_empty() {
        bail!("Expression is empty.");
    }
    let equation =
        parse_equation(&normalized).map_err(|message| EngineError::parse(expression, message))?;
    Ok(equation_body(&equation))
}

/// The value of a variable-free expression such as `3/4` or `2*pi`.
pub(crate) fn numeric_value(expr: &Expr) -> Option<f64> {
    if let Some(value) = as_number(expr) {
        return Some(value);
    }
    if !expr.free_variables().is_empty() {
        return None;
    }
    let value = compile_expr("", expr, &CompileOptions::default())
        .ok()?
        .eval(&Scope::new());
    value.is_finite().then_some(value)
}

fn scaled_body(magnitude: f64, body: &Expr, standalone: bool) -> String {
    if as_number(body) == Some(1.0) {
        return match as_fraction(magnitude) {
            Some((p, 1)) => p.to_string(),
            Some((p, q)) => format!("{p}/{q}"),
            None => crate::equation_engine::parser::format_number(magnitude),
        };
    }
    let text = render(body);
    let loose = matches!(body, Expr::Binary(_, '+' | '-', _));
    let factor = if loose { format!("({text})") } else { text.clone() };
    match as_fraction(magnitude) {
        Some((1, 1)) if standalone || !(loose || matches!(body, Expr::Unary(..))) => text,
        Some((1, 1)) => factor,
        Some((p, 1)) => format!("{p}*{factor}"),
        Some((1, q)) => format!("{factor}/{q}"),
        Some((p, q)) => format!("{p}*{factor}/{q}"),
        None => format!(
            "{}*{factor}",
            crate::equation_engine::parser::format_number(magnitude)
        ),
    }
}

/// Joins terms with sign bookkeeping: the first keeps its sign, later ones
/// are prefixed ` + ` or ` - `.
pub(crate) fn render_terms(terms: &[Term]) -> String {
    let live: Vec<&Term> = terms.iter().filter(|term| term.coefficient != 0.0).collect();
    let mut out = String::new();
    for term in &live {
        let negative = term.coefficient < 0.0;
        let standalone = live.len() == 1 && !negative;
        let text = scaled_body(term.coefficient.abs(), &term.body, standalone);
        if out.is_empty() {
            if negative {
                out.push('-');
            }
        } else {
            out.push_str(if negative { " - " } else { " + " });
        }
        out.push_str(&text);
    }
    if out.is_empty() {
        "0".to_string()
    } else {
        out
    }
}

/// Collapses sign pairs left by string assembly: `+-` to `-`, `--` to `+`,
/// `**` to `^`.
pub fn tidy(text: &str) -> String {
    let mut out = text.replace("**", "^");
    loop {
        let next = out
            .replace("+ -", "- ")
            .replace("- -", "+ ")
            .replace("+-", "-")
            .replace("--", "+");
        if next == out {
            return out;
        }
        out = next;
    }
}

/// Indefinite integral using the built-in backend as the fallback.
pub fn integrate(expression: &str, variable: &str) -> IntegrationResult {
    integrate_with(&TreeBackend, expression, variable)
}

pub fn integrate_with(
    backend: &dyn CasBackend,
    expression: &str,
    variable: &str,
) -> IntegrationResult {
    if variable.trim().is_empty() {
        return IntegrationResult::failure("No integration variable given.".to_string());
    }
    let expr = match parse_plain(expression) {
        Ok(expr) => expr,
        Err(err) => return IntegrationResult::failure(err.to_string()),
    };
    if let Some((terms, steps)) = rules::integrate_sum(&expr, variable) {
        debug!("Rule table integrated `{expression}` in {} step(s)", steps.len());
        return IntegrationResult::success(tidy(&render_terms(&terms)), steps);
    }
    debug!(
        "Rule table missed `{expression}`; falling back to the {} backend",
        backend.name()
    );
    match backend.integrate(expression, variable) {
        Ok(antiderivative) => {
            IntegrationResult::success(tidy(&antiderivative.expression), antiderivative.steps)
        }
        Err(err) => IntegrationResult::failure(format!(
            "Could not integrate `{expression}` with respect to {variable}: {err}"
        )),
    }
}

/// Symbolic derivative in the plain grammar.
pub fn differentiate(expression: &str, variable: &str) -> Result<String> {
    let derivative = TreeBackend
        .differentiate(expression, variable)
        .with_context(|| {
            format!("Could not differentiate `{expression}` with respect to {variable}")
        })?;
    Ok(tidy(&derivative))
}

/// A definite integral and how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefiniteIntegral {
    pub value: f64,
    /// `"antiderivative"` or `"simpson"`.
    pub method: String,
    pub steps: Vec<String>,
}

/// Evaluates the antiderivative at the bounds, falling back to Simpson's rule
/// when there is no antiderivative or it is not finite at a bound.
pub fn definite_integral(
    expression: &str,
    variable: &str,
    bounds: (f64, f64),
    scope: &Scope,
    options: &CompileOptions<'_>,
    intervals: usize,
) -> Result<DefiniteIntegral> {
    let (a, b) = bounds;
    if !a.is_finite() || !b.is_finite() {
        bail!("Integration bounds [{a}, {b}] must be finite.");
    }
    let options = CompileOptions {
        syntax: Syntax::Plain,
        ..*options
    };

    let symbolic = integrate(expression, variable);
    if let Some(antiderivative) = symbolic.result.as_deref().filter(|_| symbolic.ok) {
        if let Ok(compiled) = try_compile(antiderivative, &options) {
            let mut f = compiled.bind(scope, &[variable]);
            let value = f.eval1(b) - f.eval1(a);
            if value.is_finite() {
                let mut steps = symbolic.steps;
                steps.push(format!(
                    "F({b}) - F({a}) = {}",
                    crate::equation_engine::parser::format_number(value)
                ));
                return Ok(DefiniteIntegral {
                    value,
                    method: "antiderivative".to_string(),
                    steps,
                });
            }
        }
    }

    let failure = || {
        format!("Could not integrate `{expression}` over [{a}, {b}] with respect to {variable}")
    };
    let integrand = parse_plain(expression).with_context(failure)?;
    let compiled = compile_expr(expression, &integrand, &options).with_context(failure)?;
    let mut f = compiled.bind(scope, &[variable]);
    let value = integrate_simpson(|x| f.eval1(x), a, b, intervals);
    if !value.is_finite() {
        bail!(failure());
    }
    debug!("Definite integral of `{expression}` fell back to Simpson's rule");
    Ok(DefiniteIntegral {
        value,
        method: "simpson".to_string(),
        steps: vec![format!("Simpson's rule with {intervals} intervals")],
    })
}
