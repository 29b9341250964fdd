//! Expression classification.
//!
//! Every entry in the expression list is classified once into an
//! [`ExpressionKind`]; the kind decides which analysis paths apply.

use crate::equation_engine::parser::{Equation, Expr};
use crate::equation_engine::registry::FunctionDefinition;
use crate::equation_engine::{parse_source, Syntax};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionKind {
    /// `y = f(x)`, `f(x) = ...`, or a bare expression in `x`.
    Algebraic,
    /// `(x(t), y(t))`.
    Parametric,
    /// `r = f(theta)`.
    Polar,
    /// `F(x, y) = G(x, y)`.
    Implicit,
    /// `y' = f(x, y)`, `dy/dx = ...`, `y'' = ...`.
    Differential,
    /// Contains `sum`/`prod`.
    Series,
    /// `(1, 2)` or `(1, 2), (3, 4)`.
    Points,
    /// `a = 3`.
    Slider,
    /// `y < x^2`, `x^2 + y^2 <= 1`.
    Inequality,
}

/// Analyses a request may run against an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPath {
    /// Roots, extrema, intersections, definite integrals, arc length.
    FunctionAnalysis,
    /// Curve sampling for plotting.
    CurveSampling,
    /// Scalar field sampling and contour extraction.
    FieldContours,
    /// ODE trajectories.
    OdeTrajectory,
}

impl ExpressionKind {
    pub fn supports(self, path: AnalysisPath) -> bool {
        match self {
            ExpressionKind::Algebraic | ExpressionKind::Series => matches!(
                path,
                AnalysisPath::FunctionAnalysis
                    | AnalysisPath::CurveSampling
                    | AnalysisPath::FieldContours
            ),
            ExpressionKind::Parametric | ExpressionKind::Polar => {
                path == AnalysisPath::CurveSampling
            }
            ExpressionKind::Implicit | ExpressionKind::Inequality => {
                path == AnalysisPath::FieldContours
            }
            ExpressionKind::Differential => path == AnalysisPath::OdeTrajectory,
            ExpressionKind::Points | ExpressionKind::Slider => false,
        }
    }
}

/// An immutable source string with its syntax and classified kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    source: String,
    syntax: Syntax,
    kind: ExpressionKind,
}

impl Expression {
    pub fn new(source: &str, syntax: Syntax) -> Self {
        Self {
            source: source.to_string(),
            syntax,
            kind: classify(source, syntax),
        }
    }

    pub fn plain(source: &str) -> Self {
        Self::new(source, Syntax::Plain)
    }

    pub fn latex(source: &str) -> Self {
        Self::new(source, Syntax::Latex)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    pub fn kind(&self) -> ExpressionKind {
        self.kind
    }

    /// The user function this expression defines, if it is `name(params) = body`.
    pub fn function_definition(&self) -> Option<FunctionDefinition> {
        let equation = parse_source(&self.source, self.syntax).ok()?;
        let (_, rhs) = equation.relation.as_ref()?;
        FunctionDefinition::from_equation(&equation.lhs, rhs)
    }
}

fn is_differential(source: &str) -> bool {
    let compact: String = source.chars().filter(|c| !c.is_whitespace()).collect();
    compact.contains("y'")
        || compact.contains("dy/dx")
        || compact.contains("dy/dt")
        || compact.contains(r"\frac{dy}{dx}")
        || compact.contains(r"\frac{dy}{dt}")
}

fn is_constant(expr: &Expr) -> bool {
    expr.free_variables().is_empty()
}

fn contains_reduction(expr: &Expr) -> bool {
    match expr {
        Expr::Reduce { .. } => true,
        Expr::Binary(left, _, right)
        | Expr::Compare(left, _, right)
        | Expr::And(left, right)
        | Expr::Restrict(left, right) => contains_reduction(left) || contains_reduction(right),
        Expr::Unary(_, operand) => contains_reduction(operand),
        Expr::Call(_, items) | Expr::Tuple(items) => items.iter().any(contains_reduction),
        Expr::Number(_) | Expr::Variable(_) => false,
    }
}

fn contains_comparison(expr: &Expr) -> bool {
    match expr {
        Expr::Compare(..) => true,
        Expr::And(left, right) => contains_comparison(left) || contains_comparison(right),
        _ => false,
    }
}

fn classify_tuple(items: &[Expr]) -> ExpressionKind {
    let all_points = items.iter().all(|item| match item {
        Expr::Tuple(coords) => coords.iter().all(is_constant),
        other => is_constant(other),
    });
    if all_points {
        return ExpressionKind::Points;
    }
    if items.len() == 2 && items.iter().any(|item| item.mentions("t")) {
        return ExpressionKind::Parametric;
    }
    ExpressionKind::Points
}

/// Classifies an expression from its source. Unparsable input classifies as
/// `Algebraic` so the compiler reports the parse failure.
pub fn classify(source: &str, syntax: Syntax) -> ExpressionKind {
    if is_differential(source) {
        return ExpressionKind::Differential;
    }
    let Ok(equation) = parse_source(source, syntax) else {
        return ExpressionKind::Algebraic;
    };
    classify_equation(&equation)
}

fn classify_equation(equation: &Equation) -> ExpressionKind {
    let Equation { lhs, relation, .. } = equation;
    match relation {
        Some((relation, _)) if relation.is_inequality() => ExpressionKind::Inequality,
        Some((_, rhs)) => match lhs {
            Expr::Variable(name) if name == "r" && !rhs.mentions("r") => ExpressionKind::Polar,
            Expr::Variable(name)
                if name != "x" && name != "y" && matches!(rhs, Expr::Number(_)) =>
            {
                ExpressionKind::Slider
            }
            Expr::Variable(name) if !rhs.mentions(name) => match rhs {
                Expr::Tuple(items) => classify_tuple(items),
                _ if contains_reduction(rhs) => ExpressionKind::Series,
                _ => ExpressionKind::Algebraic,
            },
            Expr::Call(..) if FunctionDefinition::from_equation(lhs, rhs).is_some() => {
                if contains_reduction(rhs) {
                    ExpressionKind::Series
                } else {
                    ExpressionKind::Algebraic
                }
            }
            _ => ExpressionKind::Implicit,
        },
        None => match lhs {
            Expr::Tuple(items) => classify_tuple(items),
            _ if contains_comparison(lhs) => ExpressionKind::Inequality,
            _ if contains_reduction(lhs) => ExpressionKind::Series,
            _ => ExpressionKind::Algebraic,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(source: &str) -> ExpressionKind {
        Expression::plain(source).kind()
    }

    #[test]
    fn classifies_plain_sources() {
        assert_eq!(kind("y = x^2"), ExpressionKind::Algebraic);
        assert_eq!(kind("sin(x)"), ExpressionKind::Algebraic);
        assert_eq!(kind("f(x) = x + 1"), ExpressionKind::Algebraic);
        assert_eq!(kind("(cos(t), sin(t))"), ExpressionKind::Parametric);
        assert_eq!(kind("r = 1 + cos(theta)"), ExpressionKind::Polar);
        assert_eq!(kind("x^2 + y^2 = 1"), ExpressionKind::Implicit);
        assert_eq!(kind("y' = y"), ExpressionKind::Differential);
        assert_eq!(kind("dy/dx = x*y"), ExpressionKind::Differential);
        assert_eq!(kind("sum(x^n/n, n, 1, 10)"), ExpressionKind::Series);
        assert_eq!(kind("(1, 2), (3, 4)"), ExpressionKind::Points);
        assert_eq!(kind("(1, 2)"), ExpressionKind::Points);
        assert_eq!(kind("a = 3"), ExpressionKind::Slider);
        assert_eq!(kind("y < x^2"), ExpressionKind::Inequality);
        assert_eq!(kind("-1 < x < 1"), ExpressionKind::Inequality);
    }

    #[test]
    fn classifies_latex_sources() {
        let expression = Expression::latex(r"y=\frac{1}{x}");
        assert_eq!(expression.kind(), ExpressionKind::Algebraic);
        assert_eq!(
            Expression::latex(r"x^{2}+y^{2}\le 4").kind(),
            ExpressionKind::Inequality
        );
    }

    #[test]
    fn analysis_paths_follow_kind() {
        assert!(ExpressionKind::Algebraic.supports(AnalysisPath::FunctionAnalysis));
        assert!(!ExpressionKind::Implicit.supports(AnalysisPath::FunctionAnalysis));
        assert!(ExpressionKind::Implicit.supports(AnalysisPath::FieldContours));
        assert!(ExpressionKind::Algebraic.supports(AnalysisPath::FieldContours));
        assert!(!ExpressionKind::Differential.supports(AnalysisPath::FieldContours));
        assert!(ExpressionKind::Polar.supports(AnalysisPath::CurveSampling));
        assert!(!ExpressionKind::Slider.supports(AnalysisPath::CurveSampling));
    }

    #[test]
    fn function_definition_accessor() {
        assert!(Expression::plain("k = 2.5").function_definition().is_none());
        let definition = Expression::plain("g(t) = t^2")
            .function_definition()
            .expect("should define g");
        assert_eq!(definition.name, "g");
        assert_eq!(definition.params, vec!["t".to_string()]);
    }
}
