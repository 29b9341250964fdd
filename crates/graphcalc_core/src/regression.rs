//! Least-squares fits over 2D point sets.
//!
//! Degenerate input never fails a request: too few points give a zero fit with
//! `r2 = 0`, and a singular quadratic system degrades to the linear fit.

use crate::equation_engine::parser::format_number;
use log::warn;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

const SINGULAR_DETERMINANT: f64 = 1e-15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionType {
    Linear,
    Quadratic,
    Exponential,
}

/// A fitted model. `coefficients` are `[intercept, slope]` for linear,
/// `[c, b, a]` for `a x^2 + b x + c`, and `[a, b]` for `a e^(b x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionResult {
    pub model: RegressionType,
    pub coefficients: Vec<f64>,
    pub equation: String,
    pub r2: f64,
}

impl RegressionResult {
    fn zero(model: RegressionType) -> Self {
        let coefficients = match model {
            RegressionType::Quadratic => vec![0.0; 3],
            RegressionType::Linear | RegressionType::Exponential => vec![0.0; 2],
        };
        Self {
            model,
            coefficients,
            equation: "y = 0".to_string(),
            r2: 0.0,
        }
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let c = &self.coefficients;
        match self.model {
            RegressionType::Linear => c[0] + c[1] * x,
            RegressionType::Quadratic => c[0] + c[1] * x + c[2] * x * x,
            RegressionType::Exponential => c[0] * (c[1] * x).exp(),
        }
    }
}

pub fn fit(points: &[[f64; 2]], model: RegressionType) -> RegressionResult {
    let points: Vec<[f64; 2]> = points
        .iter()
        .copied()
        .filter(|[x, y]| x.is_finite() && y.is_finite())
        .collect();
    if points.len() < 2 {
        warn!("Regression needs at least 2 points, got {}", points.len());
        return RegressionResult::zero(model);
    }
    let mut result = match model {
        RegressionType::Linear => linear(&points),
        RegressionType::Quadratic => quadratic(&points),
        RegressionType::Exponential => exponential(&points),
    };
    result.r2 = r_squared(&points, |x| result.evaluate(x));
    result
}

/// `(intercept, slope)`, or `None` when every `x` is equal.
fn least_squares_line(points: &[[f64; 2]]) -> Option<(f64, f64)> {
    let n = points.len() as f64;
    let (sx, sy, sxx, sxy) = points.iter().fold((0.0, 0.0, 0.0, 0.0), |acc, [x, y]| {
        (acc.0 + x, acc.1 + y, acc.2 + x * x, acc.3 + x * y)
    });
    let denominator = n * sxx - sx * sx;
    if denominator.abs() < SINGULAR_DETERMINANT {
        return None;
    }
    let slope = (n * sxy - sx * sy) / denominator;
    Some(((sy - slope * sx) / n, slope))
}

fn linear(points: &[[f64; 2]]) -> RegressionResult {
    let Some((intercept, slope)) = least_squares_line(points) else {
        warn!("Linear regression is degenerate: all x values coincide");
        return RegressionResult::zero(RegressionType::Linear);
    };
    RegressionResult {
        model: RegressionType::Linear,
        coefficients: vec![intercept, slope],
        equation: format!("y = {}x{}", format_number(slope), signed(intercept)),
        r2: 0.0,
    }
}

fn quadratic(points: &[[f64; 2]]) -> RegressionResult {
    let mut moments = [0.0; 5];
    let mut rhs = Vector3::zeros();
    for [x, y] in points {
        let mut power = 1.0;
        for (k, moment) in moments.iter_mut().enumerate() {
            *moment += power;
            if k < 3 {
                rhs[k] += power * y;
            }
            power *= x;
        }
    }
    #[rustfmt::skip]
    let normal = Matrix3::new(
        moments[0], moments[1], moments[2],
        moments[1], moments[2], moments[3],
        moments[2], moments[3], moments[4],
    );
    let determinant = normal.determinant();
    if determinant.abs() < SINGULAR_DETERMINANT {
        warn!("Quadratic normal equations are singular (|D| = {determinant:e}); using a linear fit");
        return linear(points);
    }
    // Cramer's rule: swap each column for the right-hand side in turn.
    let solve = |column: usize| {
        let mut replaced = normal;
        replaced.set_column(column, &rhs);
        replaced.determinant() / determinant
    };
    let (c, b, a) = (solve(0), solve(1), solve(2));
    RegressionResult {
        model: RegressionType::Quadratic,
        coefficients: vec![c, b, a],
        equation: format!(
            "y = {}x^2{}x{}",
            format_number(a),
            signed(b),
            signed(c)
        ),
        r2: 0.0,
    }
}

fn exponential(points: &[[f64; 2]]) -> RegressionResult {
    let logged: Vec<[f64; 2]> = points
        .iter()
        .filter(|[_, y]| *y > 0.0)
        .map(|[x, y]| [*x, y.ln()])
        .collect();
    if logged.len() < 2 {
        warn!("Exponential regression needs 2 points with positive y, got {}", logged.len());
        return RegressionResult::zero(RegressionType::Exponential);
    }
    let Some((ln_a, b)) = least_squares_line(&logged) else {
        return RegressionResult::zero(RegressionType::Exponential);
    };
    let a = ln_a.exp();
    RegressionResult {
        model: RegressionType::Exponential,
        coefficients: vec![a, b],
        equation: format!("y = {}e^({}x)", format_number(a), format_number(b)),
        r2: 0.0,
    }
}

fn signed(value: f64) -> String {
    if value < 0.0 {
        format!(" - {}", format_number(-value))
    } else {
        format!(" + {}", format_number(value))
    }
}

/// Coefficient of determination against the untransformed `y` values.
fn r_squared(points: &[[f64; 2]], model: impl Fn(f64) -> f64) -> f64 {
    let mean = points.iter().map(|[_, y]| y).sum::<f64>() / points.len() as f64;
    let (residual, total) = points.iter().fold((0.0, 0.0), |(residual, total), [x, y]| {
        let error = y - model(*x);
        (residual + error * error, total + (y - mean) * (y - mean))
    });
    if total == 0.0 {
        return if residual == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - residual / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_fit_of_exact_line() {
        let result = fit(&[[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]], RegressionType::Linear);
        assert!((result.coefficients[1] - 2.0).abs() < 1e-12);
        assert!(result.coefficients[0].abs() < 1e-12);
        assert!((result.r2 - 1.0).abs() < 1e-12);
        assert!((result.evaluate(10.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn quadratic_fit_recovers_parabola() {
        let points: Vec<[f64; 2]> = (-3..=3)
            .map(|i| {
                let x = i as f64;
                [x, 2.0 * x * x - x + 1.0]
            })
            .collect();
        let result = fit(&points, RegressionType::Quadratic);
        assert_eq!(result.model, RegressionType::Quadratic);
        let [c, b, a] = [result.coefficients[0], result.coefficients[1], result.coefficients[2]];
        assert!((a - 2.0).abs() < 1e-9, "a = {a}");
        assert!((b + 1.0).abs() < 1e-9, "b = {b}");
        assert!((c - 1.0).abs() < 1e-9, "c = {c}");
        assert!((result.r2 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn singular_quadratic_degrades_to_linear() {
        // Two distinct x values cannot determine a parabola.
        let result = fit(
            &[[1.0, 1.0], [1.0, 1.5], [2.0, 3.0], [2.0, 3.5]],
            RegressionType::Quadratic,
        );
        assert_eq!(result.model, RegressionType::Linear);
        assert_eq!(result.coefficients.len(), 2);
    }

    #[test]
    fn exponential_fit_ignores_non_positive_y() {
        let mut points: Vec<[f64; 2]> = (0..5)
            .map(|i| {
                let x = i as f64;
                [x, 3.0 * (0.5 * x).exp()]
            })
            .collect();
        points.push([2.5, -1.0]);
        let result = fit(&points, RegressionType::Exponential);
        assert!((result.coefficients[0] - 3.0).abs() < 1e-9);
        assert!((result.coefficients[1] - 0.5).abs() < 1e-9);
        // r2 uses every original point, including the filtered one.
        assert!(result.r2 < 1.0);
    }

    #[test]
    fn too_few_points_give_zero_fit() {
        let result = fit(&[[1.0, 1.0]], RegressionType::Linear);
        assert_eq!(result.r2, 0.0);
        assert_eq!(result.coefficients, vec![0.0, 0.0]);
        let result = fit(&[[1.0, -1.0], [2.0, 1.0]], RegressionType::Exponential);
        assert_eq!(result.r2, 0.0);
        assert_eq!(result.evaluate(3.0), 0.0);
    }
}
