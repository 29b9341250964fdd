//! Sampling-based numerical analysis of single-variable functions.
//!
//! Every scan evaluates `f` at `samples + 1` uniform nodes over the range and
//! brackets sign changes by linear interpolation. Non-finite samples are
//! skipped; a function undefined everywhere yields empty results.

use crate::equation_engine::{
    compile_expr, equation_body, parse_source, try_compile_components, CompileOptions, Scope,
};
use crate::budget::CancelToken;
use crate::expression::{AnalysisPath, Expression, ExpressionKind};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Fixed central-difference step for derivatives.
pub const DERIVATIVE_STEP: f64 = 1e-6;

const ZERO_EPS: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRange {
    pub min: f64,
    pub max: f64,
    pub samples: usize,
}

impl SampleRange {
    pub fn new(min: f64, max: f64, samples: usize) -> Self {
        Self { min, max, samples }
    }

    fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.max <= self.min {
            bail!("Range must be finite with max > min.");
        }
        if self.samples < 2 {
            bail!("At least 2 samples are required.");
        }
        Ok(())
    }

    fn step(&self) -> f64 {
        (self.max - self.min) / self.samples as f64
    }

    fn node(&self, i: usize) -> f64 {
        self.min + self.step() * i as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtremumKind {
    Maximum,
    Minimum,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    pub x: f64,
    pub y: f64,
    pub kind: ExtremumKind,
}

fn interpolate_factor(v0: f64, v1: f64) -> f64 {
    let denominator = v0.abs() + v1.abs();
    if denominator <= 1e-300 {
        0.5
    } else {
        v0.abs() / denominator
    }
}

fn sort_and_dedup(values: &mut Vec<f64>, tolerance: f64) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    values.dedup_by(|a, b| (*a - *b).abs() <= tolerance);
}

/// Central difference `(f(x+h) - f(x-h)) / 2h`.
pub fn derivative_at(mut f: impl FnMut(f64) -> f64, x: f64, h: f64) -> f64 {
    (f(x + h) - f(x - h)) / (2.0 * h)
}

/// Samples between cancellation checks.
const CANCEL_STRIDE: usize = 256;

/// `g(node_i)` for every node, checking `cancel` every [`CANCEL_STRIDE`] nodes.
fn sample_nodes<T>(
    range: &SampleRange,
    cancel: &CancelToken,
    mut g: impl FnMut(f64) -> T,
) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(range.samples.saturating_add(1).min(1 << 20));
    for i in 0..=range.samples {
        if i % CANCEL_STRIDE == 0 {
            cancel.check()?;
        }
        out.push(g(range.node(i)));
    }
    Ok(out)
}

/// Zeros of `f`: a sign change between neighbouring samples or a sample with
/// `|y| < 1e-10`. Each bracket starts from the linear-interpolation estimate
/// `x_i + t·Δx`, `t = |y_i| / (|y_i| + |y_{i+1}|)`, which bisection then
/// polishes; a bracket whose polished value does not shrink below both
/// endpoints straddles a pole and is dropped.
pub fn find_roots(
    mut f: impl FnMut(f64) -> f64,
    range: SampleRange,
    cancel: &CancelToken,
) -> Result<Vec<f64>> {
    range.validate()?;
    let values = sample_nodes(&range, cancel, &mut f)?;
    let mut roots = bracket_zeros(&mut f, &values, &range, usize::MAX, cancel)?;
    sort_and_dedup(&mut roots, range.step() * 1e-3);
    Ok(roots)
}

const BISECTION_STEPS: usize = 60;

fn refine_bracket(
    f: &mut impl FnMut(f64) -> f64,
    (mut lo, mut hi): (f64, f64),
    (y_lo, y_hi): (f64, f64),
) -> Option<f64> {
    let bound = y_lo.abs().min(y_hi.abs());
    let estimate = lo + interpolate_factor(y_lo, y_hi) * (hi - lo);
    let y_estimate = f(estimate);
    if !y_estimate.is_finite() {
        return None;
    }
    if y_estimate == 0.0 {
        return Some(estimate);
    }
    let mut f_lo = y_lo;
    if (y_estimate < 0.0) == (y_lo < 0.0) {
        lo = estimate;
        f_lo = y_estimate;
    } else {
        hi = estimate;
    }
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if !f_mid.is_finite() {
            return None;
        }
        if f_mid == 0.0 {
            return Some(mid);
        }
        if (f_mid < 0.0) == (f_lo < 0.0) {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }
    let x = 0.5 * (lo + hi);
    let y = f(x);
    (y.is_finite() && y.abs() < bound).then_some(x)
}

fn bracket_zeros(
    f: &mut impl FnMut(f64) -> f64,
    values: &[f64],
    range: &SampleRange,
    limit: usize,
    cancel: &CancelToken,
) -> Result<Vec<f64>> {
    let mut zeros = Vec::new();
    for i in 0..values.len() {
        if zeros.len() >= limit {
            break;
        }
        if i % CANCEL_STRIDE == 0 {
            cancel.check()?;
        }
        let y0 = values[i];
        if !y0.is_finite() {
            continue;
        }
        let x0 = range.node(i);
        if y0.abs() < ZERO_EPS {
            zeros.push(x0);
            continue;
        }
        let Some(&y1) = values.get(i + 1) else {
            continue;
        };
        if y1.is_finite() && y0 * y1 < 0.0 {
            if let Some(root) = refine_bracket(f, (x0, range.node(i + 1)), (y0, y1)) {
                zeros.push(root);
            }
        }
    }
    Ok(zeros)
}

/// Local maxima and minima from sign changes of the central-difference slope.
/// The crossing point is placed by linear interpolation of the slopes.
pub fn find_extrema(
    mut f: impl FnMut(f64) -> f64,
    range: SampleRange,
    cancel: &CancelToken,
) -> Result<Vec<Extremum>> {
    range.validate()?;
    let dx = range.step();
    let values = sample_nodes(&range, cancel, &mut f)?;
    let slopes: Vec<f64> = (0..values.len())
        .map(|i| {
            if i == 0 || i + 1 == values.len() {
                f64::NAN
            } else {
                (values[i + 1] - values[i - 1]) / (2.0 * dx)
            }
        })
        .collect();

    let mut candidates: Vec<(f64, ExtremumKind)> = Vec::new();
    for i in 1..slopes.len().saturating_sub(1) {
        let d0 = slopes[i];
        let d1 = slopes[i + 1];
        if !d0.is_finite() || !d1.is_finite() {
            continue;
        }
        if d0 == 0.0 {
            // Flat sample: compare the neighbouring slopes instead.
            let before = slopes[i - 1];
            if before > 0.0 && d1 < 0.0 {
                candidates.push((range.node(i), ExtremumKind::Maximum));
            } else if before < 0.0 && d1 > 0.0 {
                candidates.push((range.node(i), ExtremumKind::Minimum));
            }
            continue;
        }
        let x = range.node(i) + interpolate_factor(d0, d1) * dx;
        if d0 > 0.0 && d1 < 0.0 {
            candidates.push((x, ExtremumKind::Maximum));
        } else if d0 < 0.0 && d1 > 0.0 {
            candidates.push((x, ExtremumKind::Minimum));
        }
    }
    Ok(candidates
        .into_iter()
        .filter_map(|(x, kind)| {
            let y = f(x);
            y.is_finite().then_some(Extremum { x, y, kind })
        })
        .collect())
}

/// Crossings of `f` and `g`, capped at `limit`.
pub fn find_intersections(
    mut f: impl FnMut(f64) -> f64,
    mut g: impl FnMut(f64) -> f64,
    range: SampleRange,
    limit: usize,
    cancel: &CancelToken,
) -> Result<Vec<[f64; 2]>> {
    range.validate()?;
    let mut difference = |x: f64| f(x) - g(x);
    let values = sample_nodes(&range, cancel, &mut difference)?;
    let mut xs = bracket_zeros(&mut difference, &values, &range, limit, cancel)?;
    sort_and_dedup(&mut xs, range.step() * 1e-3);
    Ok(xs
        .into_iter()
        .filter_map(|x| {
            let y = f(x);
            y.is_finite().then_some([x, y])
        })
        .collect())
}

/// Composite Simpson's rule over `n` intervals (rounded up to even).
/// Non-finite samples count as zero.
pub fn integrate_simpson(
    mut f: impl FnMut(f64) -> f64,
    a: f64,
    b: f64,
    n: usize,
) -> f64 {
    if a == b || !a.is_finite() || !b.is_finite() {
        return 0.0;
    }
    let n = n.max(2);
    let n = if n % 2 == 1 { n + 1 } else { n };
    let h = (b - a) / n as f64;
    let mut sum = 0.0;
    for i in 0..=n {
        let y = f(a + h * i as f64);
        let y = if y.is_finite() { y } else { 0.0 };
        let weight = if i == 0 || i == n {
            1.0
        } else if i % 2 == 1 {
            4.0
        } else {
            2.0
        };
        sum += weight * y;
    }
    sum * h / 3.0
}

/// `∫ sqrt(1 + f'(x)^2) dx` with `f'` from central differences.
pub fn arc_length(mut f: impl FnMut(f64) -> f64, a: f64, b: f64, n: usize) -> f64 {
    integrate_simpson(
        |x| {
            let slope = derivative_at(&mut f, x, DERIVATIVE_STEP);
            (1.0 + slope * slope).sqrt()
        },
        a,
        b,
        n,
    )
}

/// Plottable samples split into polylines at non-finite values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveSamples {
    pub segments: Vec<Vec<[f64; 2]>>,
}

impl CurveSamples {
    fn from_points(points: Vec<Option<[f64; 2]>>) -> Self {
        let mut segments = Vec::new();
        let mut current: Vec<[f64; 2]> = Vec::new();
        for point in points {
            match point {
                Some(p) => current.push(p),
                None => {
                    if current.len() > 1 {
                        segments.push(std::mem::take(&mut current));
                    } else {
                        current.clear();
                    }
                }
            }
        }
        if current.len() > 1 {
            segments.push(current);
        }
        Self { segments }
    }

    pub fn point_count(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }
}

fn finite_point(x: f64, y: f64) -> Option<[f64; 2]> {
    (x.is_finite() && y.is_finite()).then_some([x, y])
}

/// Samples an algebraic, parametric or polar expression for plotting. `range`
/// spans `x`, `t` or `theta` respectively.
pub fn sample_curve(
    expression: &Expression,
    scope: &Scope,
    range: SampleRange,
    options: &CompileOptions<'_>,
    cancel: &CancelToken,
) -> Result<CurveSamples> {
    range.validate()?;
    let kind = expression.kind();
    if !kind.supports(AnalysisPath::CurveSampling) {
        bail!("Expressions of kind {kind:?} cannot be sampled as curves.");
    }
    let equation = parse_source(expression.source(), expression.syntax())?;
    let body = equation_body(&equation);
    let source = expression.source();

    match kind {
        ExpressionKind::Algebraic | ExpressionKind::Series => {
            let compiled = compile_expr(source, &body, options)?;
            let mut bound = compiled.bind(scope, &["x"]);
            let points = sample_nodes(&range, cancel, |x| finite_point(x, bound.eval1(x)))?;
            Ok(CurveSamples::from_points(points))
        }
        ExpressionKind::Parametric => {
            let component_options = CompileOptions {
                syntax: expression.syntax(),
                ..*options
            };
            let components = try_compile_components(source, &component_options)?;
            let [x_fn, y_fn] = components.as_slice() else {
                bail!("Parametric curves need exactly two components.");
            };
            let mut x_bound = x_fn.bind(scope, &["t"]);
            let mut y_bound = y_fn.bind(scope, &["t"]);
            let points = sample_nodes(&range, cancel, |t| {
                finite_point(x_bound.eval1(t), y_bound.eval1(t))
            })?;
            Ok(CurveSamples::from_points(points))
        }
        ExpressionKind::Polar => {
            let compiled = compile_expr(source, &body, options)?;
            let mut bound = compiled.bind(scope, &["theta"]);
            let points = sample_nodes(&range, cancel, |theta| {
                let r = bound.eval1(theta);
                finite_point(r * theta.cos(), r * theta.sin())
            })?;
            Ok(CurveSamples::from_points(points))
        }
        ExpressionKind::Implicit
        | ExpressionKind::Differential
        | ExpressionKind::Points
        | ExpressionKind::Slider
        | ExpressionKind::Inequality => {
            bail!("Expressions of kind {kind:?} cannot be sampled as curves.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation_engine::compile;
    use crate::error::EngineError;
    use std::f64::consts::PI;

    fn compiled(source: &str) -> crate::equation_engine::CompiledFunction {
        compile(source, &CompileOptions::default()).expect("expression should compile")
    }

    #[test]
    fn roots_of_quadratic() {
        let f = compiled("x^2 - 4");
        let mut bound = f.bind(&Scope::new(), &["x"]);
        let range = SampleRange::new(-10.0, 10.0, 400);
        let roots = find_roots(|x| bound.eval1(x), range, &CancelToken::new())
            .expect("roots should compute");
        assert_eq!(roots.len(), 2, "roots: {roots:?}");
        assert!((roots[0] + 2.0).abs() < 1e-3);
        assert!((roots[1] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn roots_of_undefined_function_are_empty() {
        let f = compiled("sqrt(-1 - x^2)");
        let mut bound = f.bind(&Scope::new(), &["x"]);
        let range = SampleRange::new(-5.0, 5.0, 200);
        let roots = find_roots(|x| bound.eval1(x), range, &CancelToken::new())
            .expect("roots should compute");
        assert!(roots.is_empty());
    }

    #[test]
    fn root_estimate_starts_from_linear_interpolation() {
        let range = SampleRange::new(-1.0, 1.0, 10);
        let roots = find_roots(|x| 3.0 * x - 1.0, range, &CancelToken::new())
            .expect("roots should compute");
        assert_eq!(roots.len(), 1);
        assert!((roots[0] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn cancelled_scans_stop() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let range = SampleRange::new(-1.0, 1.0, 100);
        let err = find_roots(|x| x, range, &cancel).expect_err("cancelled");
        assert_eq!(err.downcast_ref::<EngineError>(), Some(&EngineError::Cancelled));
        assert!(find_extrema(|x| x * x, range, &cancel).is_err());
        assert!(find_intersections(|x| x, |_| 0.0, range, 4, &cancel).is_err());
    }

    #[test]
    fn roots_skip_poles() {
        // 1/x changes sign across the pole but never crosses zero through finite values.
        let range = SampleRange::new(-1.0, 1.0, 201);
        let roots = find_roots(|x| 1.0 / x, range, &CancelToken::new())
            .expect("roots should compute");
        assert!(roots.is_empty(), "roots: {roots:?}");
    }

    #[test]
    fn extrema_of_cubic() {
        let range = SampleRange::new(-3.0, 3.0, 600);
        let extrema = find_extrema(|x| x * x * x - 3.0 * x, range, &CancelToken::new())
            .expect("extrema should compute");
        assert_eq!(extrema.len(), 2, "extrema: {extrema:?}");
        assert_eq!(extrema[0].kind, ExtremumKind::Maximum);
        assert!((extrema[0].x + 1.0).abs() < 1e-2);
        assert!((extrema[0].y - 2.0).abs() < 1e-3);
        assert_eq!(extrema[1].kind, ExtremumKind::Minimum);
        assert!((extrema[1].x - 1.0).abs() < 1e-2);
    }

    #[test]
    fn extremum_on_a_sample_node() {
        let range = SampleRange::new(-1.0, 1.0, 200);
        let extrema = find_extrema(|x| x * x, range, &CancelToken::new())
            .expect("extrema should compute");
        assert_eq!(extrema.len(), 1, "extrema: {extrema:?}");
        assert_eq!(extrema[0].kind, ExtremumKind::Minimum);
        assert!(extrema[0].x.abs() < 1e-2);
    }

    #[test]
    fn intersections_are_capped() {
        let points = find_intersections(
            |x: f64| x.sin(),
            |_| 0.0,
            SampleRange::new(0.5, 20.0, 2000),
            3,
            &CancelToken::new(),
        )
        .expect("intersections should compute");
        assert_eq!(points.len(), 3);
        assert!((points[0][0] - PI).abs() < 1e-3);
    }

    #[test]
    fn simpson_sine_over_half_period() {
        let value = integrate_simpson(f64::sin, 0.0, PI, 1000);
        assert!((value - 2.0).abs() < 1e-6, "got {value}");
    }

    #[test]
    fn simpson_ignores_nan_samples() {
        let value =
            integrate_simpson(|x| if x == 0.0 { f64::NAN } else { 1.0 }, 0.0, 1.0, 10);
        assert!(value.is_finite());
        assert!((value - (1.0 - 1.0 / 30.0)).abs() < 1e-12, "got {value}");
    }

    #[test]
    fn simpson_reversed_bounds_negate() {
        let forward = integrate_simpson(|x| x * x, 0.0, 2.0, 10);
        let backward = integrate_simpson(|x| x * x, 2.0, 0.0, 10);
        assert!((forward + backward).abs() < 1e-12);
    }

    #[test]
    fn arc_length_of_line() {
        let length = arc_length(|x| 2.0 * x, 0.0, 1.0, 100);
        assert!((length - 5f64.sqrt()).abs() < 1e-6, "got {length}");
    }

    #[test]
    fn polar_circle_samples_have_unit_radius() {
        let expression = Expression::plain("r = 1");
        let samples = sample_curve(
            &expression,
            &Scope::new(),
            SampleRange::new(0.0, 2.0 * PI, 100),
            &CompileOptions::default(),
            &CancelToken::new(),
        )
        .expect("polar curve should sample");
        assert_eq!(samples.segments.len(), 1);
        for [x, y] in &samples.segments[0] {
            assert!(((x * x + y * y).sqrt() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn algebraic_curve_breaks_at_gaps() {
        let expression = Expression::plain("y = sqrt(x^2 - 1)");
        let samples = sample_curve(
            &expression,
            &Scope::new(),
            SampleRange::new(-2.0, 2.0, 400),
            &CompileOptions::default(),
            &CancelToken::new(),
        )
        .expect("curve should sample");
        assert_eq!(samples.segments.len(), 2);
    }

    #[test]
    fn parametric_curve_uses_t() {
        let expression = Expression::plain("(cos(t), sin(2t))");
        let samples = sample_curve(
            &expression,
            &Scope::new(),
            SampleRange::new(0.0, PI, 50),
            &CompileOptions::default(),
            &CancelToken::new(),
        )
        .expect("parametric curve should sample");
        assert_eq!(samples.point_count(), 51);
        assert!((samples.segments[0][0][0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn implicit_expressions_are_not_curves() {
        let expression = Expression::plain("x^2 + y^2 = 1");
        assert!(sample_curve(
            &expression,
            &Scope::new(),
            SampleRange::new(-1.0, 1.0, 10),
            &CompileOptions::default(),
            &CancelToken::new(),
        )
        .is_err());
    }
}
