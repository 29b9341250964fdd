//! Ordinary differential equations entered as expressions.
//!
//! `y' = f(x, y)`, `dy/dx = ...`, `y'' = f(x, y, y')` and implicit
//! `F(x, y, y') = 0` are all accepted. Derivatives are rewritten to the plain
//! symbols `yp` and `ypp` before parsing.

use crate::budget::CancelToken;
use crate::equation_engine::parser::{parse_equation, Expr};
use crate::equation_engine::{
    compile_expr, latex, BoundFunction, CompileOptions, CompiledFunction, Scope, Syntax,
};
use crate::error::EngineError;
use crate::implicit::GridBounds;
use crate::settings::OdeTolerances;
use crate::solvers::{AdaptiveTsit5, StepControl, StepFailure, RK4};
use crate::traits::{DynamicalSystem, Steppable};
use anyhow::{bail, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

pub const SLOPE: &str = "yp";
pub const CURVATURE: &str = "ypp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OdeMethod {
    #[default]
    Rk4,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdeOrder {
    /// `y' = f(x, y)`.
    First,
    /// `y'' = f(x, y, y')`, integrated as the system `[y, y']`.
    Second,
    /// `F(x, y, y') = 0`, solved for `y'` at every evaluation.
    Implicit,
}

/// A compiled ODE right-hand side (or residual, for implicit equations).
#[derive(Debug, Clone)]
pub struct CompiledOde {
    pub order: OdeOrder,
    /// `x` unless the equation only mentions `t`.
    pub independent: String,
    pub function: CompiledFunction,
}

impl CompiledOde {
    /// State dimension of the equivalent first-order system.
    pub fn dimension(&self) -> usize {
        match self.order {
            OdeOrder::First | OdeOrder::Implicit => 1,
            OdeOrder::Second => 2,
        }
    }

    pub fn system(&self, scope: &Scope) -> OdeSystem<'_> {
        match self.order {
            OdeOrder::First => first_order_system(&self.function, scope, &self.independent),
            OdeOrder::Second => second_order_system(&self.function, scope, &self.independent),
            OdeOrder::Implicit => rearrange_implicit(&self.function, scope, &self.independent),
        }
    }
}

/// Replaces `y''`, `y'`, `dy/dx` and `dy/dt` with `ypp` / `yp`.
pub fn rewrite_derivatives(source: &str) -> String {
    let source = source
        .replace("d^2y/dx^2", "y''")
        .replace("d^2y/dt^2", "y''")
        .replace("dy/dx", "y'")
        .replace("dy/dt", "y'");
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let standalone = i == 0 || !(chars[i - 1].is_alphanumeric() || chars[i - 1] == '_');
        if c == 'y' && standalone {
            let mut j = i + 1;
            let mut primes = 0;
            while j < chars.len() && (chars[j] == '\'' || chars[j].is_whitespace()) {
                if chars[j] == '\'' {
                    primes += 1;
                }
                j += 1;
            }
            if primes > 0 {
                out.push_str(if primes >= 2 { CURVATURE } else { SLOPE });
                out.push(' ');
                i = j;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn latex_derivatives(source: &str) -> String {
    source
        .replace(r"\frac{d^{2}y}{dx^{2}}", "y''")
        .replace(r"\frac{d^2y}{dx^2}", "y''")
        .replace(r"\frac{dy}{dx}", "y'")
        .replace(r"\frac{dy}{dt}", "y'")
        .replace(r"^{\prime\prime}", "''")
        .replace(r"^{\prime}", "'")
        .replace(r"\prime", "'")
}

/// Compiles an ODE statement.
pub fn compile_ode(source: &str, options: &CompileOptions<'_>) -> Result<CompiledOde, EngineError> {
    let plain = match options.syntax {
        Syntax::Plain => source.to_string(),
        Syntax::Latex => latex::latex_to_plain(&latex_derivatives(source))?,
    };
    let rewritten = rewrite_derivatives(&plain);
    let equation = parse_equation(&rewritten).map_err(|message| EngineError::parse(source, message))?;
    let Some((_, rhs)) = &equation.relation else {
        return Err(EngineError::InvalidArgument(format!(
            "`{source}` is not a differential equation"
        )));
    };

    let (order, body) = match &equation.lhs {
        Expr::Variable(name) if name == CURVATURE && !rhs.mentions(CURVATURE) => {
            (OdeOrder::Second, rhs.clone())
        }
        Expr::Variable(name) if name == SLOPE && !rhs.mentions(SLOPE) => {
            (OdeOrder::First, rhs.clone())
        }
        lhs if lhs.mentions(CURVATURE) || rhs.mentions(CURVATURE) => {
            return Err(EngineError::InvalidArgument(
                "Implicit second-order equations are not supported".to_string(),
            ))
        }
        lhs if lhs.mentions(SLOPE) || rhs.mentions(SLOPE) => (
            OdeOrder::Implicit,
            Expr::binary(lhs.clone(), '-', rhs.clone()),
        ),
        _ => {
            return Err(EngineError::InvalidArgument(format!(
                "`{source}` does not mention y'"
            )))
        }
    };
    let body = match &equation.restriction {
        Some(condition) => Expr::Restrict(Box::new(body), Box::new(condition.clone())),
        None => body,
    };
    let free = body.free_variables();
    let independent = if free.contains("t") && !free.contains("x") {
        "t"
    } else {
        "x"
    };
    debug!("Compiled `{source}` as a {order:?} ODE in {independent}");
    Ok(CompiledOde {
        order,
        independent: independent.to_string(),
        function: compile_expr(source, &body, options)?,
    })
}

/// A compiled ODE bound to a scope, usable by any stepper.
pub struct OdeSystem<'a> {
    order: OdeOrder,
    rhs: RefCell<BoundFunction<'a>>,
}

pub fn first_order_system<'a>(
    rhs: &'a CompiledFunction,
    scope: &Scope,
    independent: &str,
) -> OdeSystem<'a> {
    OdeSystem {
        order: OdeOrder::First,
        rhs: RefCell::new(rhs.bind(scope, &[independent, "y"])),
    }
}

/// `y'' = f(x, y, y')` as the first-order system on `[y, y']`.
pub fn second_order_system<'a>(
    acceleration: &'a CompiledFunction,
    scope: &Scope,
    independent: &str,
) -> OdeSystem<'a> {
    OdeSystem {
        order: OdeOrder::Second,
        rhs: RefCell::new(acceleration.bind(scope, &[independent, "y", SLOPE])),
    }
}

/// `F(x, y, y') = 0` as an explicit `y' = g(x, y)`.
pub fn rearrange_implicit<'a>(
    residual: &'a CompiledFunction,
    scope: &Scope,
    independent: &str,
) -> OdeSystem<'a> {
    OdeSystem {
        order: OdeOrder::Implicit,
        rhs: RefCell::new(residual.bind(scope, &[independent, "y", SLOPE])),
    }
}

const SECANT_ITERATIONS: usize = 50;

/// Root of `residual(p)`. Affine residuals (zero second difference over
/// `p = 0, 1, 2`) are solved directly; others by secant iteration from `p = 0`.
/// NaN when no root is found.
pub fn solve_for_slope(mut residual: impl FnMut(f64) -> f64) -> f64 {
    let f0 = residual(0.0);
    let f1 = residual(1.0);
    let f2 = residual(2.0);
    if !f0.is_finite() || !f1.is_finite() {
        return f64::NAN;
    }
    let scale = 1.0 + f0.abs() + f1.abs() + f2.abs();
    if f2.is_finite() && (f2 - 2.0 * f1 + f0).abs() <= 1e-9 * scale {
        let slope = f1 - f0;
        return if slope == 0.0 { f64::NAN } else { -f0 / slope };
    }

    let (mut p0, mut p1) = (0.0, 1.0);
    let (mut r0, mut r1) = (f0, f1);
    for _ in 0..SECANT_ITERATIONS {
        if r1.abs() < 1e-12 {
            return p1;
        }
        let denominator = r1 - r0;
        if denominator == 0.0 || !denominator.is_finite() {
            return f64::NAN;
        }
        let p2 = p1 - r1 * (p1 - p0) / denominator;
        if !p2.is_finite() {
            return f64::NAN;
        }
        (p0, r0) = (p1, r1);
        p1 = p2;
        r1 = residual(p1);
        if (p1 - p0).abs() <= 1e-12 * (1.0 + p1.abs()) && r1.abs() < 1e-8 {
            return p1;
        }
    }
    if r1.abs() < 1e-8 {
        p1
    } else {
        f64::NAN
    }
}

impl DynamicalSystem<f64> for OdeSystem<'_> {
    fn dimension(&self) -> usize {
        match self.order {
            OdeOrder::First | OdeOrder::Implicit => 1,
            OdeOrder::Second => 2,
        }
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let mut rhs = self.rhs.borrow_mut();
        match self.order {
            OdeOrder::First => out[0] = rhs.eval(&[t, x[0]]),
            OdeOrder::Second => {
                out[0] = x[1];
                out[1] = rhs.eval(&[t, x[0], x[1]]);
            }
            OdeOrder::Implicit => {
                out[0] = solve_for_slope(|slope| rhs.eval(&[t, x[0], slope]));
            }
        }
    }
}

/// Samples of a solution at uniform output times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// `(t, first state component)` pairs for plotting.
    pub fn points(&self) -> Vec<[f64; 2]> {
        self.times
            .iter()
            .zip(&self.states)
            .map(|(t, state)| [*t, state.first().copied().unwrap_or(f64::NAN)])
            .collect()
    }
}

/// Advances a state by one output interval with the chosen method.
enum Integrator {
    Rk4(RK4<f64>),
    Adaptive(AdaptiveTsit5<f64>),
}

impl Integrator {
    fn new(method: OdeMethod, dim: usize, tolerances: &OdeTolerances) -> Self {
        match method {
            OdeMethod::Rk4 => Integrator::Rk4(RK4::new(dim)),
            OdeMethod::Adaptive => Integrator::Adaptive(AdaptiveTsit5::new(
                dim,
                StepControl::new(tolerances.rtol, tolerances.atol, tolerances.max_steps),
            )),
        }
    }

    fn advance(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) -> Result<(), StepFailure> {
        match self {
            Integrator::Rk4(stepper) => {
                stepper.step(system, t, state, dt);
                if state.iter().all(|value| value.is_finite()) {
                    Ok(())
                } else {
                    Err(StepFailure::NonFinite(*t))
                }
            }
            Integrator::Adaptive(stepper) => {
                let target = *t + dt;
                stepper.advance(system, t, state, target, dt.abs())
            }
        }
    }
}

/// Steps between cancellation checks.
const CANCEL_STRIDE: usize = 256;

/// Integrates over `t_span` and reports the state at `steps + 1` uniform
/// times. A failing step ends the trajectory early.
pub fn solve(
    system: &impl DynamicalSystem<f64>,
    t_span: (f64, f64),
    y0: &[f64],
    steps: usize,
    method: OdeMethod,
    tolerances: &OdeTolerances,
    cancel: &CancelToken,
) -> Result<Trajectory> {
    let (t0, t1) = t_span;
    if !t0.is_finite() || !t1.is_finite() {
        bail!("Time span must be finite.");
    }
    if steps == 0 {
        bail!("At least one step is required.");
    }
    if y0.len() != system.dimension() {
        bail!(
            "Initial state length ({}) does not match system dimension ({}).",
            y0.len(),
            system.dimension()
        );
    }

    let dt = (t1 - t0) / steps as f64;
    let mut integrator = Integrator::new(method, y0.len(), tolerances);
    let mut trajectory = Trajectory {
        times: vec![t0],
        states: vec![y0.to_vec()],
    };
    let mut t = t0;
    let mut state = y0.to_vec();
    for i in 1..=steps {
        if i % CANCEL_STRIDE == 0 {
            cancel.check()?;
        }
        if let Err(failure) = integrator.advance(system, &mut t, &mut state, dt) {
            warn!("ODE integration stopped after {} of {steps} steps: {failure}", i - 1);
            break;
        }
        // Pin output times to the uniform grid.
        t = t0 + dt * i as f64;
        trajectory.times.push(t);
        trajectory.states.push(state.clone());
    }
    Ok(trajectory)
}

/// Settings for [`plot_ode`].
#[derive(Debug, Clone, Copy)]
pub struct PlotOptions {
    pub steps: usize,
    pub method: OdeMethod,
    pub magnitude_bound: f64,
    pub tolerances: OdeTolerances,
}

/// A single continuous curve through `(x0, y0[0])` spanning `range`.
///
/// The forward pass stops at the first sample that is non-finite or exceeds
/// the magnitude bound; the backward pass drops such samples and keeps going.
pub fn plot_ode(
    system: &impl DynamicalSystem<f64>,
    x0: f64,
    y0: &[f64],
    range: (f64, f64),
    options: &PlotOptions,
    cancel: &CancelToken,
) -> Result<Vec<[f64; 2]>> {
    let (x_min, x_max) = range;
    if !(x_min.is_finite() && x_max.is_finite() && x_max > x_min) {
        bail!("Range must be finite with max > min.");
    }
    if !x0.is_finite() || y0.is_empty() || y0.len() != system.dimension() {
        bail!("Initial condition does not match the equation.");
    }
    if options.steps == 0 {
        bail!("At least one step is required.");
    }
    let dx = (x_max - x_min) / options.steps as f64;
    let bound = options.magnitude_bound;
    let in_bounds = |state: &[f64]| state[0].is_finite() && state[0].abs() <= bound;

    let mut forward = Vec::new();
    let forward_steps = branch_steps(x_max - x0, dx);
    let mut integrator = Integrator::new(options.method, y0.len(), &options.tolerances);
    let (mut x, mut state) = (x0, y0.to_vec());
    for i in 1..=forward_steps {
        if i % CANCEL_STRIDE == 0 {
            cancel.check()?;
        }
        let failed = integrator.advance(system, &mut x, &mut state, dx).is_err();
        x = x0 + dx * i as f64;
        if failed || !in_bounds(&state) {
            debug!("Forward ODE branch truncated at x = {x}");
            break;
        }
        forward.push([x, state[0]]);
    }

    let mut backward = Vec::new();
    let backward_steps = branch_steps(x0 - x_min, dx);
    let mut integrator = Integrator::new(options.method, y0.len(), &options.tolerances);
    let (mut x, mut state) = (x0, y0.to_vec());
    for i in 1..=backward_steps {
        if i % CANCEL_STRIDE == 0 {
            cancel.check()?;
        }
        let failed = integrator.advance(system, &mut x, &mut state, -dx).is_err();
        x = x0 - dx * i as f64;
        if failed || !in_bounds(&state) {
            continue;
        }
        backward.push([x, state[0]]);
    }

    let mut points = Vec::with_capacity(backward.len() + forward.len() + 1);
    points.extend(backward.into_iter().rev());
    if in_bounds(y0) {
        points.push([x0, y0[0]]);
    }
    points.extend(forward);
    Ok(points)
}

/// Whole steps of size `dx` needed to cover `span`, ignoring rounding slop.
fn branch_steps(span: f64, dx: f64) -> usize {
    (span / dx - 1e-9).ceil().max(0.0) as usize
}

/// Settings for [`flow_field`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowOptions {
    /// Seeds per axis.
    pub grid: usize,
    pub steps: usize,
    pub dt: f64,
    pub magnitude_bound: f64,
}

/// Short RK4 trajectories of `(x', y') = (fx, fy)` from a grid of seeds.
/// Each trajectory stops at its first non-finite or out-of-bound sample and is
/// kept only with at least three samples.
pub fn flow_field(
    fx: &CompiledFunction,
    fy: &CompiledFunction,
    scope: &Scope,
    bounds: [GridBounds; 2],
    options: &FlowOptions,
    cancel: &CancelToken,
) -> Result<Vec<Vec<[f64; 2]>>, EngineError> {
    if options.grid == 0 || options.steps == 0 || !options.dt.is_finite() {
        return Err(EngineError::InvalidArgument(
            "Flow fields need a positive grid, step count and finite dt.".to_string(),
        ));
    }
    let vx = RefCell::new(fx.bind(scope, &["x", "y", "t"]));
    let vy = RefCell::new(fy.bind(scope, &["x", "y", "t"]));
    let system = crate::traits::FnSystem::new(2, |t: f64, p: &[f64], out: &mut [f64]| {
        out[0] = vx.borrow_mut().eval(&[p[0], p[1], t]);
        out[1] = vy.borrow_mut().eval(&[p[0], p[1], t]);
    });
    let bound = options.magnitude_bound;
    let bounded = |p: &[f64]| p.iter().all(|value| value.is_finite() && value.abs() <= bound);

    let mut stepper = RK4::new(2);
    let mut lines = Vec::new();
    let [bx, by] = bounds;
    for j in 0..options.grid {
        cancel.check()?;
        let y_seed = by.min + (by.max - by.min) * (j as f64 + 0.5) / options.grid as f64;
        for i in 0..options.grid {
            let x_seed = bx.min + (bx.max - bx.min) * (i as f64 + 0.5) / options.grid as f64;
            let mut state = [x_seed, y_seed];
            let mut t = 0.0;
            let mut line = vec![state];
            for _ in 0..options.steps {
                stepper.step(&system, &mut t, &mut state, options.dt);
                if !bounded(&state) {
                    break;
                }
                line.push(state);
            }
            if line.len() >= 3 {
                lines.push(line);
            }
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation_engine::compile;
    use std::f64::consts::E;

    fn ode(source: &str) -> CompiledOde {
        compile_ode(source, &CompileOptions::default()).expect("ODE should compile")
    }

    fn plot_options(steps: usize) -> PlotOptions {
        PlotOptions {
            steps,
            method: OdeMethod::Rk4,
            magnitude_bound: 1e6,
            tolerances: OdeTolerances::default(),
        }
    }

    #[test]
    fn derivative_notation_is_rewritten() {
        assert_eq!(rewrite_derivatives("y' = y").replace(' ', ""), "yp=y");
        assert_eq!(rewrite_derivatives("y'' = -y").replace(' ', ""), "ypp=-y");
        assert_eq!(rewrite_derivatives("dy/dx = x*y").replace(' ', ""), "yp=x*y");
        // `y` inside another identifier is left alone.
        assert_eq!(rewrite_derivatives("ky' = 1").replace(' ', ""), "ky'=1");
    }

    #[test]
    fn classifies_orders() {
        assert_eq!(ode("y' = x + y").order, OdeOrder::First);
        assert_eq!(ode("y'' = -y").order, OdeOrder::Second);
        assert_eq!(ode("y' - 2y = 0").order, OdeOrder::Implicit);
        assert_eq!(ode("dy/dt = -t*y").independent, "t");
        assert!(compile_ode("y = x", &CompileOptions::default()).is_err());
    }

    #[test]
    fn latex_ode_compiles() {
        let compiled = compile_ode(r"\frac{dy}{dx}=y", &CompileOptions::latex())
            .expect("LaTeX ODE should compile");
        assert_eq!(compiled.order, OdeOrder::First);
        let compiled = compile_ode(r"y''=-y", &CompileOptions::latex())
            .expect("primes should lower");
        assert_eq!(compiled.order, OdeOrder::Second);
    }

    #[test]
    fn rk4_exponential_reaches_e() {
        let compiled = ode("y' = y");
        let system = compiled.system(&Scope::new());
        let trajectory = solve(
            &system,
            (0.0, 1.0),
            &[1.0],
            400,
            OdeMethod::Rk4,
            &OdeTolerances::default(),
            &CancelToken::new(),
        )
        .expect("solve should succeed");
        assert_eq!(trajectory.len(), 401);
        let last = trajectory.states.last().expect("non-empty")[0];
        assert!((last - E).abs() < 1e-4, "y(1) = {last}");
        assert!((trajectory.times[400] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn adaptive_matches_rk4() {
        let compiled = ode("y' = -2*x*y");
        let system = compiled.system(&Scope::new());
        let trajectory = solve(
            &system,
            (0.0, 2.0),
            &[1.0],
            20,
            OdeMethod::Adaptive,
            &OdeTolerances::default(),
            &CancelToken::new(),
        )
        .expect("solve should succeed");
        for (t, state) in trajectory.times.iter().zip(&trajectory.states) {
            let exact = (-t * t).exp();
            assert!((state[0] - exact).abs() < 1e-5, "y({t}) = {}", state[0]);
        }
    }

    #[test]
    fn cancelled_integration_stops() {
        let compiled = ode("y' = y");
        let system = compiled.system(&Scope::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = solve(
            &system,
            (0.0, 1.0),
            &[1.0],
            10_000,
            OdeMethod::Rk4,
            &OdeTolerances::default(),
            &cancel,
        )
        .expect_err("cancelled");
        assert_eq!(err.downcast_ref::<EngineError>(), Some(&EngineError::Cancelled));
        let err = plot_ode(&system, 0.0, &[1.0], (-1.0, 1.0), &plot_options(1000), &cancel)
            .expect_err("cancelled");
        assert_eq!(err.downcast_ref::<EngineError>(), Some(&EngineError::Cancelled));
    }

    #[test]
    fn second_order_oscillator() {
        let compiled = ode("y'' = -y");
        let system = compiled.system(&Scope::new());
        let trajectory = solve(
            &system,
            (0.0, 1.0),
            &[0.0, 1.0],
            200,
            OdeMethod::Rk4,
            &OdeTolerances::default(),
            &CancelToken::new(),
        )
        .expect("solve should succeed");
        let last = trajectory.states.last().expect("non-empty");
        assert!((last[0] - 1f64.sin()).abs() < 1e-8);
        assert!((last[1] - 1f64.cos()).abs() < 1e-8);
    }

    #[test]
    fn implicit_affine_equation_is_rearranged() {
        let compiled = ode("y' - k*y = 0");
        let scope = Scope::new().with("k", 2.0);
        let system = compiled.system(&scope);
        let mut out = [0.0];
        system.apply(0.0, &[3.0], &mut out);
        assert!((out[0] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn secant_handles_nonlinear_residual() {
        let slope = solve_for_slope(|p| p * p * p + p - 2.0);
        assert!((slope - 1.0).abs() < 1e-8, "slope = {slope}");
        assert!(solve_for_slope(|p| p * p + 1.0).is_nan());
    }

    #[test]
    fn plot_truncates_forward_blow_up() {
        // y = 1 / (1 - x) blows up at x = 1.
        let compiled = ode("y' = y^2");
        let system = compiled.system(&Scope::new());
        let points = plot_ode(
            &system,
            0.0,
            &[1.0],
            (-2.0, 2.0),
            &plot_options(400),
            &CancelToken::new(),
        )
        .expect("plot should succeed");
        let first = points.first().expect("non-empty");
        let last = points.last().expect("non-empty");
        assert!((first[0] + 2.0).abs() < 1e-9);
        assert!((first[1] - 1.0 / 3.0).abs() < 1e-6);
        assert!(last[0] < 1.0 + 1e-6, "forward branch should stop at the pole");
        assert!(points.windows(2).all(|pair| pair[0][0] < pair[1][0]));
    }

    #[test]
    fn rotation_flow_keeps_every_seed() {
        let fx = compile("-y", &CompileOptions::default()).expect("compiles");
        let fy = compile("x", &CompileOptions::default()).expect("compiles");
        let lines = flow_field(
            &fx,
            &fy,
            &Scope::new(),
            [GridBounds::new(-1.0, 1.0), GridBounds::new(-1.0, 1.0)],
            &FlowOptions {
                grid: 4,
                steps: 10,
                dt: 0.05,
                magnitude_bound: 1e6,
            },
            &CancelToken::new(),
        )
        .expect("flow should compute");
        assert_eq!(lines.len(), 16);
        assert!(lines.iter().all(|line| line.len() == 11));
    }

    #[test]
    fn diverging_flow_drops_short_lines() {
        // x' = x^2 leaves the bound after one step from x = 1.25 but not from 0.75.
        let fx = compile("x^2", &CompileOptions::default()).expect("compiles");
        let fy = compile("0", &CompileOptions::default()).expect("compiles");
        let lines = flow_field(
            &fx,
            &fy,
            &Scope::new(),
            [GridBounds::new(0.5, 1.5), GridBounds::new(0.0, 1.0)],
            &FlowOptions {
                grid: 2,
                steps: 20,
                dt: 0.1,
                magnitude_bound: 1.3,
            },
            &CancelToken::new(),
        )
        .expect("flow should compute");
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert!((line[0][0] - 0.75).abs() < 1e-12);
            assert!(line.len() >= 3 && line.len() < 21);
        }
    }
}
