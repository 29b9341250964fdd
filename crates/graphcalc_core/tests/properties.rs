use graphcalc_core::analysis::{find_roots, integrate_simpson, SampleRange};
use graphcalc_core::budget::{CancelToken, SystemClock, TimeBudget};
use graphcalc_core::equation_engine::{try_compile, CompileOptions, Scope};
use graphcalc_core::implicit::{
    marching_cubes, marching_squares, sample_field_2d, sample_field_3d, GridBounds,
};
use graphcalc_core::ode::{compile_ode, solve, OdeMethod};
use graphcalc_core::regression::{fit, RegressionType};
use graphcalc_core::settings::OdeTolerances;
use graphcalc_core::symbolic::{differentiate, integrate};

fn eval_at(source: &str, x: f64) -> f64 {
    let compiled = try_compile(source, &CompileOptions::default()).expect("compiles");
    compiled.eval(&Scope::new().with("x", x))
}

#[test]
fn integrating_a_derivative_recovers_the_polynomial() {
    let polynomial = "x^3 - 2*x^2 + 5*x + 7";
    let derivative = differentiate(polynomial, "x").expect("differentiates");
    let antiderivative = integrate(&derivative, "x");
    assert!(antiderivative.ok, "{:?}", antiderivative.error);
    let antiderivative = antiderivative.result.expect("has a result");

    let offset = eval_at(polynomial, 0.0) - eval_at(&antiderivative, 0.0);
    for x in [-3.0, -1.5, 0.5, 2.0, 4.25] {
        let difference = eval_at(polynomial, x) - eval_at(&antiderivative, x);
        assert!((difference - offset).abs() < 1e-9, "x = {x}: {difference} vs {offset}");
    }
}

#[test]
fn power_rule_integration_reads_back() {
    let result = integrate("3*x^2 + 2*x + 1", "x");
    assert_eq!(result.result.as_deref(), Some("x^3 + x^2 + x"));
    assert!(result.steps.iter().all(|step| step.starts_with("Power rule")));
}

#[test]
fn roots_of_shifted_parabola() {
    let compiled = try_compile("x^2 - 4", &CompileOptions::default()).expect("compiles");
    let mut f = compiled.bind(&Scope::new(), &["x"]);
    let range = SampleRange::new(-10.0, 10.0, 400);
    let roots = find_roots(|x| f.eval1(x), range, &CancelToken::new()).expect("scans");
    assert_eq!(roots.len(), 2);
    assert!((roots[0] + 2.0).abs() < 1e-6);
    assert!((roots[1] - 2.0).abs() < 1e-6);
}

#[test]
fn simpson_integrates_sine_over_half_period() {
    let value = integrate_simpson(f64::sin, 0.0, std::f64::consts::PI, 1000);
    assert!((value - 2.0).abs() < 1e-9);
}

#[test]
fn circle_contour_stays_on_the_circle() {
    let clock = SystemClock::new();
    let compiled = try_compile("x^2 + y^2 = 4", &CompileOptions::default()).expect("compiles");
    let mut f = compiled.bind(&Scope::new(), &["x", "y"]);
    let field = sample_field_2d(
        |x, y| f.eval(&[x, y]),
        [GridBounds::new(-3.0, 3.0), GridBounds::new(-3.0, 3.0)],
        60,
        &TimeBudget::unlimited(&clock),
        &CancelToken::new(),
    )
    .expect("samples");
    let polylines = marching_squares(&field);
    assert_eq!(polylines.len(), 1);
    assert!(polylines[0].closed);
    for [x, y] in &polylines[0].points {
        assert!(((x * x + y * y).sqrt() - 2.0).abs() < 0.02);
    }
}

#[test]
fn zero_budget_3d_sampling_is_partial() {
    let clock = SystemClock::new();
    let bounds = [GridBounds::new(-1.5, 1.5); 3];
    let field = sample_field_3d(
        |x, y, z| x * x + y * y + z * z - 1.0,
        bounds,
        16,
        &TimeBudget::start(&clock, 0),
        &CancelToken::new(),
    )
    .expect("samples");
    assert!(field.timed_out);
    assert!(field.sampled_nodes() > 0);
    assert!(field.sampled_nodes() < 17 * 17 * 17);
    // A single sampled row has no complete cube.
    assert!(marching_cubes(&field).is_empty());
}

#[test]
fn linear_regression_recovers_line() {
    let points = [[0.0, 1.0], [1.0, 3.0], [2.0, 5.0], [3.0, 7.0]];
    let result = fit(&points, RegressionType::Linear);
    assert!((result.coefficients[0] - 1.0).abs() < 1e-9);
    assert!((result.coefficients[1] - 2.0).abs() < 1e-9);
    assert!((result.r2 - 1.0).abs() < 1e-9);
}

#[test]
fn rk4_growth_reaches_e() {
    let ode = compile_ode("y' = y", &CompileOptions::default()).expect("compiles");
    let system = ode.system(&Scope::new());
    let trajectory = solve(
        &system,
        (0.0, 1.0),
        &[1.0],
        400,
        OdeMethod::Rk4,
        &OdeTolerances::default(),
        &CancelToken::new(),
    )
    .expect("solves");
    let last = trajectory.states.last().expect("non-empty")[0];
    assert!((last - std::f64::consts::E).abs() < 1e-4);
}
