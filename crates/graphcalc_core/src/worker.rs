//! Request dispatch and the background worker thread.
//!
//! [`dispatch`] maps one [`Request`] to one [`Response`] and never fails:
//! errors become [`AnalysisResult::Error`] and cancellation becomes
//! [`Response::Cancelled`]. [`Worker`] runs dispatch on a dedicated thread and
//! serves submitted requests strictly in order.

use crate::analysis::{
    arc_length, find_extrema, find_intersections, find_roots, sample_curve, ExtremumKind,
    SampleRange,
};
use crate::budget::{CancelToken, Clock, SystemClock, TimeBudget};
use crate::equation_engine::latex::latex_to_plain;
use crate::equation_engine::parser::format_number;
use crate::equation_engine::registry::FunctionRegistry;
use crate::equation_engine::{
    try_compile, try_compile_field, CompileOptions, CompiledFunction, Scope, Syntax,
};
use crate::error::EngineError;
use crate::expression::{AnalysisPath, Expression};
use crate::implicit::{
    edge_crossings, marching_cubes, marching_squares, sample_field_2d, sample_field_3d,
    GridBounds, Polyline, Triangle,
};
use crate::ode::{
    compile_ode, flow_field, plot_ode, solve, FlowOptions, OdeMethod, PlotOptions, Trajectory,
};
use crate::regression::{fit, RegressionResult, RegressionType};
use crate::settings::EngineSettings;
use crate::symbolic::{self, IntegrationResult};
use crate::types::AnalysisResult;
use anyhow::{bail, Context as _, Result};
use log::{debug, error, trace, warn};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Inputs shared by every expression-based request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub syntax: Syntax,
    #[serde(default)]
    pub scope: Scope,
    /// User function definitions such as `f(x) = x^2`, written in `syntax`.
    #[serde(default)]
    pub functions: Vec<String>,
}

impl Context {
    fn registry(&self) -> Result<FunctionRegistry> {
        let definitions = self
            .functions
            .iter()
            .map(|source| {
                Expression::new(source, self.syntax)
                    .function_definition()
                    .with_context(|| format!("`{source}` is not a function definition."))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(FunctionRegistry::from_definitions(definitions)?)
    }

    fn options<'a>(
        &self,
        registry: &'a FunctionRegistry,
        settings: &EngineSettings,
    ) -> CompileOptions<'a> {
        let options = CompileOptions {
            syntax: self.syntax,
            functions: None,
            sum_iteration_cap: settings.sum_iteration_cap,
        };
        if registry.is_empty() {
            options
        } else {
            options.with_functions(registry)
        }
    }

    /// Lowers LaTeX to the plain grammar for the symbolic layer.
    fn plain(&self, source: &str) -> Result<String> {
        match self.syntax {
            Syntax::Plain => Ok(source.to_string()),
            Syntax::Latex => Ok(latex_to_plain(source)?),
        }
    }
}

/// One unit of work. Optional sample counts and limits fall back to
/// [`EngineSettings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CompileCheck {
        source: String,
        #[serde(flatten)]
        context: Context,
    },
    SampleCurve {
        source: String,
        min: f64,
        max: f64,
        samples: Option<usize>,
        #[serde(flatten)]
        context: Context,
    },
    FindRoots {
        source: String,
        min: f64,
        max: f64,
        samples: Option<usize>,
        #[serde(flatten)]
        context: Context,
    },
    FindExtrema {
        source: String,
        min: f64,
        max: f64,
        samples: Option<usize>,
        #[serde(flatten)]
        context: Context,
    },
    FindIntersections {
        first: String,
        second: String,
        min: f64,
        max: f64,
        samples: Option<usize>,
        limit: Option<usize>,
        #[serde(flatten)]
        context: Context,
    },
    IntegrateDefinite {
        source: String,
        #[serde(default = "default_variable")]
        variable: String,
        a: f64,
        b: f64,
        intervals: Option<usize>,
        #[serde(flatten)]
        context: Context,
    },
    ArcLength {
        source: String,
        a: f64,
        b: f64,
        intervals: Option<usize>,
        #[serde(flatten)]
        context: Context,
    },
    IntegrateSymbolic {
        source: String,
        #[serde(default = "default_variable")]
        variable: String,
        #[serde(default)]
        syntax: Syntax,
    },
    Differentiate {
        source: String,
        #[serde(default = "default_variable")]
        variable: String,
        #[serde(default)]
        syntax: Syntax,
    },
    SolveOde {
        source: String,
        t0: f64,
        t1: f64,
        y0: Vec<f64>,
        steps: usize,
        #[serde(default)]
        method: OdeMethod,
        #[serde(flatten)]
        context: Context,
    },
    PlotOde {
        source: String,
        x0: f64,
        y0: Vec<f64>,
        min: f64,
        max: f64,
        steps: Option<usize>,
        #[serde(default)]
        method: OdeMethod,
        #[serde(flatten)]
        context: Context,
    },
    FlowField {
        fx: String,
        fy: String,
        bounds: [GridBounds; 2],
        grid: Option<usize>,
        steps: Option<usize>,
        dt: Option<f64>,
        #[serde(flatten)]
        context: Context,
    },
    #[serde(rename = "sample_implicit_2d")]
    SampleImplicit2d {
        source: String,
        bounds: [GridBounds; 2],
        resolution: usize,
        #[serde(flatten)]
        context: Context,
    },
    #[serde(rename = "sample_implicit_3d")]
    SampleImplicit3d {
        source: String,
        bounds: [GridBounds; 3],
        resolution: usize,
        #[serde(flatten)]
        context: Context,
    },
    EdgeCrossings {
        source: String,
        bounds: [GridBounds; 2],
        resolution: usize,
        max_points: Option<usize>,
        #[serde(flatten)]
        context: Context,
    },
    Regression {
        points: Vec<[f64; 2]>,
        model: RegressionType,
    },
}

fn default_variable() -> String {
    "x".to_string()
}

const FLOW_GRID: usize = 15;
const FLOW_STEPS: usize = 30;
const FLOW_DT: f64 = 0.05;

impl Request {
    /// The wire name of the operation.
    pub fn op(&self) -> &'static str {
        match self {
            Request::CompileCheck { .. } => "compile_check",
            Request::SampleCurve { .. } => "sample_curve",
            Request::FindRoots { .. } => "find_roots",
            Request::FindExtrema { .. } => "find_extrema",
            Request::FindIntersections { .. } => "find_intersections",
            Request::IntegrateDefinite { .. } => "integrate_definite",
            Request::ArcLength { .. } => "arc_length",
            Request::IntegrateSymbolic { .. } => "integrate_symbolic",
            Request::Differentiate { .. } => "differentiate",
            Request::SolveOde { .. } => "solve_ode",
            Request::PlotOde { .. } => "plot_ode",
            Request::FlowField { .. } => "flow_field",
            Request::SampleImplicit2d { .. } => "sample_implicit_2d",
            Request::SampleImplicit3d { .. } => "sample_implicit_3d",
            Request::EdgeCrossings { .. } => "edge_crossings",
            Request::Regression { .. } => "regression",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Response {
    Result(AnalysisResult),
    Integration(IntegrationResult),
    Regression(RegressionResult),
    Trajectory(Trajectory),
    Derivative {
        expression: String,
    },
    Contours {
        polylines: Vec<Polyline>,
        timed_out: bool,
    },
    Mesh {
        triangles: Vec<Triangle>,
        timed_out: bool,
    },
    Cancelled,
}

/// Serves a request on the calling thread with the system clock.
pub fn dispatch(request: &Request, settings: &EngineSettings, cancel: &CancelToken) -> Response {
    dispatch_with_clock(request, settings, cancel, &SystemClock::new())
}

/// Serves a request, timing field sampling against `clock`.
pub fn dispatch_with_clock(
    request: &Request,
    settings: &EngineSettings,
    cancel: &CancelToken,
    clock: &dyn Clock,
) -> Response {
    trace!("Dispatching {} request", request.op());
    if cancel.is_cancelled() {
        return Response::Cancelled;
    }
    match handle(request, settings, cancel, clock) {
        Ok(response) => response,
        Err(err) if matches!(err.downcast_ref::<EngineError>(), Some(EngineError::Cancelled)) => {
            debug!("{} request was cancelled", request.op());
            Response::Cancelled
        }
        Err(err) => {
            debug!("{} request failed: {err:#}", request.op());
            Response::Result(AnalysisResult::error(request.op(), format!("{err:#}")))
        }
    }
}

fn compile_function(
    source: &str,
    options: &CompileOptions<'_>,
    path: AnalysisPath,
) -> Result<CompiledFunction> {
    let kind = Expression::new(source, options.syntax).kind();
    if !kind.supports(path) {
        bail!("Expressions of kind {kind:?} do not support this analysis.");
    }
    Ok(try_compile(source, options)?)
}

/// Compiles `source` as a scalar field whose zero set is the curve or surface.
fn compile_field(
    source: &str,
    options: &CompileOptions<'_>,
    resolution: usize,
    settings: &EngineSettings,
) -> Result<CompiledFunction> {
    if resolution > settings.max_resolution {
        return Err(EngineError::InvalidArgument(format!(
            "Grid resolution {resolution} exceeds the limit of {}.",
            settings.max_resolution
        ))
        .into());
    }
    let kind = Expression::new(source, options.syntax).kind();
    if !kind.supports(AnalysisPath::FieldContours) {
        bail!("Expressions of kind {kind:?} do not define a level set.");
    }
    Ok(try_compile_field(source, options)?)
}

fn point_set(points: Vec<[f64; 2]>, method: &str, steps: Vec<String>) -> Response {
    Response::Result(AnalysisResult::PointSet {
        points,
        method: method.to_string(),
        steps,
    })
}

fn open_polylines(lines: Vec<Vec<[f64; 2]>>) -> Vec<Polyline> {
    lines
        .into_iter()
        .map(|points| Polyline {
            points,
            closed: false,
        })
        .collect()
}

fn handle(
    request: &Request,
    settings: &EngineSettings,
    cancel: &CancelToken,
    clock: &dyn Clock,
) -> Result<Response> {
    match request {
        Request::CompileCheck { source, context } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let expression = Expression::new(source, context.syntax);
            let kind = expression.kind();
            let is_ode = kind.supports(AnalysisPath::OdeTrajectory);
            let (value, symbols): (f64, Vec<String>) = if is_ode {
                let ode = compile_ode(source, &options)?;
                (f64::NAN, ode.function.symbols().map(str::to_string).collect())
            } else {
                let compiled = try_compile(source, &options)?;
                let symbols = compiled.symbols().map(str::to_string).collect();
                (compiled.eval(&context.scope), symbols)
            };
            Ok(Response::Result(AnalysisResult::Scalar {
                value,
                method: "compile".to_string(),
                steps: vec![
                    format!("kind: {kind:?}"),
                    format!("symbols: {}", symbols.join(", ")),
                ],
            }))
        }
        Request::SampleCurve {
            source,
            min,
            max,
            samples,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let range = SampleRange::new(*min, *max, samples.unwrap_or(settings.samples));
            let expression = Expression::new(source, context.syntax);
            let curve = sample_curve(&expression, &context.scope, range, &options, cancel)?;
            Ok(Response::Result(AnalysisResult::ContourSet {
                polylines: open_polylines(curve.segments),
                timed_out: false,
                method: "uniform_sampling".to_string(),
                steps: Vec::new(),
            }))
        }
        Request::FindRoots {
            source,
            min,
            max,
            samples,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let compiled = compile_function(source, &options, AnalysisPath::FunctionAnalysis)?;
            let mut f = compiled.bind(&context.scope, &["x"]);
            let range = SampleRange::new(*min, *max, samples.unwrap_or(settings.samples));
            let values = find_roots(|x| f.eval1(x), range, cancel)?;
            Ok(Response::Result(AnalysisResult::Vector {
                values,
                method: "sign_change".to_string(),
                steps: Vec::new(),
            }))
        }
        Request::FindExtrema {
            source,
            min,
            max,
            samples,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let compiled = compile_function(source, &options, AnalysisPath::FunctionAnalysis)?;
            let mut f = compiled.bind(&context.scope, &["x"]);
            let range = SampleRange::new(*min, *max, samples.unwrap_or(settings.samples));
            let extrema = find_extrema(|x| f.eval1(x), range, cancel)?;
            let steps = extrema
                .iter()
                .map(|extremum| {
                    let kind = match extremum.kind {
                        ExtremumKind::Maximum => "maximum",
                        ExtremumKind::Minimum => "minimum",
                    };
                    format!("{kind} at x = {}", format_number(extremum.x))
                })
                .collect();
            let points = extrema.iter().map(|extremum| [extremum.x, extremum.y]).collect();
            Ok(point_set(points, "derivative_sign_change", steps))
        }
        Request::FindIntersections {
            first,
            second,
            min,
            max,
            samples,
            limit,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let f_compiled = compile_function(first, &options, AnalysisPath::FunctionAnalysis)?;
            let g_compiled = compile_function(second, &options, AnalysisPath::FunctionAnalysis)?;
            let mut f = f_compiled.bind(&context.scope, &["x"]);
            let mut g = g_compiled.bind(&context.scope, &["x"]);
            let range = SampleRange::new(*min, *max, samples.unwrap_or(settings.samples));
            let limit = limit.unwrap_or(settings.max_intersections);
            let points =
                find_intersections(|x| f.eval1(x), |x| g.eval1(x), range, limit, cancel)?;
            Ok(point_set(points, "sign_change", Vec::new()))
        }
        Request::IntegrateDefinite {
            source,
            variable,
            a,
            b,
            intervals,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let plain = context.plain(source)?;
            let intervals = intervals.unwrap_or(settings.simpson_intervals);
            let integral = symbolic::definite_integral(
                &plain,
                variable,
                (*a, *b),
                &context.scope,
                &options,
                intervals,
            )?;
            Ok(Response::Result(AnalysisResult::Scalar {
                value: integral.value,
                method: integral.method,
                steps: integral.steps,
            }))
        }
        Request::ArcLength {
            source,
            a,
            b,
            intervals,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let compiled = compile_function(source, &options, AnalysisPath::FunctionAnalysis)?;
            let mut f = compiled.bind(&context.scope, &["x"]);
            let intervals = intervals.unwrap_or(settings.simpson_intervals);
            let value = arc_length(|x| f.eval1(x), *a, *b, intervals);
            if !value.is_finite() {
                bail!("Arc length of `{source}` over [{a}, {b}] is not finite.");
            }
            Ok(Response::Result(AnalysisResult::Scalar {
                value,
                method: "simpson".to_string(),
                steps: Vec::new(),
            }))
        }
        Request::IntegrateSymbolic {
            source,
            variable,
            syntax,
        } => {
            let context = Context {
                syntax: *syntax,
                ..Context::default()
            };
            Ok(match context.plain(source) {
                Ok(plain) => Response::Integration(symbolic::integrate(&plain, variable)),
                Err(err) => Response::Integration(IntegrationResult {
                    ok: false,
                    error: Some(format!("{err:#}")),
                    ..IntegrationResult::default()
                }),
            })
        }
        Request::Differentiate {
            source,
            variable,
            syntax,
        } => {
            let context = Context {
                syntax: *syntax,
                ..Context::default()
            };
            let plain = context.plain(source)?;
            let expression = symbolic::differentiate(&plain, variable)?;
            Ok(Response::Derivative { expression })
        }
        Request::SolveOde {
            source,
            t0,
            t1,
            y0,
            steps,
            method,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let ode = compile_ode(source, &options)?;
            let system = ode.system(&context.scope);
            let trajectory =
                solve(&system, (*t0, *t1), y0, *steps, *method, &settings.ode, cancel)?;
            Ok(Response::Trajectory(trajectory))
        }
        Request::PlotOde {
            source,
            x0,
            y0,
            min,
            max,
            steps,
            method,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let ode = compile_ode(source, &options)?;
            let system = ode.system(&context.scope);
            let plot_options = PlotOptions {
                steps: steps.unwrap_or(settings.samples),
                method: *method,
                magnitude_bound: settings.magnitude_bound,
                tolerances: settings.ode,
            };
            let points = plot_ode(&system, *x0, y0, (*min, *max), &plot_options, cancel)?;
            Ok(point_set(points, "plot_ode", Vec::new()))
        }
        Request::FlowField {
            fx,
            fy,
            bounds,
            grid,
            steps,
            dt,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let fx = try_compile(fx, &options)?;
            let fy = try_compile(fy, &options)?;
            let flow_options = FlowOptions {
                grid: grid.unwrap_or(FLOW_GRID),
                steps: steps.unwrap_or(FLOW_STEPS),
                dt: dt.unwrap_or(FLOW_DT),
                magnitude_bound: settings.magnitude_bound,
            };
            let lines = flow_field(&fx, &fy, &context.scope, *bounds, &flow_options, cancel)?;
            Ok(Response::Result(AnalysisResult::ContourSet {
                polylines: open_polylines(lines),
                timed_out: false,
                method: "rk4".to_string(),
                steps: Vec::new(),
            }))
        }
        Request::SampleImplicit2d {
            source,
            bounds,
            resolution,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let compiled = compile_field(source, &options, *resolution, settings)?;
            let mut f = compiled.bind(&context.scope, &["x", "y"]);
            let budget = TimeBudget::start(clock, settings.field_time_budget_ms);
            let field =
                sample_field_2d(|x, y| f.eval(&[x, y]), *bounds, *resolution, &budget, cancel)?;
            Ok(Response::Contours {
                polylines: marching_squares(&field),
                timed_out: field.timed_out,
            })
        }
        Request::SampleImplicit3d {
            source,
            bounds,
            resolution,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let compiled = compile_field(source, &options, *resolution, settings)?;
            let mut f = compiled.bind(&context.scope, &["x", "y", "z"]);
            let budget = TimeBudget::start(clock, settings.field_time_budget_ms);
            let field = sample_field_3d(
                |x, y, z| f.eval(&[x, y, z]),
                *bounds,
                *resolution,
                &budget,
                cancel,
            )?;
            Ok(Response::Mesh {
                triangles: marching_cubes(&field),
                timed_out: field.timed_out,
            })
        }
        Request::EdgeCrossings {
            source,
            bounds,
            resolution,
            max_points,
            context,
        } => {
            let registry = context.registry()?;
            let options = context.options(&registry, settings);
            let compiled = compile_field(source, &options, *resolution, settings)?;
            let mut f = compiled.bind(&context.scope, &["x", "y"]);
            let budget = TimeBudget::start(clock, settings.field_time_budget_ms);
            let field =
                sample_field_2d(|x, y| f.eval(&[x, y]), *bounds, *resolution, &budget, cancel)?;
            let points = edge_crossings(&field, max_points.unwrap_or(settings.max_contour_points));
            let steps = if field.timed_out {
                vec!["Sampling hit the time budget; the point cloud is partial.".to_string()]
            } else {
                Vec::new()
            };
            Ok(point_set(points, "edge_crossings", steps))
        }
        Request::Regression { points, model } => Ok(Response::Regression(fit(points, *model))),
    }
}

/// Runs `serve`, turning a panic into an error result so the worker thread
/// outlives it.
fn guarded(op: &str, serve: impl FnOnce() -> Response) -> Response {
    panic::catch_unwind(AssertUnwindSafe(serve)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|text| text.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("{op} request panicked: {message}");
        Response::Result(AnalysisResult::error(
            op,
            format!("Internal error while serving {op}: {message}"),
        ))
    })
}

struct Job {
    request: Request,
    cancel: CancelToken,
    reply: mpsc::Sender<Response>,
}

/// A pending response from a [`Worker`].
pub struct Ticket {
    receiver: mpsc::Receiver<Response>,
    cancel: CancelToken,
}

impl Ticket {
    /// Abandons the request. The worker answers [`Response::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Blocks until the worker answers. A worker that went away without
    /// answering reads as cancellation.
    pub fn wait(self) -> Response {
        self.receiver.recv().unwrap_or(Response::Cancelled)
    }

    /// The response, if it has arrived.
    pub fn try_response(&self) -> Option<Response> {
        self.receiver.try_recv().ok()
    }
}

/// Owns the engine thread. Dropping the worker drains the queue and joins.
pub struct Worker {
    sender: Option<mpsc::Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(settings: EngineSettings) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name("graphcalc-engine".to_string())
            .spawn(move || {
                debug!("Engine worker started");
                let clock = SystemClock::new();
                for job in receiver {
                    let response = guarded(job.request.op(), || {
                        dispatch_with_clock(&job.request, &settings, &job.cancel, &clock)
                    });
                    let response = if job.cancel.is_cancelled() {
                        Response::Cancelled
                    } else {
                        response
                    };
                    // The requester may have dropped its ticket.
                    let _ = job.reply.send(response);
                }
                debug!("Engine worker stopped");
            })
            .context("Failed to spawn the engine worker thread.")?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub fn submit(&self, request: Request) -> Ticket {
        let (reply, receiver) = mpsc::channel();
        let cancel = CancelToken::new();
        let job = Job {
            request,
            cancel: cancel.clone(),
            reply,
        };
        match &self.sender {
            Some(sender) if sender.send(job).is_ok() => {}
            _ => warn!("Engine worker is gone; request dropped"),
        }
        Ticket { receiver, cancel }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Engine worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> Request {
        serde_json::from_str(json).expect("valid request")
    }

    fn run(json: &str) -> Response {
        dispatch(&request(json), &EngineSettings::default(), &CancelToken::new())
    }

    #[test]
    fn op_names_match_the_wire_tag() {
        let parsed = request(
            r#"{ "op": "sample_implicit_2d", "source": "x^2 + y^2 = 1",
                 "bounds": [{ "min": -2, "max": 2 }, { "min": -2, "max": 2 }],
                 "resolution": 40 }"#,
        );
        assert_eq!(parsed.op(), "sample_implicit_2d");
        let json = serde_json::to_value(&parsed).expect("serializes");
        assert_eq!(json["op"], "sample_implicit_2d");
    }

    #[test]
    fn finds_roots_with_default_samples() {
        let response = run(r#"{ "op": "find_roots", "source": "x^2 - 4", "min": -10, "max": 10 }"#);
        let Response::Result(AnalysisResult::Vector { values, .. }) = response else {
            panic!("expected a vector, got {response:?}");
        };
        assert_eq!(values.len(), 2);
        assert!((values[0] + 2.0).abs() < 1e-6);
        assert!((values[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn scope_and_user_functions_reach_the_compiler() {
        let response = run(
            r#"{ "op": "find_roots", "source": "f(x) - a", "min": 0, "max": 10,
                 "scope": { "a": 9 }, "functions": ["f(x) = x^2"] }"#,
        );
        let Response::Result(AnalysisResult::Vector { values, .. }) = response else {
            panic!("expected a vector, got {response:?}");
        };
        assert_eq!(values.len(), 1);
        assert!((values[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn errors_become_error_results() {
        let response = run(r#"{ "op": "find_roots", "source": "x^2 +", "min": -1, "max": 1 }"#);
        let Response::Result(result) = response else {
            panic!("expected a result");
        };
        assert!(result.is_error());
        assert_eq!(result.method(), "find_roots");
    }

    #[test]
    fn symbolic_requests() {
        let Response::Integration(result) =
            run(r#"{ "op": "integrate_symbolic", "source": "3*x^2 + 2*x + 1" }"#)
        else {
            panic!("expected an integration result");
        };
        assert_eq!(result.result.as_deref(), Some("x^3 + x^2 + x"));

        let response = run(r#"{ "op": "differentiate", "source": "x^3 - x" }"#);
        assert_eq!(
            response,
            Response::Derivative {
                expression: "3*x^2 - 1".to_string()
            }
        );
    }

    #[test]
    fn definite_integral_reports_method() {
        let response = run(r#"{ "op": "integrate_definite", "source": "2*x", "a": 0, "b": 3 }"#);
        let Response::Result(AnalysisResult::Scalar { value, method, .. }) = response else {
            panic!("expected a scalar, got {response:?}");
        };
        assert!((value - 9.0).abs() < 1e-9);
        assert_eq!(method, "antiderivative");
    }

    #[test]
    fn implicit_circle_contours() {
        let response = run(
            r#"{ "op": "sample_implicit_2d", "source": "x^2 + y^2 = 1",
                 "bounds": [{ "min": -2, "max": 2 }, { "min": -2, "max": 2 }],
                 "resolution": 40 }"#,
        );
        let Response::Contours { polylines, timed_out } = response else {
            panic!("expected contours, got {response:?}");
        };
        assert!(!timed_out);
        assert!(!polylines.is_empty());
        for point in polylines.iter().flat_map(|line| &line.points) {
            let radius = (point[0] * point[0] + point[1] * point[1]).sqrt();
            assert!((radius - 1.0).abs() < 0.05, "radius {radius}");
        }
    }

    #[test]
    fn solves_ode_requests() {
        let response = run(
            r#"{ "op": "solve_ode", "source": "y' = y", "t0": 0, "t1": 1, "y0": [1], "steps": 100 }"#,
        );
        let Response::Trajectory(trajectory) = response else {
            panic!("expected a trajectory, got {response:?}");
        };
        assert_eq!(trajectory.len(), 101);
        let last = trajectory.states.last().expect("non-empty")[0];
        assert!((last - std::f64::consts::E).abs() < 1e-6);
    }

    #[test]
    fn regression_request() {
        let response = run(
            r#"{ "op": "regression", "points": [[0, 1], [1, 3], [2, 5]], "model": "linear" }"#,
        );
        let Response::Regression(result) = response else {
            panic!("expected a regression");
        };
        assert!((result.coefficients[1] - 2.0).abs() < 1e-9);
        assert!((result.r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let response = dispatch(
            &request(r#"{ "op": "find_roots", "source": "x", "min": -1, "max": 1 }"#),
            &EngineSettings::default(),
            &cancel,
        );
        assert_eq!(response, Response::Cancelled);
    }

    #[test]
    fn response_is_adjacently_tagged() {
        let json = serde_json::to_value(Response::Cancelled).expect("serializes");
        assert_eq!(json["kind"], "cancelled");
        let json = serde_json::to_value(Response::Derivative {
            expression: "2*x".to_string(),
        })
        .expect("serializes");
        assert_eq!(json["kind"], "derivative");
        assert_eq!(json["data"]["expression"], "2*x");
    }

    #[test]
    fn worker_answers_in_order() {
        let worker = Worker::spawn(EngineSettings::default()).expect("spawns");
        let first = worker.submit(request(
            r#"{ "op": "find_roots", "source": "x - 1", "min": -5, "max": 5 }"#,
        ));
        let second = worker.submit(request(
            r#"{ "op": "regression", "points": [[0, 0], [1, 1]], "model": "linear" }"#,
        ));
        assert!(matches!(
            first.wait(),
            Response::Result(AnalysisResult::Vector { .. })
        ));
        assert!(matches!(second.wait(), Response::Regression(_)));
    }

    #[test]
    fn cancelled_ticket_reads_cancelled() {
        let worker = Worker::spawn(EngineSettings::default()).expect("spawns");
        let ticket = worker.submit(request(
            r#"{ "op": "find_roots", "source": "sin(x)", "min": -50, "max": 50 }"#,
        ));
        ticket.cancel();
        assert!(ticket.is_cancelled());
        assert_eq!(ticket.wait(), Response::Cancelled);
    }

    #[test]
    fn panics_become_error_results() {
        let response = guarded("find_roots", || panic!("stack exhausted"));
        let Response::Result(AnalysisResult::Error { message, method, .. }) = response else {
            panic!("expected an error result, got {response:?}");
        };
        assert_eq!(method, "find_roots");
        assert!(message.contains("stack exhausted"), "{message}");

        let response = guarded("regression", || Response::Cancelled);
        assert_eq!(response, Response::Cancelled);
    }

    #[test]
    fn dropping_the_worker_drains_the_queue() {
        let worker = Worker::spawn(EngineSettings::default()).expect("spawns");
        let ticket = worker.submit(request(
            r#"{ "op": "regression", "points": [[0, 1], [1, 2]], "model": "linear" }"#,
        ));
        drop(worker);
        assert!(matches!(ticket.wait(), Response::Regression(_)));
    }
}
