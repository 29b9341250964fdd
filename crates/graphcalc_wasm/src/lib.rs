//! Browser bridge for the graphcalc engine.
//!
//! The page's web worker owns one [`WasmEngine`] and forwards serialized
//! requests to it. Long ODE plots can instead run through
//! [`WasmTrajectoryRunner`] in batches so the worker stays responsive.

use graphcalc_core::budget::{CancelToken, Clock};
use graphcalc_core::equation_engine::{CompileOptions, Scope, Syntax};
use graphcalc_core::ode::{compile_ode, CompiledOde};
use graphcalc_core::settings::EngineSettings;
use graphcalc_core::solvers::RK4;
use graphcalc_core::traits::Steppable;
use graphcalc_core::worker::{dispatch_with_clock, Request};
use graphcalc_core::{classify, EngineError};
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

/// Milliseconds from the JS host; `std::time::Instant` panics on wasm32.
struct JsClock;

impl Clock for JsClock {
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn parse_syntax(name: &str) -> Result<Syntax, JsValue> {
    match name {
        "plain" => Ok(Syntax::Plain),
        "latex" => Ok(Syntax::Latex),
        _ => Err(JsValue::from_str("Unknown syntax")),
    }
}

#[wasm_bindgen]
pub struct WasmEngine {
    settings: EngineSettings,
}

#[wasm_bindgen]
impl WasmEngine {
    /// `settings` may be `undefined` or a partial settings object.
    #[wasm_bindgen(constructor)]
    pub fn new(settings: JsValue) -> Result<WasmEngine, JsValue> {
        console_error_panic_hook::set_once();
        let settings = if settings.is_undefined() || settings.is_null() {
            EngineSettings::default()
        } else {
            from_value(settings)
                .map_err(|e| JsValue::from_str(&format!("Invalid engine settings: {}", e)))?
        };
        Ok(WasmEngine { settings })
    }

    /// Serves one request object and returns the response object. Request
    /// failures come back as error results, never as exceptions.
    pub fn dispatch(&self, request: JsValue) -> Result<JsValue, JsValue> {
        let request: Request =
            from_value(request).map_err(|e| JsValue::from_str(&format!("Invalid request: {}", e)))?;
        let response = dispatch_with_clock(&request, &self.settings, &CancelToken::new(), &JsClock);
        to_value(&response).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn classify(&self, source: &str, syntax: &str) -> Result<JsValue, JsValue> {
        let kind = classify(source, parse_syntax(syntax)?);
        to_value(&kind).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn settings(&self) -> Result<JsValue, JsValue> {
        to_value(&self.settings)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

#[derive(Serialize)]
struct TrajectoryProgress {
    done: bool,
    current_step: usize,
    max_steps: usize,
    /// `[x, y]` samples produced by this batch.
    points: Vec<[f64; 2]>,
}

struct RunnerState {
    ode: CompiledOde,
    scope: Scope,
    stepper: RK4<f64>,
    state: Vec<f64>,
    x: f64,
    dx: f64,
    steps: usize,
    steps_done: usize,
    magnitude_bound: f64,
    done: bool,
}

/// Integrates an ODE forward from `(x0, y0)` a batch of RK4 steps at a time.
#[wasm_bindgen]
pub struct WasmTrajectoryRunner {
    state: Option<RunnerState>,
}

#[wasm_bindgen]
impl WasmTrajectoryRunner {
    #[wasm_bindgen(constructor)]
    pub fn new(
        source: &str,
        syntax: &str,
        scope: JsValue,
        initial_state: Vec<f64>,
        x0: f64,
        x1: f64,
        steps: u32,
    ) -> Result<WasmTrajectoryRunner, JsValue> {
        console_error_panic_hook::set_once();

        if steps == 0 {
            return Err(JsValue::from_str("At least one step is required."));
        }
        if !x0.is_finite() || !x1.is_finite() || x1 == x0 {
            return Err(JsValue::from_str("Span must be finite and non-empty."));
        }
        let scope: Scope = if scope.is_undefined() || scope.is_null() {
            Scope::new()
        } else {
            from_value(scope).map_err(|e| JsValue::from_str(&format!("Invalid scope: {}", e)))?
        };
        let options = CompileOptions {
            syntax: parse_syntax(syntax)?,
            ..CompileOptions::default()
        };
        let ode = compile_ode(source, &options).map_err(js_error)?;
        let dim = ode.dimension();
        if initial_state.len() != dim {
            return Err(js_error(EngineError::InvalidArgument(format!(
                "expected {dim} initial value(s), got {}",
                initial_state.len()
            ))));
        }
        let settings = EngineSettings::default();

        Ok(WasmTrajectoryRunner {
            state: Some(RunnerState {
                ode,
                scope,
                stepper: RK4::new(dim),
                state: initial_state,
                x: x0,
                dx: (x1 - x0) / steps as f64,
                steps: steps as usize,
                steps_done: 0,
                magnitude_bound: settings.magnitude_bound,
                done: false,
            }),
        })
    }

    pub fn is_done(&self) -> bool {
        self.state.as_ref().map_or(true, |state| state.done)
    }

    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;

        let mut points = Vec::new();
        if !state.done {
            let system = state.ode.system(&state.scope);
            for _ in 0..batch_size {
                if state.steps_done >= state.steps {
                    state.done = true;
                    break;
                }
                state
                    .stepper
                    .step(&system, &mut state.x, &mut state.state, state.dx);
                state.steps_done += 1;
                let y = state.state[0];
                if !y.is_finite() || y.abs() > state.magnitude_bound {
                    state.done = true;
                    break;
                }
                points.push([state.x, y]);
            }
            if state.steps_done >= state.steps {
                state.done = true;
            }
        }

        let progress = TrajectoryProgress {
            done: state.done,
            current_step: state.steps_done,
            max_steps: state.steps,
            points,
        };
        to_value(&progress).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphcalc_core::worker::Response;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn engine_round_trips_a_request() {
        let engine = WasmEngine::new(JsValue::UNDEFINED).expect("engine");
        let request = js_sys::JSON::parse(
            r#"{ "op": "find_roots", "source": "x^2 - 4", "min": -10, "max": 10 }"#,
        )
        .expect("valid JSON");
        let response = engine.dispatch(request).expect("dispatches");
        let response: Response = from_value(response).expect("deserializes");
        assert!(matches!(response, Response::Result(_)));
    }

    #[wasm_bindgen_test]
    fn runner_finishes_in_batches() {
        let mut runner = WasmTrajectoryRunner::new(
            "y' = y",
            "plain",
            JsValue::UNDEFINED,
            vec![1.0],
            0.0,
            1.0,
            10,
        )
        .expect("runner");
        runner.run_steps(4).expect("first batch");
        assert!(!runner.is_done());
        runner.run_steps(100).expect("second batch");
        assert!(runner.is_done());
    }
}
