//! The `graphcalc_core` crate is the math engine behind the graphcalc graphing calculator.
//! It compiles user expressions to a small bytecode VM and runs every analysis the
//! front end asks for on top of those compiled functions.
//!
//! Key components:
//! - **Equation Engine**: parser, LaTeX lowering, user function registry, and the bytecode VM.
//! - **Expression**: classification of raw input into algebraic, parametric, polar, implicit, ODE, and point kinds.
//! - **Analysis**: roots, extrema, intersections, Simpson integration, arc length, and curve sampling.
//! - **Implicit**: scalar field sampling with time budgets, marching squares and marching cubes.
//! - **ODE**: derivative rewriting, RK4/adaptive Tsit5 trajectories, and flow fields.
//! - **Symbolic**: rule-table integration with a tree-rewriting fallback, and differentiation.
//! - **Regression**: least-squares linear, quadratic, and exponential fits.
//! - **Worker**: serde request/response enums and the background engine thread.
pub mod analysis;
pub mod budget;
pub mod equation_engine;
pub mod error;
pub mod expression;
pub mod implicit;
pub mod ode;
pub mod regression;
pub mod settings;
pub mod solvers;
pub mod symbolic;
pub mod traits;
pub mod types;
pub mod worker;

pub use budget::CancelToken;
pub use equation_engine::{compile, try_compile, CompileOptions, CompiledFunction, Scope, Syntax};
pub use error::EngineError;
pub use expression::{classify, Expression, ExpressionKind};
pub use settings::EngineSettings;
pub use types::AnalysisResult;
pub use worker::{dispatch, Request, Response, Worker};
