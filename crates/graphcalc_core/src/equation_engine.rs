//! Expression compiler: source text → bytecode → stack VM.
//!
//! Plain text is parsed directly; LaTeX is first lowered to plain text by
//! [`latex::latex_to_plain`]. The resulting [`CompiledFunction`] is immutable,
//! `Send + Sync`, and never panics during evaluation: domain violations and
//! malformed stacks surface as NaN.

pub mod latex;
pub mod parser;
pub mod registry;

use crate::analysis::integrate_simpson;
use crate::error::EngineError;
use log::debug;
use parser::{builtin_arity, constant_value, parse_equation, Equation, Expr, ReduceKind, Relation};
use registry::FunctionRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Symbol name → value. Scopes are combined by override and never mutated across
/// evaluations; each call works on its own snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(BTreeMap<String, f64>);

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// A copy of this scope with `name` bound to `value`.
    pub fn with(&self, name: &str, value: f64) -> Scope {
        let mut next = self.clone();
        next.0.insert(name.to_string(), value);
        next
    }

    /// A copy of this scope overridden by every binding in `other`.
    pub fn merged(&self, other: &Scope) -> Scope {
        let mut next = self.clone();
        for (name, value) in &other.0 {
            next.0.insert(name.clone(), *value);
        }
        next
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Scope {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Scope(iter.into_iter().map(|(name, value)| (name.into(), value)).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Syntax {
    #[default]
    Plain,
    Latex,
}

/// One-argument builtins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Func1 {
    Sin,
    Cos,
    Tan,
    Sec,
    Csc,
    Cot,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Sqrt,
    Cbrt,
    Exp,
    Ln,
    Log10,
    Log2,
    Abs,
    Floor,
    Ceil,
    Round,
    Sign,
}

impl Func1 {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Func1::Sin,
            "cos" => Func1::Cos,
            "tan" => Func1::Tan,
            "sec" => Func1::Sec,
            "csc" => Func1::Csc,
            "cot" => Func1::Cot,
            "asin" | "arcsin" => Func1::Asin,
            "acos" | "arccos" => Func1::Acos,
            "atan" | "arctan" => Func1::Atan,
            "sinh" => Func1::Sinh,
            "cosh" => Func1::Cosh,
            "tanh" => Func1::Tanh,
            "sqrt" => Func1::Sqrt,
            "cbrt" => Func1::Cbrt,
            "exp" => Func1::Exp,
            // Plain-text `log` is the natural logarithm; LaTeX `\log` lowers to `log10`.
            "ln" | "log" => Func1::Ln,
            "log10" => Func1::Log10,
            "log2" => Func1::Log2,
            "abs" => Func1::Abs,
            "floor" => Func1::Floor,
            "ceil" => Func1::Ceil,
            "round" => Func1::Round,
            "sign" => Func1::Sign,
            _ => return None,
        })
    }

    pub fn apply(self, a: f64) -> f64 {
        match self {
            Func1::Sin => a.sin(),
            Func1::Cos => a.cos(),
            Func1::Tan => a.tan(),
            Func1::Sec => 1.0 / a.cos(),
            Func1::Csc => 1.0 / a.sin(),
            Func1::Cot => 1.0 / a.tan(),
            Func1::Asin => a.asin(),
            Func1::Acos => a.acos(),
            Func1::Atan => a.atan(),
            Func1::Sinh => a.sinh(),
            Func1::Cosh => a.cosh(),
            Func1::Tanh => a.tanh(),
            Func1::Sqrt => a.sqrt(),
            Func1::Cbrt => a.cbrt(),
            Func1::Exp => a.exp(),
            Func1::Ln => a.ln(),
            Func1::Log10 => a.log10(),
            Func1::Log2 => a.log2(),
            Func1::Abs => a.abs(),
            Func1::Floor => a.floor(),
            Func1::Ceil => a.ceil(),
            Func1::Round => a.round(),
            Func1::Sign => {
                if a.is_nan() || a == 0.0 {
                    a
                } else {
                    a.signum()
                }
            }
        }
    }
}

/// Two-argument builtins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Func2 {
    Min,
    Max,
    Mod,
    NRoot,
    LogBase,
    Atan2,
}

impl Func2 {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "min" => Func2::Min,
            "max" => Func2::Max,
            "mod" => Func2::Mod,
            "nroot" => Func2::NRoot,
            "logbase" => Func2::LogBase,
            "atan2" => Func2::Atan2,
            _ => return None,
        })
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Func2::Min => a.min(b),
            Func2::Max => a.max(b),
            Func2::Mod => a.rem_euclid(b),
            Func2::NRoot => {
                // Odd integer roots of negative numbers stay real.
                if a < 0.0 && b.fract() == 0.0 && (b as i64) % 2 != 0 {
                    -(-a).powf(1.0 / b)
                } else {
                    a.powf(1.0 / b)
                }
            }
            Func2::LogBase => a.ln() / b.ln(),
            Func2::Atan2 => a.atan2(b),
        }
    }
}

/// OpCodes for the stack-based virtual machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant value onto the stack.
    LoadConst(f64),
    /// Pushes the value held in a symbol slot.
    LoadVar(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes -a.
    Neg,
    Call1(Func1),
    Call2(Func2),
    /// Pops (b, a), pushes 1 if `a rel b` holds, else 0.
    Compare(Relation),
    /// Pops (b, a), pushes 1 if both are non-zero.
    And,
    /// Pops (condition, value), pushes value where the condition holds, else NaN.
    Restrict,
    /// Pops (upper, lower) and folds subprogram `program` over the bound index
    /// held in `slot`.
    Reduce {
        kind: ReduceKind,
        slot: usize,
        program: usize,
    },
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
    /// Bodies of `Reduce` ops.
    pub programs: Vec<Bytecode>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }
}

const INTEGRAL_INTERVALS: usize = 200;

/// Stack-based virtual machine.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: instructions to run.
/// - `slots`: symbol values, indexed by `LoadVar`. Reduction indices are written here.
/// - `stack`: a mutable buffer for intermediate computations.
pub struct VM;

impl VM {
    pub fn execute(bytecode: &Bytecode, slots: &mut [f64], stack: &mut Vec<f64>, cap: usize) -> f64 {
        stack.clear();
        Self::run(bytecode, slots, stack, cap);
        // A well-formed program leaves exactly one value.
        if stack.len() == 1 {
            stack.pop().unwrap_or(f64::NAN)
        } else {
            f64::NAN
        }
    }

    fn run(bytecode: &Bytecode, slots: &mut [f64], stack: &mut Vec<f64>, cap: usize) {
        fn pop(stack: &mut Vec<f64>) -> f64 {
            stack.pop().unwrap_or(f64::NAN)
        }

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(val),
                OpCode::LoadVar(idx) => stack.push(slots.get(idx).copied().unwrap_or(f64::NAN)),
                OpCode::Add => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a + b);
                }
                OpCode::Sub => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a - b);
                }
                OpCode::Mul => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a * b);
                }
                OpCode::Div => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a / b);
                }
                OpCode::Pow => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(power(a, b));
                }
                OpCode::Neg => {
                    let a = pop(stack);
                    stack.push(-a);
                }
                OpCode::Call1(func) => {
                    let a = pop(stack);
                    stack.push(func.apply(a));
                }
                OpCode::Call2(func) => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(func.apply(a, b));
                }
                OpCode::Compare(relation) => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(if relation.holds(a, b) { 1.0 } else { 0.0 });
                }
                OpCode::And => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(if truthy(a) && truthy(b) { 1.0 } else { 0.0 });
                }
                OpCode::Restrict => {
                    let condition = pop(stack);
                    let value = pop(stack);
                    stack.push(if truthy(condition) { value } else { f64::NAN });
                }
                OpCode::Reduce {
                    kind,
                    slot,
                    program,
                } => {
                    let upper = pop(stack);
                    let lower = pop(stack);
                    let value = match bytecode.programs.get(program) {
                        Some(body) => reduce(kind, body, slot, lower, upper, slots, cap),
                        None => f64::NAN,
                    };
                    stack.push(value);
                }
            }
        }
    }
}

fn truthy(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

/// `a^b` with real odd roots of negative bases (`(-8)^(1/3) = -2`).
fn power(a: f64, b: f64) -> f64 {
    if a < 0.0 && b.fract() != 0.0 {
        let reciprocal = 1.0 / b;
        if (reciprocal - reciprocal.round()).abs() < 1e-9 && (reciprocal.round() as i64) % 2 != 0 {
            return -(-a).powf(b);
        }
    }
    a.powf(b)
}

fn reduce(
    kind: ReduceKind,
    body: &Bytecode,
    slot: usize,
    lower: f64,
    upper: f64,
    slots: &mut [f64],
    cap: usize,
) -> f64 {
    if !lower.is_finite() || !upper.is_finite() || slot >= slots.len() {
        return f64::NAN;
    }
    let saved = slots[slot];
    let mut stack = Vec::with_capacity(16);
    let value = match kind {
        ReduceKind::Sum | ReduceKind::Product => {
            let (lower, upper) = (lower.round(), upper.round());
            // Compared in f64: bounds beyond the i64 range must not wrap.
            if upper - lower >= cap as f64 {
                return f64::NAN;
            }
            let count = if upper >= lower { (upper - lower) as usize + 1 } else { 0 };
            let mut acc = if kind == ReduceKind::Sum { 0.0 } else { 1.0 };
            for k in 0..count {
                slots[slot] = lower + k as f64;
                stack.clear();
                VM::run(body, slots, &mut stack, cap);
                let term = stack.pop().unwrap_or(f64::NAN);
                if kind == ReduceKind::Sum {
                    acc += term;
                } else {
                    acc *= term;
                }
            }
            acc
        }
        ReduceKind::Integral => integrate_simpson(
            |x| {
                slots[slot] = x;
                stack.clear();
                VM::run(body, slots, &mut stack, cap);
                stack.pop().unwrap_or(f64::NAN)
            },
            lower,
            upper,
            INTEGRAL_INTERVALS,
        ),
    };
    slots[slot] = saved;
    value
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves symbol names to slot indices, allocating slots on first use.
pub struct Compiler<'a> {
    pub var_map: HashMap<String, usize>,
    pub symbols: Vec<String>,
    functions: Option<&'a FunctionRegistry>,
}

impl<'a> Compiler<'a> {
    pub fn new(functions: Option<&'a FunctionRegistry>) -> Self {
        Self {
            var_map: HashMap::new(),
            symbols: Vec::new(),
            functions,
        }
    }

    fn slot(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.var_map.get(name) {
            return idx;
        }
        let idx = self.symbols.len();
        self.symbols.push(name.to_string());
        self.var_map.insert(name.to_string(), idx);
        idx
    }

    pub fn compile(&mut self, expr: &Expr) -> Result<Bytecode, EngineError> {
        let mut bytecode = Bytecode::new();
        self.compile_recursive(expr, &mut bytecode)?;
        Ok(bytecode)
    }

    fn compile_recursive(&mut self, expr: &Expr, code: &mut Bytecode) -> Result<(), EngineError> {
        match expr {
            Expr::Number(n) => code.ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => match constant_value(name) {
                Some(value) => code.ops.push(OpCode::LoadConst(value)),
                None => {
                    let idx = self.slot(name);
                    code.ops.push(OpCode::LoadVar(idx));
                }
            },
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, code)?;
                self.compile_recursive(right, code)?;
                code.ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    _ => {
                        return Err(EngineError::InvalidArgument(format!(
                            "Unknown binary operator: {op}"
                        )))
                    }
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, code)?;
                match op {
                    '-' => code.ops.push(OpCode::Neg),
                    _ => {
                        return Err(EngineError::InvalidArgument(format!(
                            "Unknown unary operator: {op}"
                        )))
                    }
                }
            }
            Expr::Call(name, args) => self.compile_call(name, args, code)?,
            Expr::Compare(left, relation, right) => {
                self.compile_recursive(left, code)?;
                self.compile_recursive(right, code)?;
                code.ops.push(OpCode::Compare(*relation));
            }
            Expr::And(left, right) => {
                self.compile_recursive(left, code)?;
                self.compile_recursive(right, code)?;
                code.ops.push(OpCode::And);
            }
            Expr::Restrict(body, condition) => {
                self.compile_recursive(body, code)?;
                self.compile_recursive(condition, code)?;
                code.ops.push(OpCode::Restrict);
            }
            Expr::Reduce {
                kind,
                body,
                index,
                lower,
                upper,
            } => {
                self.compile_recursive(lower, code)?;
                self.compile_recursive(upper, code)?;
                // The index gets a fresh slot so an outer symbol of the same name
                // is untouched.
                let shadowed = self.var_map.remove(index);
                let slot = self.symbols.len();
                self.symbols.push(format!("{index}#{slot}"));
                self.var_map.insert(index.clone(), slot);
                let program = self.compile(body);
                self.var_map.remove(index);
                if let Some(previous) = shadowed {
                    self.var_map.insert(index.clone(), previous);
                }
                code.programs.push(program?);
                code.ops.push(OpCode::Reduce {
                    kind: *kind,
                    slot,
                    program: code.programs.len() - 1,
                });
            }
            Expr::Tuple(_) => {
                return Err(EngineError::InvalidArgument(
                    "A tuple cannot be evaluated as a single number".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn compile_call(
        &mut self,
        name: &str,
        args: &[Expr],
        code: &mut Bytecode,
    ) -> Result<(), EngineError> {
        if let Some(definition) = self.functions.and_then(|registry| registry.get(name)) {
            if definition.params.len() != args.len() {
                return Err(EngineError::InvalidArgument(format!(
                    "`{name}` expects {} argument(s), got {}",
                    definition.params.len(),
                    args.len()
                )));
            }
            let bindings: Vec<(String, Expr)> = definition
                .params
                .iter()
                .cloned()
                .zip(args.iter().cloned())
                .collect();
            let inlined = definition.body.substitute(&bindings);
            return self.compile_recursive(&inlined, code);
        }

        match builtin_arity(name) {
            Some(arity) if arity == args.len() => {
                for arg in args {
                    self.compile_recursive(arg, code)?;
                }
                if let Some(func) = Func1::from_name(name) {
                    code.ops.push(OpCode::Call1(func));
                } else if let Some(func) = Func2::from_name(name) {
                    code.ops.push(OpCode::Call2(func));
                }
                Ok(())
            }
            // `log(x, b)` reads naturally as a base-b logarithm.
            Some(1) if name == "log" && args.len() == 2 => {
                self.compile_call("logbase", args, code)
            }
            Some(arity) => Err(EngineError::InvalidArgument(format!(
                "`{name}` expects {arity} argument(s), got {}",
                args.len()
            ))),
            // `a(x + 1)` with an unknown single-letter name is a product.
            None if name.chars().count() == 1 && args.len() == 1 => {
                let product = Expr::binary(Expr::var(name), '*', args[0].clone());
                self.compile_recursive(&product, code)
            }
            None => Err(EngineError::UnknownFunction(name.to_string())),
        }
    }
}

/// Compilation inputs beyond the source text.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions<'a> {
    pub syntax: Syntax,
    pub functions: Option<&'a FunctionRegistry>,
    pub sum_iteration_cap: usize,
}

impl Default for CompileOptions<'_> {
    fn default() -> Self {
        Self {
            syntax: Syntax::Plain,
            functions: None,
            sum_iteration_cap: 10_000,
        }
    }
}

impl<'a> CompileOptions<'a> {
    pub fn latex() -> Self {
        Self {
            syntax: Syntax::Latex,
            ..Self::default()
        }
    }

    pub fn with_functions(mut self, functions: &'a FunctionRegistry) -> Self {
        self.functions = Some(functions);
        self
    }
}

/// A pure numeric evaluator produced from expression source.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    source: String,
    bytecode: Bytecode,
    symbols: Vec<String>,
    sum_iteration_cap: usize,
}

impl CompiledFunction {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Symbols read from the scope, in slot order. Reduction indices are excluded.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols
            .iter()
            .filter(|name| !name.contains('#'))
            .map(String::as_str)
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.symbols().any(|symbol| symbol == name)
    }

    /// Evaluates against a scope snapshot. Unbound symbols read as NaN.
    pub fn eval(&self, scope: &Scope) -> f64 {
        let mut slots: Vec<f64> = self
            .symbols
            .iter()
            .map(|name| scope.get(name).unwrap_or(f64::NAN))
            .collect();
        let mut stack = Vec::with_capacity(32);
        VM::execute(&self.bytecode, &mut slots, &mut stack, self.sum_iteration_cap)
    }

    /// Prepares repeated evaluation over the `free` variables with every other
    /// symbol fixed from `scope`.
    pub fn bind(&self, scope: &Scope, free: &[&str]) -> BoundFunction<'_> {
        let slots = self
            .symbols
            .iter()
            .map(|name| scope.get(name).unwrap_or(f64::NAN))
            .collect();
        let free_slots = free
            .iter()
            .map(|name| self.symbols.iter().position(|symbol| symbol == name))
            .collect();
        BoundFunction {
            function: self,
            slots,
            free_slots,
            stack: Vec::with_capacity(32),
        }
    }
}

/// A compiled function with its scope resolved to slots, for tight sampling loops.
pub struct BoundFunction<'a> {
    function: &'a CompiledFunction,
    slots: Vec<f64>,
    free_slots: Vec<Option<usize>>,
    stack: Vec<f64>,
}

impl BoundFunction<'_> {
    /// Evaluates with the free variables set to `args` (in `bind` order).
    pub fn eval(&mut self, args: &[f64]) -> f64 {
        for (slot, value) in self.free_slots.iter().zip(args) {
            if let Some(idx) = slot {
                self.slots[*idx] = *value;
            }
        }
        VM::execute(
            &self.function.bytecode,
            &mut self.slots,
            &mut self.stack,
            self.function.sum_iteration_cap,
        )
    }

    pub fn eval1(&mut self, x: f64) -> f64 {
        self.eval(&[x])
    }
}

/// Picks the evaluable body of a statement.
///
/// `y = rhs` and `f(x) = rhs` yield `rhs`; any other equation is implicit and
/// yields `lhs - rhs`, as do inequalities.
pub fn equation_body(equation: &Equation) -> Expr {
    let body = match &equation.relation {
        None => equation.lhs.clone(),
        Some((relation, rhs)) => {
            let explicit = !relation.is_inequality()
                && match &equation.lhs {
                    Expr::Variable(name) => !rhs.mentions(name),
                    Expr::Call(name, args) => {
                        builtin_arity(name).is_none()
                            && args.iter().all(|arg| matches!(arg, Expr::Variable(_)))
                    }
                    _ => false,
                };
            if explicit {
                rhs.clone()
            } else {
                Expr::binary(equation.lhs.clone(), '-', rhs.clone())
            }
        }
    };
    match &equation.restriction {
        Some(condition) => Expr::Restrict(Box::new(body), Box::new(condition.clone())),
        None => body,
    }
}

/// The level-set body of a statement: `lhs - rhs` for any relation, so that
/// `y = x^2` becomes `y - x^2`.
pub fn field_body(equation: &Equation) -> Expr {
    let body = match &equation.relation {
        None => equation.lhs.clone(),
        Some((_, rhs)) => Expr::binary(equation.lhs.clone(), '-', rhs.clone()),
    };
    match &equation.restriction {
        Some(condition) => Expr::Restrict(Box::new(body), Box::new(condition.clone())),
        None => body,
    }
}

/// Parses `source` in the given syntax into a statement.
pub fn parse_source(source: &str, syntax: Syntax) -> Result<Equation, EngineError> {
    let plain = match syntax {
        Syntax::Plain => source.to_string(),
        Syntax::Latex => latex::latex_to_plain(source)?,
    };
    parse_equation(&plain).map_err(|message| EngineError::parse(source, message))
}

/// Compiles an already-parsed expression.
pub fn compile_expr(
    source: &str,
    expr: &Expr,
    options: &CompileOptions<'_>,
) -> Result<CompiledFunction, EngineError> {
    let mut compiler = Compiler::new(options.functions);
    let bytecode = compiler.compile(expr)?;
    Ok(CompiledFunction {
        source: source.to_string(),
        bytecode,
        symbols: compiler.symbols,
        sum_iteration_cap: options.sum_iteration_cap,
    })
}

/// Compiles `source`, reporting why it failed.
pub fn try_compile(
    source: &str,
    options: &CompileOptions<'_>,
) -> Result<CompiledFunction, EngineError> {
    let equation = parse_source(source, options.syntax)?;
    compile_expr(source, &equation_body(&equation), options)
}

/// Compiles `source` as a scalar field over its [`field_body`].
pub fn try_compile_field(
    source: &str,
    options: &CompileOptions<'_>,
) -> Result<CompiledFunction, EngineError> {
    let equation = parse_source(source, options.syntax)?;
    compile_expr(source, &field_body(&equation), options)
}

/// Compiles `source`; `None` when it cannot be parsed.
pub fn compile(source: &str, options: &CompileOptions<'_>) -> Option<CompiledFunction> {
    match try_compile(source, options) {
        Ok(compiled) => Some(compiled),
        Err(err) => {
            debug!("Compilation of `{source}` failed: {err}");
            None
        }
    }
}

pub fn compile_latex(source: &str, options: &CompileOptions<'_>) -> Option<CompiledFunction> {
    compile(
        source,
        &CompileOptions {
            syntax: Syntax::Latex,
            ..*options
        },
    )
}

/// Compiles each component of a tuple expression such as `(cos(t), sin(t))`.
pub fn try_compile_components(
    source: &str,
    options: &CompileOptions<'_>,
) -> Result<Vec<CompiledFunction>, EngineError> {
    let equation = parse_source(source, options.syntax)?;
    let body = match &equation.relation {
        Some((_, rhs)) => rhs.clone(),
        None => equation.lhs.clone(),
    };
    let components = match body {
        Expr::Tuple(items) => items,
        other => vec![other],
    };
    components
        .iter()
        .map(|component| {
            let component = match &equation.restriction {
                Some(condition) => {
                    Expr::Restrict(Box::new(component.clone()), Box::new(condition.clone()))
                }
                None => component.clone(),
            };
            compile_expr(source, &component, options)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry::FunctionDefinition;

    fn eval_at(source: &str, x: f64) -> f64 {
        let compiled =
            compile(source, &CompileOptions::default()).expect("expression should compile");
        compiled.eval(&Scope::new().with("x", x))
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval_at("1 + 2 * 3", 0.0), 7.0);
        assert_eq!(eval_at("2^3^2", 0.0), 512.0);
        assert_eq!(eval_at("-x^2", 3.0), -9.0);
        assert_eq!(eval_at("2x + 1", 4.0), 9.0);
        assert_eq!(eval_at("|x - 5|", 2.0), 3.0);
    }

    #[test]
    fn explicit_equation_compiles_right_hand_side() {
        assert_eq!(eval_at("y = x^2 + 1", 2.0), 5.0);
        assert_eq!(eval_at("f(x) = 3x", 2.0), 6.0);
    }

    #[test]
    fn implicit_equation_compiles_difference() {
        let compiled = compile("x^2 + y^2 = 1", &CompileOptions::default()).expect("compiles");
        let scope: Scope = [("x", 1.0), ("y", 1.0)].into_iter().collect();
        assert_eq!(compiled.eval(&scope), 1.0);
    }

    #[test]
    fn division_by_zero_is_not_a_fault() {
        assert!(eval_at("1/x", 0.0).is_infinite());
        assert!(eval_at("ln(x)", -1.0).is_nan());
        assert!(eval_at("sqrt(x)", -4.0).is_nan());
    }

    #[test]
    fn domain_restriction_masks_outside_values() {
        assert_eq!(eval_at("x^2 {x > 0}", 2.0), 4.0);
        assert!(eval_at("x^2 {x > 0}", -2.0).is_nan());
        assert_eq!(eval_at("x {-1 < x < 1}", 0.5), 0.5);
        assert!(eval_at("x {-1 < x < 1}", 1.5).is_nan());
    }

    #[test]
    fn summation_and_product() {
        assert_eq!(eval_at("sum(i^2, i, 1, 4)", 0.0), 30.0);
        assert_eq!(eval_at("prod(i, i, 1, 5)", 0.0), 120.0);
        assert_eq!(eval_at("sum(x*i, i, 1, 3)", 2.0), 12.0);
    }

    #[test]
    fn reduction_index_shadows_scope() {
        let compiled =
            compile("i + sum(i, i, 1, 3)", &CompileOptions::default()).expect("compiles");
        assert_eq!(compiled.eval(&Scope::new().with("i", 100.0)), 106.0);
    }

    #[test]
    fn runaway_sum_is_nan() {
        assert!(eval_at("sum(i, i, 1, 100000000)", 0.0).is_nan());
    }

    #[test]
    fn huge_sum_bounds_are_nan() {
        assert!(eval_at("sum(i, i, -10^300, 10^300)", 0.0).is_nan());
        assert!(eval_at("prod(i, i, -1e300, 1e300)", 0.0).is_nan());
        assert_eq!(eval_at("sum(i, i, 10^300, -10^300)", 0.0), 0.0);
    }

    #[test]
    fn numeric_integral() {
        let value = eval_at("integral(t^2, t, 0, x)", 3.0);
        assert!((value - 9.0).abs() < 1e-9, "got {value}");
    }

    #[test]
    fn latex_compiles() {
        let compiled = compile_latex(r"\frac{x^{2}}{2}+\sqrt{x}", &CompileOptions::default())
            .expect("latex should compile");
        let value = compiled.eval(&Scope::new().with("x", 4.0));
        assert!((value - 10.0).abs() < 1e-12, "got {value}");

        let series = compile_latex(r"\sum_{n=1}^{3} n x", &CompileOptions::default())
            .expect("series should compile");
        assert_eq!(series.eval(&Scope::new().with("x", 2.0)), 12.0);
    }

    #[test]
    fn latex_log_is_base_ten_and_ln_is_natural() {
        let log = compile_latex(r"\log(100)", &CompileOptions::default()).expect("compiles");
        assert!((log.eval(&Scope::new()) - 2.0).abs() < 1e-12);
        let ln = compile_latex(r"\ln(e)", &CompileOptions::default()).expect("compiles");
        assert!((ln.eval(&Scope::new()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unparsable_input_returns_none() {
        assert!(compile("(x + 1", &CompileOptions::default()).is_none());
        assert!(compile_latex(r"\frac{1}{", &CompileOptions::default()).is_none());
        assert!(compile_latex(r"\unknown{x}", &CompileOptions::default()).is_none());
        assert!(compile("frobnicate(x)", &CompileOptions::default()).is_none());
    }

    #[test]
    fn user_functions_are_inlined() {
        let registry = FunctionRegistry::from_definitions(vec![
            FunctionDefinition {
                name: "f".to_string(),
                params: vec!["x".to_string()],
                body: parser::parse("x^2").expect("parses"),
            },
            FunctionDefinition {
                name: "g".to_string(),
                params: vec!["t".to_string()],
                body: parser::parse("f(t) + a").expect("parses"),
            },
        ])
        .expect("registry builds");
        let options = CompileOptions::default().with_functions(&registry);
        let compiled = compile("g(x + 1)", &options).expect("compiles");
        let scope: Scope = [("x", 2.0), ("a", 1.0)].into_iter().collect();
        assert_eq!(compiled.eval(&scope), 10.0);
    }

    #[test]
    fn inlined_functions_keep_their_own_names() {
        let registry = FunctionRegistry::from_definitions(vec![
            FunctionDefinition {
                name: "f".to_string(),
                params: vec!["x".to_string()],
                body: parser::parse("x + a").expect("parses"),
            },
            FunctionDefinition {
                name: "g".to_string(),
                params: vec!["a".to_string()],
                body: parser::parse("f(2)").expect("parses"),
            },
            FunctionDefinition {
                name: "h".to_string(),
                params: vec!["x".to_string()],
                body: parser::parse("sum(x*i, i, 1, 3)").expect("parses"),
            },
        ])
        .expect("registry builds");
        let options = CompileOptions::default().with_functions(&registry);

        let g = compile("g(5)", &options).expect("compiles");
        assert_eq!(g.eval(&Scope::new().with("a", 100.0)), 102.0);

        let h = compile("h(i)", &options).expect("compiles");
        assert_eq!(h.eval(&Scope::new().with("i", 2.0)), 12.0);
    }

    #[test]
    fn explicit_equation_as_a_field_keeps_both_sides() {
        let compiled =
            try_compile_field("y = x^2", &CompileOptions::default()).expect("compiles");
        let scope: Scope = [("x", 2.0), ("y", 5.0)].into_iter().collect();
        assert_eq!(compiled.eval(&scope), 1.0);
    }

    #[test]
    fn unbound_symbols_are_nan() {
        let compiled = compile("x + k", &CompileOptions::default()).expect("compiles");
        assert!(compiled.eval(&Scope::new().with("x", 1.0)).is_nan());
        let symbols: Vec<&str> = compiled.symbols().collect();
        assert_eq!(symbols, vec!["x", "k"]);
    }

    #[test]
    fn bound_function_matches_scope_evaluation() {
        let compiled = compile("a*x^2 + y", &CompileOptions::default()).expect("compiles");
        let scope: Scope = [("a", 2.0), ("y", 1.0)].into_iter().collect();
        let mut bound = compiled.bind(&scope, &["x"]);
        for x in [-1.0, 0.0, 2.5] {
            assert_eq!(bound.eval1(x), compiled.eval(&scope.with("x", x)));
        }
    }

    #[test]
    fn cube_root_of_negative_base() {
        assert!((eval_at("x^(1/3)", -8.0) + 2.0).abs() < 1e-12);
        assert!((eval_at("nroot(x, 3)", -27.0) + 3.0).abs() < 1e-12);
    }
}
