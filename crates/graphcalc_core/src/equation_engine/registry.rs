//! User-defined function symbols (`f(x) = x^2`, `g(t) = f(t) + 1`).
//!
//! Definitions may reference each other but not themselves, directly or through
//! a cycle. The registry orders definitions by dependency and stores every body
//! fully expanded, so call sites are inlined with a single substitution.

use super::parser::{builtin_arity, Expr};
use crate::error::EngineError;
use log::warn;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub params: Vec<String>,
    pub body: Expr,
}

impl FunctionDefinition {
    /// Recognises `name(p1, p2, ...) = body` where every parameter is a bare name.
    pub fn from_equation(lhs: &Expr, rhs: &Expr) -> Option<Self> {
        let Expr::Call(name, args) = lhs else {
            return None;
        };
        if builtin_arity(name).is_some() {
            return None;
        }
        let params = args
            .iter()
            .map(|arg| match arg {
                Expr::Variable(param) => Some(param.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            name: name.clone(),
            params,
            body: rhs.clone(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDefinition>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from an unordered set of definitions.
    pub fn from_definitions(definitions: Vec<FunctionDefinition>) -> Result<Self, EngineError> {
        let mut pending: HashMap<String, FunctionDefinition> = HashMap::new();
        for definition in definitions {
            if pending.contains_key(&definition.name) {
                return Err(EngineError::InvalidArgument(format!(
                    "Function `{}` is defined more than once",
                    definition.name
                )));
            }
            pending.insert(definition.name.clone(), definition);
        }

        let mut names: Vec<String> = pending.keys().cloned().collect();
        names.sort();
        let mut marks: HashMap<String, Mark> = HashMap::new();
        let mut order = Vec::with_capacity(names.len());
        for name in &names {
            visit(name, &pending, &mut marks, &mut order)?;
        }

        let mut registry = FunctionRegistry::new();
        for name in order {
            let Some(definition) = pending.remove(&name) else {
                continue;
            };
            let definition = qualify(definition);
            let body = registry.expand(&definition.body);
            registry.functions.insert(
                name,
                FunctionDefinition {
                    body,
                    ..definition
                },
            );
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Inlines every call to a registered function.
    pub fn expand(&self, expr: &Expr) -> Expr {
        if let Expr::Call(name, args) = expr {
            if let Some(definition) = self.functions.get(name) {
                if definition.params.len() == args.len() {
                    let bindings: Vec<(String, Expr)> = definition
                        .params
                        .iter()
                        .cloned()
                        .zip(args.iter().map(|arg| self.expand(arg)))
                        .collect();
                    return definition.body.substitute(&bindings);
                }
            }
        }
        expr.map_children(&mut |child| self.expand(child))
    }
}

/// Renames parameters and reduction indices to `name#param`, a spelling the
/// parser never produces, so inlined bodies cannot capture the caller's names.
fn qualify(definition: FunctionDefinition) -> FunctionDefinition {
    let owner = definition.name.clone();
    let params: Vec<String> = definition
        .params
        .iter()
        .map(|param| format!("{owner}#{param}"))
        .collect();
    let bindings: Vec<(String, Expr)> = definition
        .params
        .iter()
        .cloned()
        .zip(params.iter().map(|param| Expr::var(param)))
        .collect();
    let body = qualify_indices(&definition.body.substitute(&bindings), &owner);
    FunctionDefinition {
        name: owner,
        params,
        body,
    }
}

fn qualify_indices(expr: &Expr, owner: &str) -> Expr {
    match expr {
        Expr::Reduce {
            kind,
            body,
            index,
            lower,
            upper,
        } => {
            let renamed = format!("{owner}#{index}");
            let body = body.substitute(&[(index.clone(), Expr::var(&renamed))]);
            Expr::Reduce {
                kind: *kind,
                body: Box::new(qualify_indices(&body, owner)),
                index: renamed,
                lower: Box::new(qualify_indices(lower, owner)),
                upper: Box::new(qualify_indices(upper, owner)),
            }
        }
        _ => expr.map_children(&mut |child| qualify_indices(child, owner)),
    }
}

fn visit(
    name: &str,
    pending: &HashMap<String, FunctionDefinition>,
    marks: &mut HashMap<String, Mark>,
    order: &mut Vec<String>,
) -> Result<(), EngineError> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            warn!("Rejecting recursive definition of `{name}`");
            return Err(EngineError::RecursiveDefinition(name.to_string()));
        }
        None => {}
    }
    let Some(definition) = pending.get(name) else {
        return Ok(());
    };
    marks.insert(name.to_string(), Mark::Visiting);
    let mut callees = BTreeSet::new();
    definition.body.called_functions(&mut callees);
    for callee in callees.iter().filter(|callee| pending.contains_key(*callee)) {
        visit(callee, pending, marks, order)?;
    }
    marks.insert(name.to_string(), Mark::Done);
    order.push(name.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation_engine::parser::parse_equation;

    fn definition(source: &str) -> FunctionDefinition {
        let equation = parse_equation(source).expect("definition should parse");
        let (_, rhs) = equation.relation.expect("definition needs a right-hand side");
        FunctionDefinition::from_equation(&equation.lhs, &rhs).expect("should be a definition")
    }

    #[test]
    fn orders_callees_before_callers() {
        let registry = FunctionRegistry::from_definitions(vec![
            definition("h(x) = g(x) * 2"),
            definition("g(x) = f(x) + 1"),
            definition("f(x) = x^2"),
        ])
        .expect("acyclic definitions should register");
        let h = registry.get("h").expect("h registered");
        let mut calls = BTreeSet::new();
        h.body.called_functions(&mut calls);
        assert!(calls.is_empty(), "h should be fully expanded, calls {calls:?}");
    }

    #[test]
    fn rejects_self_recursion() {
        let err = FunctionRegistry::from_definitions(vec![definition("f(x) = f(x - 1)")])
            .expect_err("self recursion should fail");
        assert_eq!(err, EngineError::RecursiveDefinition("f".to_string()));
    }

    #[test]
    fn rejects_mutual_recursion() {
        let result = FunctionRegistry::from_definitions(vec![
            definition("f(x) = g(x) + 1"),
            definition("g(x) = f(x) - 1"),
        ]);
        assert!(matches!(result, Err(EngineError::RecursiveDefinition(_))));
    }

    #[test]
    fn builtin_names_are_not_definitions() {
        let equation = parse_equation("sin(x) = x").expect("should parse");
        let (_, rhs) = equation.relation.expect("rhs");
        assert!(FunctionDefinition::from_equation(&equation.lhs, &rhs).is_none());
    }
}
