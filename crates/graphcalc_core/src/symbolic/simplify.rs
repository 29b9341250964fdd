//! Folding constructors and a minimal-parenthesis printer for symbolic results.
//!
//! The constructors apply identities (`0 + u`, `1 * u`, `u ^ 1`, double
//! negation) as trees are built, so derivative and antiderivative trees stay
//! small without a separate simplification pass.

use crate::equation_engine::parser::{format_number, Expr};

pub fn number(value: f64) -> Expr {
    if value < 0.0 {
        Expr::neg(Expr::Number(-value))
    } else {
        Expr::Number(value)
    }
}

/// The value of a literal (possibly negated) number.
pub fn as_number(expr: &Expr) -> Option<f64> {
    match expr {
        Expr::Number(value) => Some(*value),
        Expr::Unary('-', inner) => as_number(inner).map(|value| -value),
        _ => None,
    }
}

fn is(expr: &Expr, value: f64) -> bool {
    as_number(expr) == Some(value)
}

fn is_integer(value: f64) -> bool {
    value.is_finite() && value.fract() == 0.0
}

pub fn neg(expr: Expr) -> Expr {
    match expr {
        Expr::Number(value) => number(-value),
        Expr::Unary('-', inner) => *inner,
        other => Expr::neg(other),
    }
}

pub fn add(left: Expr, right: Expr) -> Expr {
    match (as_number(&left), as_number(&right)) {
        (Some(a), Some(b)) => number(a + b),
        (Some(a), _) if a == 0.0 => right,
        (_, Some(b)) if b == 0.0 => left,
        (_, Some(b)) if b < 0.0 => Expr::binary(left, '-', Expr::Number(-b)),
        _ => match right {
            Expr::Unary('-', inner) => Expr::binary(left, '-', *inner),
            right => Expr::binary(left, '+', right),
        },
    }
}

pub fn sub(left: Expr, right: Expr) -> Expr {
    match (as_number(&left), as_number(&right)) {
        (Some(a), Some(b)) => number(a - b),
        (_, Some(b)) if b == 0.0 => left,
        (Some(a), _) if a == 0.0 => neg(right),
        (_, Some(b)) if b < 0.0 => Expr::binary(left, '+', Expr::Number(-b)),
        _ => match right {
            Expr::Unary('-', inner) => add(left, *inner),
            right => Expr::binary(left, '-', right),
        },
    }
}

pub fn mul(left: Expr, right: Expr) -> Expr {
    match (as_number(&left), as_number(&right)) {
        (Some(a), Some(b)) => return number(a * b),
        (Some(a), _) if a == 0.0 => return Expr::Number(0.0),
        (_, Some(b)) if b == 0.0 => return Expr::Number(0.0),
        (Some(a), _) if a == 1.0 => return right,
        (_, Some(b)) if b == 1.0 => return left,
        (Some(a), _) if a == -1.0 => return neg(right),
        (_, Some(b)) if b == -1.0 => return neg(left),
        // Numbers lead: `u * 2` becomes `2 * u`.
        (None, Some(_)) => return mul(right, left),
        _ => {}
    }
    match (left, right) {
        (Expr::Unary('-', inner), right) => neg(mul(*inner, right)),
        (left, Expr::Unary('-', inner)) => neg(mul(left, *inner)),
        (left, Expr::Binary(inner_left, '*', inner_right))
            if as_number(&left).is_some() && as_number(&inner_left).is_some() =>
        {
            mul(mul(left, *inner_left), *inner_right)
        }
        (left, right) => Expr::binary(left, '*', right),
    }
}

pub fn div(left: Expr, right: Expr) -> Expr {
    match (as_number(&left), as_number(&right)) {
        (_, Some(b)) if b == 1.0 => return left,
        (_, Some(b)) if b == -1.0 => return neg(left),
        (Some(a), _) if a == 0.0 => return Expr::Number(0.0),
        (Some(a), Some(b)) if b != 0.0 && is_integer(a / b) => return number(a / b),
        _ => {}
    }
    match (left, right) {
        (Expr::Unary('-', inner), right) => neg(div(*inner, right)),
        (left, Expr::Unary('-', inner)) => neg(div(left, *inner)),
        (left, right) => Expr::binary(left, '/', right),
    }
}

pub fn pow(base: Expr, exponent: Expr) -> Expr {
    match (as_number(&base), as_number(&exponent)) {
        (_, Some(n)) if n == 0.0 => Expr::Number(1.0),
        (_, Some(n)) if n == 1.0 => base,
        (Some(b), _) if b == 1.0 => Expr::Number(1.0),
        (Some(b), Some(n)) if is_integer(b.powf(n)) => number(b.powf(n)),
        _ => Expr::binary(base, '^', exponent),
    }
}

pub fn call(name: &str, argument: Expr) -> Expr {
    Expr::call(name, argument)
}

/// Binding strength used to decide where parentheses are needed.
fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Binary(_, '+' | '-', _) => 1,
        Expr::Binary(_, '*' | '/', _) => 2,
        Expr::Unary(..) => 3,
        Expr::Number(value) if *value < 0.0 => 3,
        Expr::Binary(_, '^', _) => 4,
        Expr::Number(_) | Expr::Variable(_) | Expr::Call(..) | Expr::Tuple(_) => 5,
        _ => 0,
    }
}

fn wrapped(expr: &Expr, parenthesize: bool) -> String {
    let text = render(expr);
    if parenthesize {
        format!("({text})")
    } else {
        text
    }
}

/// Renders an expression in the plain grammar with as few parentheses as the
/// grammar allows.
pub fn render(expr: &Expr) -> String {
    match expr {
        Expr::Number(value) => format_number(*value),
        Expr::Variable(name) => name.clone(),
        Expr::Call(name, args) => {
            let args: Vec<String> = args.iter().map(render).collect();
            format!("{name}({})", args.join(", "))
        }
        Expr::Unary(op, operand) => {
            let p = precedence(operand);
            format!("{op}{}", wrapped(operand, p < 2 || p == 3))
        }
        Expr::Binary(left, op, right) => {
            let (lp, rp) = (precedence(left), precedence(right));
            match op {
                '+' => format!("{} + {}", wrapped(left, lp < 1), wrapped(right, rp < 1 || rp == 3)),
                '-' => format!("{} - {}", wrapped(left, lp < 1), wrapped(right, rp <= 1 || rp == 3)),
                '*' => format!("{}*{}", wrapped(left, lp < 2), wrapped(right, rp < 2 || rp == 3)),
                '/' => format!("{}/{}", wrapped(left, lp < 2), wrapped(right, rp < 4)),
                _ => format!("{}{op}{}", wrapped(left, lp < 5), wrapped(right, rp < 5)),
            }
        }
        other => other.to_string(),
    }
}

/// `p/q` with a small denominator, when `value` is one.
pub fn as_fraction(value: f64) -> Option<(i64, i64)> {
    if !value.is_finite() {
        return None;
    }
    (1..=1000i64).find_map(|q| {
        let p = (value * q as f64).round();
        ((value - p / q as f64).abs() <= 1e-9 * value.abs().max(1.0)).then_some((p as i64, q))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::var("x")
    }

    #[test]
    fn identities_fold_while_building() {
        assert_eq!(add(Expr::Number(0.0), x()), x());
        assert_eq!(mul(Expr::Number(1.0), x()), x());
        assert_eq!(mul(x(), Expr::Number(0.0)), Expr::Number(0.0));
        assert_eq!(pow(x(), Expr::Number(1.0)), x());
        assert_eq!(neg(neg(x())), x());
        assert_eq!(mul(Expr::Number(2.0), Expr::Number(3.0)), Expr::Number(6.0));
    }

    #[test]
    fn numbers_lead_products() {
        let product = mul(call("cos", x()), Expr::Number(2.0));
        assert_eq!(render(&product), "2*cos(x)");
    }

    #[test]
    fn renders_with_minimal_parentheses() {
        let sum = add(mul(Expr::Number(2.0), x()), Expr::Number(1.0));
        assert_eq!(render(&pow(sum.clone(), Expr::Number(3.0))), "(2*x + 1)^3");
        assert_eq!(render(&sub(x(), sum)), "x - (2*x + 1)");
        assert_eq!(render(&pow(x(), number(-1.0))), "x^(-1)");
        assert_eq!(render(&Expr::binary(Expr::var("e"), '^', x())), "e^x");
    }

    #[test]
    fn fractions_are_recognised() {
        assert_eq!(as_fraction(0.5), Some((1, 2)));
        assert_eq!(as_fraction(-2.0 / 3.0), Some((-2, 3)));
        assert_eq!(as_fraction(std::f64::consts::PI), None);
    }
}
