//! Math filters.
//!
//! The input value coerces through [`num_arg_or_zero`]: ints and floats
//! pass through, numeric strings parse, anything else counts as integer
//! zero. Operations on two integers stay integral; mixing in a float
//! promotes the result.

use crate::error::{Error, Result};
use crate::filters::{FilterCall, FilterRegistry, Num, int_arg, num_arg_or_zero};
use crate::value::Value;

pub fn register(registry: &mut FilterRegistry) {
    registry.register("abs", abs);
    registry.register("at_most", at_most);
    registry.register("at_least", at_least);
    registry.register("ceil", ceil);
    registry.register("floor", floor);
    registry.register("divided_by", divided_by);
    registry.register("minus", minus);
    registry.register("plus", plus);
    registry.register("times", times);
    registry.register("modulo", modulo);
    registry.register("round", round);
}

fn unary(call: &FilterCall<'_>) -> Num {
    num_arg_or_zero(&call.value)
}

fn binary(call: &FilterCall<'_>) -> Result<(Num, Num)> {
    call.expect_args(1, 1)?;
    Ok((num_arg_or_zero(&call.value), num_arg_or_zero(&call.args[0])))
}

fn abs(call: FilterCall<'_>) -> Result<Value> {
    Ok(match unary(&call) {
        Num::Int(n) => Value::Int(n.saturating_abs()),
        Num::Float(x) => Value::Float(x.abs()),
    })
}

fn at_most(call: FilterCall<'_>) -> Result<Value> {
    let (a, b) = binary(&call)?;
    Ok(pick(a, b, |x, y| x <= y))
}

fn at_least(call: FilterCall<'_>) -> Result<Value> {
    let (a, b) = binary(&call)?;
    Ok(pick(a, b, |x, y| x >= y))
}

fn pick(a: Num, b: Num, keep_a: impl Fn(f64, f64) -> bool) -> Value {
    if keep_a(a.as_f64(), b.as_f64()) {
        a.to_value()
    } else {
        b.to_value()
    }
}

fn ceil(call: FilterCall<'_>) -> Result<Value> {
    Ok(match unary(&call) {
        Num::Int(n) => Value::Int(n),
        Num::Float(x) => Value::Int(x.ceil() as i64),
    })
}

fn floor(call: FilterCall<'_>) -> Result<Value> {
    Ok(match unary(&call) {
        Num::Int(n) => Value::Int(n),
        Num::Float(x) => Value::Int(x.floor() as i64),
    })
}

fn plus(call: FilterCall<'_>) -> Result<Value> {
    let (a, b) = binary(&call)?;
    Ok(match (a, b) {
        (Num::Int(a), Num::Int(b)) => Value::Int(a.wrapping_add(b)),
        (a, b) => Value::Float(a.as_f64() + b.as_f64()),
    })
}

fn minus(call: FilterCall<'_>) -> Result<Value> {
    let (a, b) = binary(&call)?;
    Ok(match (a, b) {
        (Num::Int(a), Num::Int(b)) => Value::Int(a.wrapping_sub(b)),
        (a, b) => Value::Float(a.as_f64() - b.as_f64()),
    })
}

fn times(call: FilterCall<'_>) -> Result<Value> {
    let (a, b) = binary(&call)?;
    Ok(match (a, b) {
        (Num::Int(a), Num::Int(b)) => Value::Int(a.wrapping_mul(b)),
        (a, b) => Value::Float(a.as_f64() * b.as_f64()),
    })
}

/// Integer division floors; float division is exact. Dividing by zero is
/// a filter argument error either way.
fn divided_by(call: FilterCall<'_>) -> Result<Value> {
    let (a, b) = binary(&call)?;
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => {
            if b == 0 {
                Err(Error::filter_argument("divided_by", "can't divide by 0"))
            } else {
                Ok(Value::Int(a.div_euclid(b)))
            }
        }
        (a, b) => {
            if b.as_f64() == 0.0 {
                Err(Error::filter_argument("divided_by", format!("can't divide by {}", b.as_f64())))
            } else {
                Ok(Value::Float(a.as_f64() / b.as_f64()))
            }
        }
    }
}

/// Remainder with the divisor's sign, like Python's `%`.
fn modulo(call: FilterCall<'_>) -> Result<Value> {
    let (a, b) = binary(&call)?;
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => {
            if b == 0 {
                Err(Error::filter_argument("modulo", "can't divide by 0"))
            } else {
                Ok(Value::Int(((a % b) + b) % b))
            }
        }
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            if b == 0.0 {
                Err(Error::filter_argument("modulo", format!("can't divide by {b}")))
            } else {
                Ok(Value::Float(a - b * (a / b).floor()))
            }
        }
    }
}

fn round(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(0, 1)?;
    let digits = match call.arg(0) {
        Some(value) if !value.is_undefined() => int_arg("round", value)?,
        _ => 0,
    };
    Ok(match unary(&call) {
        Num::Int(n) => Value::Int(n),
        Num::Float(x) if digits > 0 => {
            let factor = 10f64.powi(i32::try_from(digits).unwrap_or(i32::MAX));
            Value::Float((x * factor).round() / factor)
        }
        Num::Float(x) => Value::Int(x.round() as i64),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn int_modulo(a: i64, b: i64) -> i64 {
        ((a % b) + b) % b
    }

    #[test]
    fn modulo_follows_the_divisor_sign() {
        assert_eq!(int_modulo(-7, 3), 2);
        assert_eq!(int_modulo(7, -3), -2);
        assert_eq!(int_modulo(7, 3), 1);
    }
}
