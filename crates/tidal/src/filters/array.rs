//! Array filters.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::filters::{FilterCall, FilterRegistry, Num, num_arg, str_arg};
use crate::value::Value;

pub fn register(registry: &mut FilterRegistry) {
    registry.register("join", join);
    registry.register("first", first);
    registry.register("last", last);
    registry.register("concat", concat);
    registry.register("map", map);
    registry.register("reverse", reverse);
    registry.register("sort", sort);
    registry.register("sort_natural", sort_natural);
    registry.register("where", where_);
    registry.register("uniq", uniq);
    registry.register("compact", compact);
    registry.register("sum", sum);
}

/// Coerces the filter input to a list of items.
///
/// Undefined inputs act as an empty array; ranges materialize. Anything
/// else is a filter value error.
fn input(call: &FilterCall<'_>) -> Result<Vec<Value>> {
    match &call.value {
        Value::Array(items) => Ok(items.as_ref().clone()),
        Value::Range(range) => Ok(range.iter().map(Value::Int).collect()),
        Value::Undefined(_) => Ok(Vec::new()),
        other => Err(Error::filter_value(
            call.name,
            format!("expected an array, found {}", other.kind()),
        )),
    }
}

fn join(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(0, 1)?;
    let separator = call.arg(0).map_or_else(|| " ".to_string(), str_arg);
    let items = input(&call)?;
    let parts: Vec<String> = items.iter().map(Value::render).collect();
    Ok(Value::str(parts.join(&separator)))
}

fn first(call: FilterCall<'_>) -> Result<Value> {
    Ok(input(&call)?.first().cloned().unwrap_or(Value::Nil))
}

fn last(call: FilterCall<'_>) -> Result<Value> {
    Ok(input(&call)?.last().cloned().unwrap_or(Value::Nil))
}

fn concat(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 1)?;
    let Value::Array(second) = &call.args[0] else {
        return Err(Error::filter_argument(
            "concat",
            format!("expected an array, found {}", call.args[0].kind()),
        ));
    };
    if call.value.is_undefined() {
        return Ok(call.args[0].clone());
    }
    let mut items = input(&call)?;
    items.extend(second.iter().cloned());
    Ok(Value::array(items))
}

fn map(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 1)?;
    let key = Value::str(str_arg(&call.args[0]));
    let items = input(&call)?;
    Ok(Value::array(
        items
            .iter()
            .map(|item| item.get_index(&key).unwrap_or(Value::Nil))
            .collect(),
    ))
}

fn reverse(call: FilterCall<'_>) -> Result<Value> {
    let mut items = input(&call)?;
    items.reverse();
    Ok(Value::array(items))
}

/// Comparator for `sort`: incompatible kinds surface as an error.
fn try_compare(name: &str, a: &Value, b: &Value) -> Result<Ordering> {
    a.liquid_cmp(b)
        .map_err(|_| Error::filter_value(name, "can't sort sequence"))
}

fn sort(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(0, 1)?;
    let mut items = input(&call)?;
    let mut failure = None;
    match call.arg(0) {
        Some(key) => {
            // Items without the key property sort to the end.
            let key = Value::str(str_arg(key));
            items.sort_by(|a, b| {
                match (a.get_index(&key), b.get_index(&key)) {
                    (Some(a), Some(b)) => try_compare("sort", &a, &b).unwrap_or_else(|err| {
                        failure.get_or_insert(err);
                        Ordering::Equal
                    }),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }
        None => {
            items.sort_by(|a, b| {
                try_compare("sort", a, b).unwrap_or_else(|err| {
                    failure.get_or_insert(err);
                    Ordering::Equal
                })
            });
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(Value::array(items)),
    }
}

fn sort_natural(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(0, 1)?;
    let mut items = input(&call)?;
    let sort_key = |item: &Value| -> String {
        match call.arg(0) {
            Some(key) => item
                .get_index(&Value::str(str_arg(key)))
                .map(|v| v.render().to_lowercase())
                .unwrap_or_else(|| "\u{10FFFF}".to_string()),
            None => item.render().to_lowercase(),
        }
    };
    items.sort_by_key(sort_key);
    Ok(Value::array(items))
}

fn where_(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(1, 2)?;
    let key = Value::str(str_arg(&call.args[0]));
    let want = call.arg(1);
    let items = input(&call)?;
    let kept = items
        .into_iter()
        .filter(|item| {
            let found = item.get_index(&key);
            match want {
                Some(want) => found.is_some_and(|v| v.liquid_eq(want)),
                None => found.is_some_and(|v| !matches!(v, Value::Nil | Value::Bool(false) | Value::Undefined(_))),
            }
        })
        .collect();
    Ok(Value::array(kept))
}

fn uniq(call: FilterCall<'_>) -> Result<Value> {
    let items = input(&call)?;
    let mut seen: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !seen.iter().any(|kept| kept.liquid_eq(&item)) {
            seen.push(item);
        }
    }
    Ok(Value::array(seen))
}

fn compact(call: FilterCall<'_>) -> Result<Value> {
    let items = input(&call)?;
    Ok(Value::array(
        items
            .into_iter()
            .filter(|item| !matches!(item, Value::Nil))
            .collect(),
    ))
}

fn sum(call: FilterCall<'_>) -> Result<Value> {
    call.expect_args(0, 1)?;
    let key = call.arg(0).map(|key| Value::str(str_arg(key)));
    let items = input(&call)?;
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut any_float = false;
    for item in &items {
        let addend = match &key {
            Some(key) => item.get_index(key).unwrap_or(Value::Nil),
            None => item.clone(),
        };
        match num_arg(&addend) {
            Some(Num::Int(n)) => int_total += n,
            Some(Num::Float(x)) => {
                any_float = true;
                float_total += x;
            }
            None => {}
        }
    }
    if any_float {
        Ok(Value::Float(float_total + int_total as f64))
    } else {
        Ok(Value::Int(int_total))
    }
}
