//! The filter registry and argument helpers.
//!
//! A filter is a callable taking the piped-in value plus positional and
//! named arguments. Filters access the environment through the call
//! struct; the render context is deliberately not exposed to the built-in
//! set. Missing filters are a render-time error in strict mode and a
//! silent pass-through of the input value otherwise.

mod array;
mod math;
mod misc;
mod string;

use std::sync::Arc;

use ahash::AHashMap;

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::value::Value;

/// One filter invocation: the input value and its arguments.
pub struct FilterCall<'a> {
    /// The filter name, for error messages.
    pub name: &'a str,
    /// The piped-in left-hand value.
    pub value: Value,
    /// Positional arguments, in declaration order.
    pub args: Vec<Value>,
    /// Named arguments, in declaration order.
    pub kwargs: Vec<(String, Value)>,
    /// The environment the render runs under.
    pub env: &'a Environment,
}

impl FilterCall<'_> {
    /// The positional argument at `index`, if given.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// A named argument by key, if given.
    #[must_use]
    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Fails unless between `min` and `max` positional arguments were given.
    pub fn expect_args(&self, min: usize, max: usize) -> Result<()> {
        if (min..=max).contains(&self.args.len()) {
            Ok(())
        } else {
            Err(Error::filter_argument(
                self.name,
                format!("expected {min} to {max} arguments, found {}", self.args.len()),
            ))
        }
    }
}

/// A registered filter callable.
pub trait Filter: Send + Sync {
    fn call(&self, call: FilterCall<'_>) -> Result<Value>;
}

impl<F> Filter for F
where
    F: Fn(FilterCall<'_>) -> Result<Value> + Send + Sync,
{
    fn call(&self, call: FilterCall<'_>) -> Result<Value> {
        self(call)
    }
}

/// Name to filter dispatch table.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: AHashMap<String, Arc<dyn Filter>>,
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FilterRegistry").field("filters", &names).finish()
    }
}

impl FilterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in filter.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        string::register(&mut registry);
        array::register(&mut registry);
        math::register(&mut registry);
        misc::register(&mut registry);
        registry
    }

    /// Registers a filter, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, filter: impl Filter + 'static) {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    /// Looks a filter up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Filter>> {
        self.filters.get(name)
    }
}

/// A coerced numeric argument: integer when both sides are integers,
/// float otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            Self::Int(n) => Value::Int(n),
            Self::Float(x) => Value::Float(x),
        }
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(n) => n as f64,
            Self::Float(x) => x,
        }
    }
}

/// Coerces a value to a number: ints and floats pass through, numeric
/// strings parse. Everything else is `None`.
#[must_use]
pub fn num_arg(value: &Value) -> Option<Num> {
    match value {
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Float(x) => Some(Num::Float(*x)),
        Value::Str(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                Some(Num::Int(n))
            } else {
                s.parse::<f64>().ok().map(Num::Float)
            }
        }
        _ => None,
    }
}

/// Like [`num_arg`], defaulting to integer zero. This is how math filters
/// treat a non-numeric input value.
#[must_use]
pub fn num_arg_or_zero(value: &Value) -> Num {
    num_arg(value).unwrap_or(Num::Int(0))
}

/// Coerces a value to an integer argument, or fails with a filter
/// argument error naming the filter.
pub fn int_arg(filter: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Float(x) => Ok(*x as i64),
        Value::Str(s) => s.trim().parse().map_err(|_| {
            Error::filter_argument(filter, format!("expected an integer, found '{s}'"))
        }),
        other => Err(Error::filter_argument(
            filter,
            format!("expected an integer, found {}", other.kind()),
        )),
    }
}

/// Stringifies a filter argument the way output statements do.
#[must_use]
pub fn str_arg(value: &Value) -> String {
    value.render()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn num_arg_parses_numeric_strings() {
        assert_eq!(num_arg(&Value::str("42")), Some(Num::Int(42)));
        assert_eq!(num_arg(&Value::str("1.5")), Some(Num::Float(1.5)));
        assert_eq!(num_arg(&Value::str("abc")), None);
        assert_eq!(num_arg(&Value::Bool(true)), None);
    }

    #[test]
    fn int_arg_errors_name_the_filter() {
        let err = int_arg("slice", &Value::str("x")).unwrap_err();
        assert!(err.to_string().contains("slice"));
    }

    #[test]
    fn registry_lookup_and_replacement() {
        let mut registry = FilterRegistry::new();
        registry.register("shout", |call: FilterCall<'_>| {
            Ok(Value::str(call.value.render().to_uppercase()))
        });
        assert!(registry.get("shout").is_some());
        assert!(registry.get("whisper").is_none());
    }
}
