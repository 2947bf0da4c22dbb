//! The render context: everything mutable during a single render.
//!
//! A context owns the caller's read-only globals, the name-keyed locals
//! namespace written by `assign`/`capture`, a stack of extension frames
//! supplying extra bindings (loop drops, `include`/`render` arguments),
//! per-group cycle state, `increment`/`decrement` counters, and the
//! resource counters.
//!
//! `include` runs the partial against the caller's context, so locals and
//! counters are shared. `render` runs against an isolated child context
//! that sees only the globals; the loop-iteration counter crosses that
//! boundary only when configured to.

use std::cell::Cell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::error::{Error, ErrorKind, Result};
use crate::limits::ResourceLimits;
use crate::value::Value;

/// Read-only, caller-provided name bindings.
#[derive(Debug, Default)]
pub struct Globals {
    map: AHashMap<String, Value>,
}

impl Globals {
    /// Creates an empty globals map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.map.insert(name.into(), value);
    }

    /// Looks a name up.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(name)
    }

    /// Builds globals from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: serde_json::Value = serde_json::from_str(json)
            .map_err(|err| Error::typ(format!("invalid globals JSON: {err}")))?;
        let serde_json::Value::Object(map) = parsed else {
            return Err(Error::typ("globals must be a JSON object"));
        };
        let mut globals = Self::new();
        for (key, value) in &map {
            globals.insert(key.clone(), Value::from_json(value));
        }
        Ok(globals)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Globals {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        let mut globals = Self::new();
        for (key, value) in iter {
            globals.insert(key, value);
        }
        globals
    }
}

/// One frame of extra name bindings shadowing everything beneath it.
#[derive(Debug)]
pub enum ExtensionFrame {
    /// Pushed at loop entry: binds the loop variable and the drop name.
    Loop { var: Box<str>, drop: Value },
    /// Pushed for `include`/`render` argument bindings.
    Bindings(AHashMap<String, Value>),
}

impl ExtensionFrame {
    fn get(&self, name: &str) -> Option<Value> {
        match self {
            Self::Loop { var, drop } => {
                if name == var.as_ref() {
                    return Some(match drop {
                        Value::ForLoop(drop) => drop.borrow().item(),
                        Value::TableRow(drop) => drop.borrow().item(),
                        _ => Value::Nil,
                    });
                }
                let drop_name = match drop {
                    Value::ForLoop(_) => "forloop",
                    Value::TableRow(_) => "tablerowloop",
                    _ => return None,
                };
                (name == drop_name).then(|| drop.clone())
            }
            Self::Bindings(map) => map.get(name).cloned(),
        }
    }
}

/// Mutable per-render state.
#[derive(Debug)]
pub struct Context<'g> {
    globals: &'g Globals,
    locals: AHashMap<String, Value>,
    extensions: Vec<ExtensionFrame>,
    counters: AHashMap<String, i64>,
    cycles: AHashMap<String, usize>,
    /// Current `include`/`render` nesting depth.
    depth: usize,
    /// Set inside a `render`ed partial, where `include` is disabled.
    include_disabled: bool,
    namespace_writes: usize,
    /// Total loop iterations, shared with included partials.
    loop_iterations: Rc<Cell<usize>>,
    warnings: Vec<Error>,
}

impl<'g> Context<'g> {
    /// Creates a root context over the caller's globals.
    #[must_use]
    pub fn new(globals: &'g Globals) -> Self {
        Self {
            globals,
            locals: AHashMap::new(),
            extensions: Vec::new(),
            counters: AHashMap::new(),
            cycles: AHashMap::new(),
            depth: 0,
            include_disabled: false,
            namespace_writes: 0,
            loop_iterations: Rc::new(Cell::new(0)),
            warnings: Vec::new(),
        }
    }

    /// Creates the isolated child context a `render` invocation runs in.
    ///
    /// The child sees the same globals but fresh locals, counters and cycle
    /// state. `include` is disabled inside it.
    #[must_use]
    pub fn isolated_child(&self, limits: &ResourceLimits) -> Self {
        Self {
            globals: self.globals,
            locals: AHashMap::new(),
            extensions: Vec::new(),
            counters: AHashMap::new(),
            cycles: AHashMap::new(),
            depth: self.depth,
            include_disabled: true,
            namespace_writes: 0,
            loop_iterations: if limits.carry_loop_counter_into_render {
                Rc::clone(&self.loop_iterations)
            } else {
                Rc::new(Cell::new(0))
            },
            warnings: Vec::new(),
        }
    }

    /// Absorbs a finished child's warnings.
    pub fn absorb(&mut self, child: Self) {
        self.warnings.extend(child.warnings);
    }

    /// Resolves a bare name: extension frames innermost-first, then locals,
    /// then globals. A miss returns `None`; the undefined strategy is the
    /// caller's concern.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Value> {
        for frame in self.extensions.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Some(value);
            }
        }
        if let Some(value) = self.locals.get(name) {
            return Some(value.clone());
        }
        self.globals.get(name).cloned()
    }

    /// Reads a template-scope local.
    #[must_use]
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.locals.get(name).cloned()
    }

    /// Writes a template-scope local, counting toward the namespace ceiling.
    ///
    /// Compiler-synthesized slots (`$`-prefixed) are exempt: they are not
    /// part of the template's namespace.
    pub fn set_local(&mut self, name: &str, value: Value, limits: &ResourceLimits) -> Result<()> {
        if !name.starts_with('$') {
            self.namespace_writes += 1;
            if let Some(max) = limits.max_local_namespace {
                if self.namespace_writes > max {
                    return Err(Error::new(
                        ErrorKind::LocalNamespaceLimit,
                        format!("local namespace limit reached: {} > {max}", self.namespace_writes),
                    ));
                }
            }
        }
        self.locals.insert(name.to_string(), value);
        Ok(())
    }

    /// Yields the current value of a named counter, then increments it.
    /// Counters start at zero and are independent of locals.
    pub fn increment(&mut self, name: &str) -> i64 {
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        let value = *counter;
        *counter += 1;
        value
    }

    /// Decrements a named counter, then yields it. Starts at -1.
    pub fn decrement(&mut self, name: &str) -> i64 {
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        *counter -= 1;
        *counter
    }

    /// Yields the next value of a cycle group and advances its index.
    #[must_use]
    pub fn cycle(&mut self, key: String, args: &[Value]) -> Value {
        if args.is_empty() {
            return Value::Nil;
        }
        let index = self.cycles.entry(key).or_insert(0);
        let value = args[*index % args.len()].clone();
        *index += 1;
        value
    }

    /// Counts one loop iteration against the ceiling.
    pub fn count_loop_iteration(&mut self, limits: &ResourceLimits) -> Result<()> {
        let count = self.loop_iterations.get() + 1;
        self.loop_iterations.set(count);
        if let Some(max) = limits.max_loop_iterations {
            if count > max {
                return Err(Error::new(
                    ErrorKind::LoopIterationLimit,
                    format!("loop iteration limit reached: {count} > {max}"),
                ));
            }
        }
        Ok(())
    }

    /// Pushes an extension frame.
    pub fn push_extension(&mut self, frame: ExtensionFrame) {
        self.extensions.push(frame);
    }

    /// Pops the innermost extension frame.
    pub fn pop_extension(&mut self) {
        self.extensions.pop();
    }

    /// The drop of the innermost active `for` loop, for `parentloop`.
    #[must_use]
    pub fn current_forloop(&self) -> Option<Value> {
        self.extensions.iter().rev().find_map(|frame| match frame {
            ExtensionFrame::Loop { drop: drop @ Value::ForLoop(_), .. } => Some(drop.clone()),
            _ => None,
        })
    }

    /// Enters an `include`/`render` invocation, enforcing the depth ceiling.
    pub fn enter_partial(&mut self, tag: &str, limits: &ResourceLimits) -> Result<()> {
        self.depth += 1;
        if self.depth > limits.max_context_depth {
            return Err(Error::new(
                ErrorKind::ContextDepth,
                format!("context depth limit reached while rendering '{tag}'"),
            ));
        }
        Ok(())
    }

    /// Leaves an `include`/`render` invocation.
    pub fn leave_partial(&mut self) {
        self.depth -= 1;
    }

    /// True inside a `render`ed partial, where `include` is a disabled tag.
    #[must_use]
    pub fn include_disabled(&self) -> bool {
        self.include_disabled
    }

    /// Records a warning (warn tolerance mode).
    pub fn warn(&mut self, warning: Error) {
        self.warnings.push(warning);
    }

    /// Consumes the context, returning collected warnings.
    #[must_use]
    pub fn into_warnings(self) -> Vec<Error> {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn increment_yields_then_bumps_and_decrement_bumps_then_yields() {
        let globals = Globals::new();
        let mut ctx = Context::new(&globals);
        assert_eq!(ctx.increment("n"), 0);
        assert_eq!(ctx.increment("n"), 1);
        assert_eq!(ctx.decrement("m"), -1);
        assert_eq!(ctx.decrement("m"), -2);
        // Counters with the same name stay independent of locals.
        assert!(ctx.get_local("n").is_none());
    }

    #[test]
    fn cycle_advances_modulo_group_size() {
        let globals = Globals::new();
        let mut ctx = Context::new(&globals);
        let args = [Value::str("a"), Value::str("b")];
        assert_eq!(ctx.cycle("g".to_string(), &args).render(), "a");
        assert_eq!(ctx.cycle("g".to_string(), &args).render(), "b");
        assert_eq!(ctx.cycle("g".to_string(), &args).render(), "a");
        // A different key has its own index.
        assert_eq!(ctx.cycle("h".to_string(), &args).render(), "a");
    }

    #[test]
    fn namespace_writes_are_bounded() {
        let globals = Globals::new();
        let limits = ResourceLimits::new().max_local_namespace(2);
        let mut ctx = Context::new(&globals);
        ctx.set_local("a", Value::Int(1), &limits).unwrap();
        ctx.set_local("b", Value::Int(2), &limits).unwrap();
        let err = ctx.set_local("c", Value::Int(3), &limits).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LocalNamespaceLimit);
        // Synthesized slots are exempt.
        ctx.set_local("$case0", Value::Bool(true), &limits).unwrap();
    }

    #[test]
    fn isolated_child_shares_only_globals() {
        let mut globals = Globals::new();
        globals.insert("g", Value::Int(9));
        let limits = ResourceLimits::default();
        let mut ctx = Context::new(&globals);
        ctx.set_local("x", Value::Int(1), &limits).unwrap();
        ctx.increment("n");

        let mut child = ctx.isolated_child(&limits);
        assert_eq!(child.resolve("g").unwrap().as_int(), Some(9));
        assert!(child.resolve("x").is_none());
        assert_eq!(child.increment("n"), 0);
        assert!(child.include_disabled());
    }

    #[test]
    fn depth_ceiling_names_the_tag() {
        let globals = Globals::new();
        let limits = ResourceLimits::new().max_context_depth(1);
        let mut ctx = Context::new(&globals);
        ctx.enter_partial("include", &limits).unwrap();
        let err = ctx.enter_partial("render", &limits).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContextDepth);
        assert!(err.message().contains("render"));
    }
}
