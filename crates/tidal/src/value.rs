//! The runtime value model.
//!
//! `Value` is the sum type flowing through the VM stack, the render context
//! and filter calls. Collections are cheaply cloneable (`Rc`), so pushing a
//! value onto the stack or binding it in a namespace never deep-copies.
//!
//! Two sentinels deserve a note. `Undefined` is the result of a failed
//! lookup: it is falsy, iterates as empty, stringifies as empty and compares
//! equal to `Nil`, but it remembers the name that missed so strict-undefined
//! mode and error messages can report it. `Empty` compares equal to any
//! empty string, array or map, which is what makes `{% if x == empty %}`
//! work. `Nop`, `StopIter`, iterators, compiled blocks and dispatch tokens
//! are internal to the VM and never escape into template-visible data.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::bytecode::code::{CompiledBlock, TagDispatch};
use crate::drops::{ForLoopDrop, LoopIter, TableRowDrop};
use crate::error::{Error, Result};

/// A string-keyed, insertion-ordered map of values.
pub type ValueMap = IndexMap<String, Value>;

/// A lazy inclusive integer range, as produced by `(start..stop)`.
///
/// `stop < start` iterates empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
}

impl RangeValue {
    /// Number of integers the range yields.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.stop < self.start {
            0
        } else {
            usize::try_from(self.stop - self.start + 1).unwrap_or(usize::MAX)
        }
    }

    /// Returns true if the range yields nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stop < self.start
    }

    /// Iterates the range values.
    pub fn iter(&self) -> impl Iterator<Item = i64> + use<> {
        self.start..=self.stop
    }
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.stop)
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Array(Rc<Vec<Value>>),
    Map(Rc<ValueMap>),
    Range(RangeValue),
    /// Result of a failed lookup, carrying the name that missed.
    Undefined(Rc<str>),
    /// Sentinel equal to any empty string, array or map.
    Empty,
    /// VM-internal: placeholder pushed where a jump expects an operand.
    Nop,
    /// VM-internal: end-of-iteration marker.
    StopIter,
    /// VM-internal: an active loop iterator.
    Iter(Rc<RefCell<LoopIter>>),
    /// The `forloop` drop of an active `for` loop.
    ForLoop(Rc<RefCell<ForLoopDrop>>),
    /// The `tablerowloop` drop of an active `tablerow` loop.
    TableRow(Rc<RefCell<TableRowDrop>>),
    /// VM-internal: a compiled loop body pulled from the constant pool.
    Block(Arc<CompiledBlock>),
    /// VM-internal: a tag dispatch token for `EXECBLOCK`.
    TagName(TagDispatch),
}

impl Value {
    /// Builds a string value.
    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    /// Builds an array value.
    #[must_use]
    pub fn array(items: Vec<Self>) -> Self {
        Self::Array(Rc::new(items))
    }

    /// Builds an undefined value for the given missing name.
    #[must_use]
    pub fn undefined(name: &str) -> Self {
        Self::Undefined(Rc::from(name))
    }

    /// A short name for the value's kind, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "hash",
            Self::Range(_) => "range",
            Self::Undefined(_) => "undefined",
            Self::Empty => "empty",
            Self::Nop | Self::StopIter | Self::Iter(_) | Self::Block(_) | Self::TagName(_) => "internal",
            Self::ForLoop(_) => "forloop",
            Self::TableRow(_) => "tablerowloop",
        }
    }

    /// Liquid truthiness: only `nil`, `false` and undefined are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false) | Self::Undefined(_))
    }

    /// Returns true for the `Undefined` sentinel.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined(_))
    }

    /// Returns the value as an `i64` if it is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Liquid equality.
    ///
    /// `Undefined` equals `Nil` and other `Undefined`s; `Empty` equals any
    /// empty string, array or map; integers and floats cross-compare
    /// numerically. Strings never coerce: `"1" == 1` is false.
    #[must_use]
    pub fn liquid_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, b) => b.is_empty_like(),
            (a, Self::Empty) => a.is_empty_like(),
            (Self::Nil | Self::Undefined(_), Self::Nil | Self::Undefined(_)) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.liquid_eq(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.liquid_eq(w)))
            }
            (Self::Range(a), Self::Range(b)) => a == b,
            _ => false,
        }
    }

    /// Whether the `Empty` sentinel compares equal to this value.
    fn is_empty_like(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Str(s) => s.is_empty(),
            Self::Array(a) => a.is_empty(),
            Self::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Ordered comparison for `<`, `>`, `<=`, `>=`.
    ///
    /// Numbers compare numerically and strings lexicographically; any other
    /// pairing is a type error.
    pub fn liquid_cmp(&self, other: &Self) -> Result<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Ok(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal)),
            (Self::Int(a), Self::Float(b)) => {
                Ok((*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (Self::Float(a), Self::Int(b)) => {
                Ok(a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal))
            }
            (Self::Str(a), Self::Str(b)) => Ok(a.cmp(b)),
            _ => Err(Error::typ(format!(
                "'{}' and '{}' are not comparable",
                self.kind(),
                other.kind()
            ))),
        }
    }

    /// Membership test for the `contains` operator.
    ///
    /// Strings test for a substring (the needle is stringified), arrays for
    /// an equal element and hashes for a key.
    pub fn liquid_contains(&self, needle: &Self) -> Result<bool> {
        match self {
            Self::Str(s) => Ok(s.contains(&needle.render())),
            Self::Array(items) => Ok(items.iter().any(|item| item.liquid_eq(needle))),
            Self::Map(map) => Ok(map.contains_key(needle.render().as_str())),
            Self::Undefined(_) | Self::Nil => Ok(false),
            _ => Err(Error::typ(format!("'{}' does not support 'contains'", self.kind()))),
        }
    }

    /// Subscripting, shared by `GETINDEX` and the `map`/`where` filters.
    ///
    /// Returns `None` when the key is missing. Arrays support negative
    /// indices and the `size`/`first`/`last` properties; strings and ranges
    /// support `size` (and `first`/`last` for ranges); drops expose their
    /// attribute set.
    #[must_use]
    pub fn get_index(&self, key: &Self) -> Option<Self> {
        match self {
            Self::Array(items) => match key {
                Self::Int(i) => array_index(items, *i),
                Self::Str(s) => match s.as_ref() {
                    "size" => Some(Self::Int(items.len() as i64)),
                    "first" => Some(items.first().cloned().unwrap_or(Self::Nil)),
                    "last" => Some(items.last().cloned().unwrap_or(Self::Nil)),
                    _ => None,
                },
                _ => None,
            },
            Self::Map(map) => match key {
                Self::Str(s) => map
                    .get(s.as_ref())
                    .cloned()
                    .or_else(|| (s.as_ref() == "size").then(|| Self::Int(map.len() as i64))),
                _ => None,
            },
            Self::Str(s) => match key {
                Self::Int(i) => {
                    let chars: Vec<char> = s.chars().collect();
                    let idx = normalize_index(*i, chars.len())?;
                    Some(Self::str(chars[idx].to_string()))
                }
                Self::Str(k) if k.as_ref() == "size" => Some(Self::Int(s.chars().count() as i64)),
                _ => None,
            },
            Self::Range(range) => match key {
                Self::Str(k) => match k.as_ref() {
                    "size" => Some(Self::Int(range.len() as i64)),
                    "first" => (!range.is_empty()).then_some(Self::Int(range.start)),
                    "last" => (!range.is_empty()).then_some(Self::Int(range.stop)),
                    _ => None,
                },
                _ => None,
            },
            Self::ForLoop(drop) => key.as_str().and_then(|k| drop.borrow().get(k)),
            Self::TableRow(drop) => key.as_str().and_then(|k| drop.borrow().get(k)),
            _ => None,
        }
    }

    /// Renders the value the way an output statement would.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_to(&mut out);
        out
    }

    /// Appends the rendered form of the value to `out`.
    pub fn render_to(&self, out: &mut String) {
        match self {
            Self::Nil | Self::Undefined(_) | Self::Empty | Self::Nop | Self::StopIter => {}
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Self::Float(x) => render_float(*x, out),
            Self::Str(s) => out.push_str(s),
            Self::Array(items) => {
                for item in items.iter() {
                    item.render_to(out);
                }
            }
            Self::Map(map) => {
                out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push('"');
                    out.push_str(k);
                    out.push_str("\": ");
                    v.render_to(out);
                }
                out.push('}');
            }
            Self::Range(range) => {
                out.push_str(&range.to_string());
            }
            Self::ForLoop(_) => out.push_str("ForLoop"),
            Self::TableRow(_) => out.push_str("TableRowLoop"),
            Self::Iter(_) | Self::Block(_) | Self::TagName(_) => {}
        }
    }

    /// Converts a JSON document into a value tree.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Nil,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || Self::Float(n.as_f64().unwrap_or(f64::NAN)),
                Self::Int,
            ),
            serde_json::Value::String(s) => Self::str(s),
            serde_json::Value::Array(items) => {
                Self::array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(Rc::new(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            )),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Formats a float the way Liquid output does: shortest round-trip repr,
/// always with a decimal point for finite values.
fn render_float(x: f64, out: &mut String) {
    if x.is_finite() {
        let mut buf = ryu::Buffer::new();
        out.push_str(buf.format(x));
    } else if x.is_nan() {
        out.push_str("NaN");
    } else if x > 0.0 {
        out.push_str("inf");
    } else {
        out.push_str("-inf");
    }
}

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let idx = if index < 0 { index + len } else { index };
    if (0..len).contains(&idx) {
        usize::try_from(idx).ok()
    } else {
        None
    }
}

fn array_index(items: &[Value], index: i64) -> Option<Value> {
    normalize_index(index, items.len()).map(|idx| items[idx].clone())
}
