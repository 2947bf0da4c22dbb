//! Expression tree produced by the Pratt parser.
//!
//! The `Display` impls render canonical Liquid source; re-parsing that
//! source yields a structurally equal tree, which the parse round-trip
//! property relies on.

use std::fmt;

/// One element of an identifier path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathElement {
    /// A static name, `a.b` or `a["b"]`.
    Name(String),
    /// A static integer subscript, `a[0]` or `a.0`.
    Index(i64),
    /// A nested identifier subscript, `a[b.c]`.
    Nested(IdentifierPath),
}

/// An identifier: an ordered path of elements.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierPath(pub Vec<PathElement>);

impl IdentifierPath {
    /// The single name of an unchained identifier, if it is one.
    #[must_use]
    pub fn as_single_name(&self) -> Option<&str> {
        match self.0.as_slice() {
            [PathElement::Name(name)] => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for IdentifierPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.0.iter().enumerate() {
            match element {
                PathElement::Name(name) => {
                    if is_plain_name(name) {
                        if i > 0 {
                            write!(f, ".")?;
                        }
                        write!(f, "{name}")?;
                    } else {
                        write!(f, "[\"{name}\"]")?;
                    }
                }
                PathElement::Index(index) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{index}")?;
                }
                PathElement::Nested(path) => write!(f, "[{path}]")?,
            }
        }
        Ok(())
    }
}

/// Returns true when a name can appear in dotted position unquoted.
fn is_plain_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Minus,
}

/// Infix operators, in source form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum InfixOp {
    #[strum(to_string = "==")]
    Eq,
    #[strum(to_string = "!=")]
    Ne,
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = "<=")]
    Le,
    #[strum(to_string = ">=")]
    Ge,
    #[strum(to_string = "contains")]
    Contains,
    #[strum(to_string = "and")]
    And,
    #[strum(to_string = "or")]
    Or,
}

/// A primary, prefix or infix expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Nil,
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A range literal; each bound is an integer literal or identifier.
    Range {
        start: Box<Expression>,
        stop: Box<Expression>,
    },
    Identifier(IdentifierPath),
    Prefix {
        op: PrefixOp,
        right: Box<Expression>,
    },
    Infix {
        left: Box<Expression>,
        op: InfixOp,
        right: Box<Expression>,
    },
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Empty => write!(f, "empty"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => {
                let mut buf = ryu::Buffer::new();
                write!(f, "{}", buf.format(*x))
            }
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Range { start, stop } => write!(f, "({start}..{stop})"),
            Self::Identifier(path) => write!(f, "{path}"),
            Self::Prefix { op: PrefixOp::Minus, right } => write!(f, "-{right}"),
            Self::Infix { left, op, right } => write!(f, "{left} {op} {right}"),
        }
    }
}

/// One filter application: `name` plus positional and named arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCallExpr {
    pub name: String,
    pub args: Vec<Expression>,
    pub kwargs: Vec<(String, Expression)>,
}

impl fmt::Display for FilterCallExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() || !self.kwargs.is_empty() {
            write!(f, ": ")?;
            let mut first = true;
            for arg in &self.args {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
                first = false;
            }
            for (name, arg) in &self.kwargs {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{name}: {arg}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// An expression with zero or more filters applied.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredExpression {
    pub expr: Expression,
    pub filters: Vec<FilterCallExpr>,
}

impl fmt::Display for FilteredExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        for filter in &self.filters {
            write!(f, " | {filter}")?;
        }
        Ok(())
    }
}

/// The expression of an `assign` tag: a name bound to a filtered expression.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentExpression {
    pub name: String,
    pub value: FilteredExpression,
}

impl fmt::Display for AssignmentExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

/// The iterable of a loop expression.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopSource {
    Identifier(IdentifierPath),
    Range {
        start: Box<Expression>,
        stop: Box<Expression>,
    },
}

impl fmt::Display for LoopSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(path) => write!(f, "{path}"),
            Self::Range { start, stop } => write!(f, "({start}..{stop})"),
        }
    }
}

/// The head of a `for` or `tablerow` tag.
///
/// Modifiers may appear in any order in source; a repeated modifier
/// overwrites the earlier occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopExpression {
    pub var: String,
    pub source: LoopSource,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
    pub cols: Option<Expression>,
    pub reversed: bool,
}

impl LoopExpression {
    /// Loop identification for the drop's `name` attribute,
    /// e.g. `"tag-product.tags"`.
    #[must_use]
    pub fn drop_name(&self) -> String {
        format!("{}-{}", self.var, self.source)
    }
}

impl fmt::Display for LoopExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.var, self.source)?;
        if let Some(limit) = &self.limit {
            write!(f, " limit:{limit}")?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " offset:{offset}")?;
        }
        if let Some(cols) = &self.cols {
            write!(f, " cols:{cols}")?;
        }
        if self.reversed {
            write!(f, " reversed")?;
        }
        Ok(())
    }
}
