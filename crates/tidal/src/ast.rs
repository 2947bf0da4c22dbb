//! The parse tree.
//!
//! Tags are a closed set, so the tree is one tagged union rather than a
//! class hierarchy; the compiler dispatches with a single `match`. Each node
//! owns its children exclusively and records the line of its opening tag.
//!
//! `Display` renders canonical template source: parsing the displayed form
//! of a tree yields a structurally equal tree.

use std::fmt;

use crate::expression::{
    AssignmentExpression, Expression, FilteredExpression, LoopExpression,
};

/// An ordered sequence of nodes delimiting a lexical scope.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub statements: Vec<Node>,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            write!(f, "{statement}")?;
        }
        Ok(())
    }
}

/// A condition with its consequence block: `if`/`elsif` arms share this.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalBranch {
    pub condition: Expression,
    pub block: Block,
}

/// One `when` clause of a `case` tag.
#[derive(Debug, Clone, PartialEq)]
pub struct WhenClause {
    pub candidates: Vec<Expression>,
    pub block: Block,
}

/// The `with` clause of an `include`/`render` tag: a bound expression and
/// an optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct BindClause {
    pub value: Expression,
    pub alias: Option<String>,
}

/// A parse-tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A literal text run.
    Literal { text: String },
    /// `{{ expr | filters }}` (also produced by the `echo` tag).
    Output { expr: FilteredExpression, line: usize },
    /// `{% assign name = expr %}`
    Assign { expr: AssignmentExpression, line: usize },
    /// `{% capture name %}…{% endcapture %}`
    Capture { name: String, block: Block, line: usize },
    /// `{% if %}`/`{% elsif %}`/`{% else %}`
    If {
        branches: Vec<ConditionalBranch>,
        default: Option<Block>,
        line: usize,
    },
    /// `{% unless %}` with optional `elsif`/`else` arms.
    Unless {
        branches: Vec<ConditionalBranch>,
        default: Option<Block>,
        line: usize,
    },
    /// `{% case %}`/`{% when %}`/`{% else %}`
    Case {
        expr: Expression,
        whens: Vec<WhenClause>,
        default: Option<Block>,
        line: usize,
    },
    /// `{% for %}` with an optional `{% else %}` fallback.
    For {
        expr: LoopExpression,
        block: Block,
        default: Option<Block>,
        line: usize,
    },
    /// `{% tablerow %}`
    TableRow {
        expr: LoopExpression,
        block: Block,
        line: usize,
    },
    /// `{% cycle [group:] v1, v2, … %}`
    Cycle {
        group: Option<Expression>,
        args: Vec<Expression>,
        line: usize,
    },
    /// `{% increment name %}`
    Increment { name: String, line: usize },
    /// `{% decrement name %}`
    Decrement { name: String, line: usize },
    /// `{% break %}`
    Break { line: usize },
    /// `{% continue %}`
    Continue { line: usize },
    /// `{% include name [with expr [as alias]] [, k: v]* %}`
    Include {
        name: Expression,
        bind: Option<BindClause>,
        args: Vec<(String, Expression)>,
        line: usize,
    },
    /// `{% render 'name' [with expr as alias | for expr as alias] [, k: v]* %}`
    Render {
        name: Expression,
        bind: Option<BindClause>,
        /// True for the `for` clause: render once per element.
        repeat: bool,
        args: Vec<(String, Expression)>,
        line: usize,
    },
}

impl Node {
    /// The source line of the node's opening tag, when it has one.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Literal { .. } => None,
            Self::Output { line, .. }
            | Self::Assign { line, .. }
            | Self::Capture { line, .. }
            | Self::If { line, .. }
            | Self::Unless { line, .. }
            | Self::Case { line, .. }
            | Self::For { line, .. }
            | Self::TableRow { line, .. }
            | Self::Cycle { line, .. }
            | Self::Increment { line, .. }
            | Self::Decrement { line, .. }
            | Self::Break { line }
            | Self::Continue { line }
            | Self::Include { line, .. }
            | Self::Render { line, .. } => Some(*line),
        }
    }
}

fn write_conditional(
    f: &mut fmt::Formatter<'_>,
    keyword: &str,
    branches: &[ConditionalBranch],
    default: Option<&Block>,
) -> fmt::Result {
    for (i, branch) in branches.iter().enumerate() {
        if i == 0 {
            write!(f, "{{% {keyword} {} %}}{}", branch.condition, branch.block)?;
        } else {
            write!(f, "{{% elsif {} %}}{}", branch.condition, branch.block)?;
        }
    }
    if let Some(block) = default {
        write!(f, "{{% else %}}{block}")?;
    }
    write!(f, "{{% end{keyword} %}}")
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { text } => write!(f, "{text}"),
            Self::Output { expr, .. } => write!(f, "{{{{ {expr} }}}}"),
            Self::Assign { expr, .. } => write!(f, "{{% assign {expr} %}}"),
            Self::Capture { name, block, .. } => {
                write!(f, "{{% capture {name} %}}{block}{{% endcapture %}}")
            }
            Self::If { branches, default, .. } => {
                write_conditional(f, "if", branches, default.as_ref())
            }
            Self::Unless { branches, default, .. } => {
                write_conditional(f, "unless", branches, default.as_ref())
            }
            Self::Case { expr, whens, default, .. } => {
                write!(f, "{{% case {expr} %}}")?;
                for when in whens {
                    write!(f, "{{% when ")?;
                    for (i, candidate) in when.candidates.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{candidate}")?;
                    }
                    write!(f, " %}}{}", when.block)?;
                }
                if let Some(block) = default {
                    write!(f, "{{% else %}}{block}")?;
                }
                write!(f, "{{% endcase %}}")
            }
            Self::For { expr, block, default, .. } => {
                write!(f, "{{% for {expr} %}}{block}")?;
                if let Some(default) = default {
                    write!(f, "{{% else %}}{default}")?;
                }
                write!(f, "{{% endfor %}}")
            }
            Self::TableRow { expr, block, .. } => {
                write!(f, "{{% tablerow {expr} %}}{block}{{% endtablerow %}}")
            }
            Self::Cycle { group, args, .. } => {
                write!(f, "{{% cycle ")?;
                if let Some(group) = group {
                    write!(f, "{group}: ")?;
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, " %}}")
            }
            Self::Increment { name, .. } => write!(f, "{{% increment {name} %}}"),
            Self::Decrement { name, .. } => write!(f, "{{% decrement {name} %}}"),
            Self::Break { .. } => write!(f, "{{% break %}}"),
            Self::Continue { .. } => write!(f, "{{% continue %}}"),
            Self::Include { name, bind, args, .. } => {
                write!(f, "{{% include {name}")?;
                if let Some(bind) = bind {
                    write!(f, " with {}", bind.value)?;
                    if let Some(alias) = &bind.alias {
                        write!(f, " as {alias}")?;
                    }
                }
                for (key, value) in args {
                    write!(f, ", {key}: {value}")?;
                }
                write!(f, " %}}")
            }
            Self::Render { name, bind, repeat, args, .. } => {
                write!(f, "{{% render {name}")?;
                if let Some(bind) = bind {
                    let keyword = if *repeat { "for" } else { "with" };
                    write!(f, " {keyword} {}", bind.value)?;
                    if let Some(alias) = &bind.alias {
                        write!(f, " as {alias}")?;
                    }
                }
                for (key, value) in args {
                    write!(f, ", {key}: {value}")?;
                }
                write!(f, " %}}")
            }
        }
    }
}

/// The root of a parsed template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParseTree {
    pub statements: Vec<Node>,
}

impl fmt::Display for ParseTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            write!(f, "{statement}")?;
        }
        Ok(())
    }
}
