#![doc = include_str!("../../../README.md")]

mod ast;
mod bytecode;
mod context;
mod drops;
mod environment;
mod error;
mod expression;
mod filters;
mod lex;
mod limits;
mod loader;
mod parse;
mod value;

pub use crate::{
    bytecode::code::Program,
    bytecode::vm::STACK_SIZE,
    context::Globals,
    environment::{Environment, Template},
    error::{Error, ErrorKind, Mode, Result},
    filters::{Filter, FilterCall, FilterRegistry},
    limits::{DEFAULT_MAX_CONTEXT_DEPTH, ResourceLimits},
    loader::{InMemoryLoader, NoLoader, TemplateLoader},
    value::{RangeValue, Value, ValueMap},
};
