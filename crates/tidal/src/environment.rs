//! The environment: render configuration plus the parse → compile → render
//! pipeline.
//!
//! An `Environment` owns everything a render is configured by: the
//! tolerance mode, resource limits, the filter registry, the template
//! loader and the undefined policy. Parsing produces a `Template`, an
//! immutable compiled program that can render concurrently; each render
//! gets a private context and VM.

use std::fmt;
use std::sync::Arc;

use crate::ast::ParseTree;
use crate::bytecode::code::Program;
use crate::bytecode::{compiler, vm};
use crate::context::{Context, Globals};
use crate::error::{Error, Mode, Result};
use crate::filters::{Filter, FilterRegistry};
use crate::limits::ResourceLimits;
use crate::loader::{NoLoader, TemplateLoader};
use crate::parse;

/// Render configuration and the entry point of the pipeline.
pub struct Environment {
    mode: Mode,
    limits: ResourceLimits,
    filters: FilterRegistry,
    loader: Box<dyn TemplateLoader>,
    strict_undefined: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            mode: Mode::Strict,
            limits: ResourceLimits::default(),
            filters: FilterRegistry::with_builtins(),
            loader: Box::new(NoLoader),
            strict_undefined: false,
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("mode", &self.mode)
            .field("limits", &self.limits)
            .field("strict_undefined", &self.strict_undefined)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Creates an environment with default configuration: strict mode,
    /// unrestricted limits, the built-in filters and no template loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the error tolerance mode.
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the resource limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the template loader used by `include` and `render`.
    #[must_use]
    pub fn with_loader(mut self, loader: impl TemplateLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// Makes the first use of an undefined variable a render-time error.
    #[must_use]
    pub fn with_strict_undefined(mut self, strict: bool) -> Self {
        self.strict_undefined = strict;
        self
    }

    /// Registers a filter, replacing any built-in with the same name.
    pub fn register_filter(&mut self, name: impl Into<String>, filter: impl Filter + 'static) {
        self.filters.register(name, filter);
    }

    /// The configured tolerance mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The configured resource limits.
    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// The filter registry.
    #[must_use]
    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Whether undefined lookups error on first use.
    #[must_use]
    pub fn strict_undefined(&self) -> bool {
        self.strict_undefined
    }

    /// Lexes, parses and compiles template source.
    pub fn parse(&self, source: &str) -> Result<Template<'_>> {
        let (tree, warnings) = parse::parse(source, self.mode)?;
        let program = Arc::new(compiler::compile(&tree)?);
        Ok(Template {
            env: self,
            tree,
            program,
            parse_warnings: warnings,
        })
    }

    /// Parses and renders source in one step.
    pub fn render_str(&self, source: &str, globals: &Globals) -> Result<String> {
        self.parse(source)?.render(globals)
    }

    /// Loads and compiles a partial template for `include`/`render`.
    ///
    /// Errors are tagged with the partial's name.
    pub(crate) fn compile_partial(&self, name: &str) -> Result<(Arc<Program>, Vec<Error>)> {
        let source = self.loader.load(name).map_err(|err| err.in_template(name))?;
        let (tree, warnings) = parse::parse(&source, self.mode).map_err(|err| err.in_template(name))?;
        let program = compiler::compile(&tree).map_err(|err| err.in_template(name))?;
        Ok((Arc::new(program), warnings))
    }
}

/// A parsed and compiled template, bound to its environment.
///
/// The compiled program is immutable; concurrent renders of one template
/// are safe because every render builds its own context and VM.
#[derive(Debug)]
pub struct Template<'e> {
    env: &'e Environment,
    tree: ParseTree,
    program: Arc<Program>,
    parse_warnings: Vec<Error>,
}

impl Template<'_> {
    /// Renders the template against the given globals.
    pub fn render(&self, globals: &Globals) -> Result<String> {
        let mut context = Context::new(globals);
        vm::render(self.env, &self.program, &mut context)
    }

    /// Renders and also returns the warnings collected in warn mode,
    /// parse-time warnings included.
    pub fn render_with_warnings(&self, globals: &Globals) -> Result<(String, Vec<Error>)> {
        let mut context = Context::new(globals);
        let output = vm::render(self.env, &self.program, &mut context)?;
        let mut warnings = self.parse_warnings.clone();
        warnings.extend(context.into_warnings());
        Ok((output, warnings))
    }

    /// The parse tree, rendered back to canonical template source.
    #[must_use]
    pub fn ast_string(&self) -> String {
        self.tree.to_string()
    }

    /// The parse tree.
    #[must_use]
    pub fn tree(&self) -> &ParseTree {
        &self.tree
    }

    /// The compiled program.
    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Formats the compiled program for debugging.
    #[must_use]
    pub fn disassemble(&self) -> String {
        self.program.disassemble()
    }
}
