//! Error kinds and the tolerance policy applied to them.
//!
//! Every error carries the source line it was raised on (when known) and the
//! name of the template being parsed or rendered. Resource-ceiling errors and
//! stack overflow are always fatal; everything else is subject to the
//! environment's [`Mode`].

use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Template correctness tolerance.
///
/// `Strict` aborts the parse or render on the first error. `Warn` converts
/// recoverable errors into warnings and continues with empty output for the
/// failing statement. `Lax` swallows recoverable errors silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub enum Mode {
    Lax,
    Warn,
    #[default]
    Strict,
}

/// Classification of an [`Error`].
///
/// The set mirrors the render pipeline: syntax errors from the lexer and
/// parser, type errors from the VM, filter errors from the registry, loader
/// and dispatch errors from partial templates, and one kind per resource
/// ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    #[strum(to_string = "liquid syntax error")]
    Syntax,
    #[strum(to_string = "liquid type error")]
    Type,
    #[strum(to_string = "filter argument error")]
    FilterArgument,
    #[strum(to_string = "filter value error")]
    FilterValue,
    #[strum(to_string = "unknown filter")]
    NoSuchFilter,
    #[strum(to_string = "template not found")]
    TemplateNotFound,
    #[strum(to_string = "disabled tag")]
    DisabledTag,
    #[strum(to_string = "context depth limit reached")]
    ContextDepth,
    #[strum(to_string = "loop iteration limit reached")]
    LoopIterationLimit,
    #[strum(to_string = "local namespace limit reached")]
    LocalNamespaceLimit,
    #[strum(to_string = "output stream limit reached")]
    OutputStreamLimit,
    #[strum(to_string = "stack overflow")]
    StackOverflow,
}

impl ErrorKind {
    /// Returns true if errors of this kind abort the render regardless of
    /// the configured tolerance.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::ContextDepth
                | Self::LoopIterationLimit
                | Self::LocalNamespaceLimit
                | Self::OutputStreamLimit
                | Self::StackOverflow
        )
    }
}

/// An error raised while lexing, parsing, compiling or rendering a template.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    line: Option<usize>,
    template: Option<String>,
}

impl Error {
    /// Creates an error of the given kind with no source position.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            template: None,
        }
    }

    /// Creates a syntax error at the given line.
    #[must_use]
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::new(ErrorKind::Syntax, message).at_line(line)
    }

    /// Creates a render-time type error.
    #[must_use]
    pub fn typ(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    /// Creates a filter argument error, prefixed with the filter name.
    #[must_use]
    pub fn filter_argument(filter: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FilterArgument, format!("{filter}: {}", message.into()))
    }

    /// Creates a filter value error, prefixed with the filter name.
    #[must_use]
    pub fn filter_value(filter: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FilterValue, format!("{filter}: {}", message.into()))
    }

    /// Sets the source line, keeping an already recorded line.
    #[must_use]
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    /// Sets the template name, keeping an already recorded name.
    #[must_use]
    pub fn in_template(mut self, name: &str) -> Self {
        if self.template.is_none() {
            self.template = Some(name.to_string());
        }
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the bare message, without position information.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the source line, if one was recorded.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    /// Returns the template name, if one was recorded.
    #[must_use]
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// Returns true if this error aborts the render regardless of tolerance.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(line) = self.line {
            write!(f, ", on line {line}")?;
        }
        if let Some(template) = &self.template {
            write!(f, " of {template}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn display_includes_position() {
        let err = Error::syntax("unexpected tag 'endfor'", 3).in_template("footer");
        assert_eq!(
            err.to_string(),
            "liquid syntax error: unexpected tag 'endfor', on line 3 of footer"
        );
    }

    #[test]
    fn resource_errors_are_fatal() {
        assert!(Error::new(ErrorKind::OutputStreamLimit, "output stream limit reached").is_fatal());
        assert!(Error::new(ErrorKind::StackOverflow, "stack overflow").is_fatal());
        assert!(!Error::syntax("bad", 1).is_fatal());
    }

    #[test]
    fn at_line_keeps_first_position() {
        let err = Error::syntax("bad", 2).at_line(7);
        assert_eq!(err.line(), Some(2));
    }
}
