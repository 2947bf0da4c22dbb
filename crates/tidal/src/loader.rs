//! The template loader collaborator.
//!
//! `include` and `render` resolve partial template names through a loader.
//! Implementations may front a file system, a database or remote storage;
//! the engine only requires a name to source lookup with a distinguishable
//! not-found error.

use ahash::AHashMap;

use crate::error::{Error, ErrorKind, Result};

/// Resolves partial template names to template source.
pub trait TemplateLoader: Send + Sync {
    /// Returns the source for `name`, or a `TemplateNotFound` error.
    fn load(&self, name: &str) -> Result<String>;
}

/// A loader with no templates; every lookup is `TemplateNotFound`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoader;

impl TemplateLoader for NoLoader {
    fn load(&self, name: &str) -> Result<String> {
        Err(not_found(name))
    }
}

/// A map-backed loader, mostly useful for tests and embedded templates.
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    templates: AHashMap<String, String>,
}

impl InMemoryLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named template.
    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for InMemoryLoader {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut loader = Self::new();
        for (name, source) in iter {
            loader.insert(name, source);
        }
        loader
    }
}

impl TemplateLoader for InMemoryLoader {
    fn load(&self, name: &str) -> Result<String> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }
}

fn not_found(name: &str) -> Error {
    Error::new(ErrorKind::TemplateNotFound, format!("'{name}'"))
}

/// The name a `with` binding defaults to: the final path segment of the
/// template name, without an extension.
#[must_use]
pub fn template_base_name(name: &str) -> &str {
    let tail = name.rsplit(['/', '\\']).next().unwrap_or(name);
    tail.split('.').next().unwrap_or(tail)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn in_memory_lookup_and_not_found() {
        let loader = InMemoryLoader::from_iter([("greeting", "Hello, {{ you }}!")]);
        assert_eq!(loader.load("greeting").unwrap(), "Hello, {{ you }}!");
        let err = loader.load("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    }

    #[test]
    fn base_names_drop_directories_and_extensions() {
        assert_eq!(template_base_name("product"), "product");
        assert_eq!(template_base_name("snippets/product.liquid"), "product");
    }
}
