use std::sync::Arc;

use crate::error::LoaderError;
use crate::extensions::{AnalyticsExtension, AuthExtension, ElasticsearchExtension};

use super::{Extension, TerminalExtension};

/// Compile-time list of extension modules available to the [`Loader`](super::Loader).
///
/// Names are unique across all slots.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Arc<dyn Extension>>,
    reactive_search: Option<Arc<dyn TerminalExtension>>,
    search: Option<Arc<dyn TerminalExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the modules shipped with the gateway.
    pub fn builtin() -> Result<Self, LoaderError> {
        let mut registry = Self::new();
        registry.register(Arc::new(AuthExtension))?;
        registry.register(Arc::new(AnalyticsExtension))?;
        registry.register_search(Arc::new(ElasticsearchExtension))?;
        Ok(registry)
    }

    pub fn register(&mut self, extension: Arc<dyn Extension>) -> Result<(), LoaderError> {
        self.ensure_unique(extension.name())?;
        self.extensions.push(extension);
        Ok(())
    }

    pub fn register_search(
        &mut self,
        terminal: Arc<dyn TerminalExtension>,
    ) -> Result<(), LoaderError> {
        self.ensure_unique(terminal.name())?;
        if let Some(existing) = &self.search {
            return Err(LoaderError::DuplicateExtension(existing.name().to_string()));
        }
        self.search = Some(terminal);
        Ok(())
    }

    pub fn register_reactive_search(
        &mut self,
        terminal: Arc<dyn TerminalExtension>,
    ) -> Result<(), LoaderError> {
        self.ensure_unique(terminal.name())?;
        if let Some(existing) = &self.reactive_search {
            return Err(LoaderError::DuplicateExtension(existing.name().to_string()));
        }
        self.reactive_search = Some(terminal);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    /// Every registered name, extensions first in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.extensions
            .iter()
            .map(|e| e.name())
            .chain(self.reactive_search.iter().map(|t| t.name()))
            .chain(self.search.iter().map(|t| t.name()))
    }

    pub(super) fn extensions(&self) -> &[Arc<dyn Extension>] {
        &self.extensions
    }

    pub(super) fn reactive_search(&self) -> Option<&Arc<dyn TerminalExtension>> {
        self.reactive_search.as_ref()
    }

    pub(super) fn search(&self) -> Option<&Arc<dyn TerminalExtension>> {
        self.search.as_ref()
    }

    fn ensure_unique(&self, name: &str) -> Result<(), LoaderError> {
        if self.contains(name) {
            return Err(LoaderError::DuplicateExtension(name.to_string()));
        }
        Ok(())
    }
}
