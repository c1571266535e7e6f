use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::ModelBackend;

/// Inference backends available to this build, by name.
pub struct BackendRegistry {
    backends: BTreeMap<&'static str, Arc<dyn ModelBackend>>,
    default_name: Option<&'static str>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry holding every backend compiled into this build. Tract is the
    /// default when present.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "backend-tract")]
        registry.register(super::backends::TractBackend::new());
        registry.register(super::backends::StubBackend::single_class(640, 640));
        registry
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: ModelBackend + 'static>(&mut self, backend: B) {
        let name = backend.name();
        if self.default_name.is_none() {
            self.default_name = Some(name);
        }
        self.backends.insert(name, Arc::new(backend));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let (key, _) = self
            .backends
            .get_key_value(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        self.default_name = Some(*key);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn default_backend(&self) -> Option<Arc<dyn ModelBackend>> {
        self.default_name.and_then(|name| self.get(name))
    }

    pub fn list(&self) -> Vec<&'static str> {
        self.backends.keys().copied().collect()
    }

    /// Pick a backend for the engine: prefer the default, otherwise any
    /// backend with a vectorized path when `prefer_vectorized` is set.
    pub fn select(&self, prefer_vectorized: bool) -> Result<Arc<dyn ModelBackend>> {
        let default_backend = self.default_backend();
        if let Some(backend) = &default_backend {
            if !prefer_vectorized || backend.supports_vectorized() {
                return Ok(backend.clone());
            }
        }
        if prefer_vectorized {
            if let Some(backend) = self.backends.values().find(|b| b.supports_vectorized()) {
                return Ok(backend.clone());
            }
        }
        default_backend.ok_or_else(|| anyhow!("no inference backend registered"))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;

    #[test]
    fn first_registered_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::single_class(64, 64));
        assert_eq!(registry.default_backend().map(|b| b.name()), Some("stub"));
        assert!(registry.set_default("missing").is_err());
    }

    #[test]
    fn select_falls_back_to_default_without_vectorized_backend() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::single_class(64, 64));
        assert_eq!(registry.select(true)?.name(), "stub");
        Ok(())
    }

    #[test]
    fn empty_registry_selects_nothing() {
        assert!(BackendRegistry::new().select(false).is_err());
    }
}
