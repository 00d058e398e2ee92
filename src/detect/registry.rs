use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::{SkinToneBackend, StubBackend};

type BackendFactory = Arc<dyn Fn() -> Box<dyn DetectorBackend> + Send + Sync>;

/// Registry of detector backend factories, keyed by backend name.
///
/// Each connection gets a fresh backend from `create`, so backend state never
/// leaks between sessions.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with the built-in backends; `skin` is the default.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("skin", || Box::new(SkinToneBackend::default()));
        registry.register("stub", || Box::new(StubBackend::new()));
        registry
    }

    /// Register a factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn DetectorBackend> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a new backend instance. An empty name selects the default.
    pub fn create(&self, name: &str) -> Result<Box<dyn DetectorBackend>> {
        let name = if name.is_empty() {
            self.default_name
                .as_deref()
                .ok_or_else(|| anyhow!("no detector backends registered"))?
        } else {
            name
        };
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        Ok(factory())
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
