//! Named module constructors exposed to a host runtime.
//!
//! The registry is an ordinary value owned by the host. There is no global
//! instance; a host that embeds several runtimes keeps one registry per
//! runtime.

use std::{collections::BTreeMap, fmt};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("module already registered: {0}")]
    Duplicate(String),
    #[error("no module registered under {0}")]
    Unknown(String),
}

type Constructor<M> = Box<dyn Fn() -> M>;

/// Maps module names to constructors. Names are listed in sorted order.
pub struct ModuleRegistry<M> {
    modules: BTreeMap<String, Constructor<M>>,
}

impl<M> Default for ModuleRegistry<M> {
    fn default() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
    }
}

impl<M> fmt::Debug for ModuleRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.modules.keys()).finish()
    }
}

impl<M> ModuleRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` under `name`. A name can be registered once.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> Result<(), RegistryError>
    where
        F: Fn() -> M + 'static,
    {
        let name = name.into();
        if self.modules.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        debug!(module = %name, "module registered");
        self.modules.insert(name, Box::new(constructor));
        Ok(())
    }

    /// Creates a fresh instance of the named module.
    pub fn instantiate(&self, name: &str) -> Result<M, RegistryError> {
        self.modules
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
