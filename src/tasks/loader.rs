//! # Module resolution.
//!
//! Spawning by name goes through a [`ModuleLoader`]. Resolving real code (from
//! disk, a registry, a plugin host) is up to the embedding application;
//! [`ModuleTable`] is the in-memory loader used when nothing else is configured.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::LoadError;
use crate::tasks::ModuleRef;

/// Resolves module names to code.
#[async_trait]
pub trait ModuleLoader<M>: Send + Sync + 'static {
    /// Loads the module registered as `name`.
    async fn load(&self, name: &str) -> Result<ModuleRef<M>, LoadError>;
}

/// In-memory table of modules keyed by [`Module::name`](crate::Module::name).
pub struct ModuleTable<M> {
    modules: HashMap<String, ModuleRef<M>>,
}

impl<M: 'static> ModuleTable<M> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Registers `module`, replacing any module with the same name.
    pub fn register(&mut self, module: ModuleRef<M>) -> &mut Self {
        self.modules.insert(module.name().to_string(), module);
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, module: ModuleRef<M>) -> Self {
        self.register(module);
        self
    }

    /// Returns sorted list of registered names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

impl<M: 'static> Default for ModuleTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M: 'static> ModuleLoader<M> for ModuleTable<M> {
    async fn load(&self, name: &str) -> Result<ModuleRef<M>, LoadError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                module: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Ports;
    use crate::error::TaskError;
    use crate::tasks::{ModuleFn, TaskContext};

    #[tokio::test]
    async fn resolves_registered_names_only() {
        let table = ModuleTable::<u8>::new()
            .with(ModuleFn::arc("idle", |_ctx: TaskContext<u8>, _ports: Ports<u8>| async {
                Ok::<_, TaskError>(())
            }));

        assert_eq!(table.names(), vec!["idle".to_string()]);
        assert_eq!(table.load("idle").await.unwrap().name(), "idle");
        assert!(matches!(
            table.load("missing").await,
            Err(LoadError::NotFound { module }) if module == "missing"
        ));
    }
}
