//! ProcessorRegistry - processor の登録と検索
//!
//! processor は `Task` ごとに登録し、名前で引きます。
//! inline runner はジョブ名で、sandbox の child は `Init` で受け取った
//! path で同じ registry を引きます。

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynProcessor, Handler, TypedProcessor};
use super::task::Task;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("processor `{0}` is already registered")]
    AlreadyRegistered(String),
}

#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn DynProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(&mut self, handler: H) -> Result<(), RegistryError> {
        let name = T::NAME.to_string();
        if self.processors.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.processors
            .insert(name, Arc::new(TypedProcessor::<T, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynProcessor>> {
        self.processors.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::handler::fixtures::{Explode, ExplodeHandler, Sum, SumHandler};

    #[test]
    fn register_and_get() {
        let mut registry = ProcessorRegistry::new();
        registry.register::<Sum, _>(SumHandler).unwrap();

        let processor = registry.get(Sum::NAME).unwrap();
        assert_eq!(processor.name(), Sum::NAME);
        assert!(registry.get("math.product").is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ProcessorRegistry::new();
        registry.register::<Sum, _>(SumHandler).unwrap();

        let result = registry.register::<Sum, _>(SumHandler);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(name)) if name == Sum::NAME));
    }

    #[test]
    fn names_are_listed_sorted() {
        let mut registry = ProcessorRegistry::new();
        registry.register::<Explode, _>(ExplodeHandler).unwrap();
        registry.register::<Sum, _>(SumHandler).unwrap();

        assert_eq!(registry.registered_names(), vec!["math.sum", "test.explode"]);
    }
}
