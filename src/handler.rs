//! Handler capabilities and the registry that resolves them by name.
//!
//! The registry is populated before the scheduler is initialized and is
//! immutable afterwards, so the set of handlers a process can run is closed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::Payload;

/// A capability that performs jobs for one handler identifier.
///
/// `C` is the host context handed to [`Scheduler::initialize`](crate::scheduler::Scheduler::initialize).
#[async_trait]
pub trait JobHandler<C>: Send + Sync {
    /// Perform one job. `true` completes it; `false` consumes a retry if
    /// any remain.
    async fn perform_job(&self, ctx: &C, payload: &Payload) -> bool;
}

/// Builds a handler on each resolution. Errors count as construction failures.
pub type HandlerFactory<C> = Box<dyn Fn() -> Result<Arc<dyn JobHandler<C>>> + Send + Sync>;

/// Registry of handlers, indexed by their stable identifier.
pub struct HandlerRegistry<C> {
    factories: HashMap<String, HandlerFactory<C>>,
}

impl<C> Default for HandlerRegistry<C> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<C> HandlerRegistry<C>
where
    C: Send + Sync + 'static,
{
    /// Create an empty registry with no handlers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register one shared handler instance under `name`.
    pub fn register(self, name: impl Into<String>, handler: impl JobHandler<C> + 'static) -> Self {
        let handler: Arc<dyn JobHandler<C>> = Arc::new(handler);
        self.register_factory(name, move || Ok(Arc::clone(&handler)))
    }

    /// Register a factory invoked every time `name` is resolved.
    pub fn register_factory<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn JobHandler<C>>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Resolve a handler by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn JobHandler<C>>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownHandler(name.to_string()))?;

        factory().map_err(|e| match e {
            e @ Error::HandlerConstruction { .. } => e,
            other => Error::HandlerConstruction {
                handler: name.to_string(),
                reason: other.to_string(),
            },
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Always(bool);

    #[async_trait]
    impl JobHandler<()> for Always {
        async fn perform_job(&self, _ctx: &(), _payload: &Payload) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn registered_handler_resolves_and_runs() {
        let registry: HandlerRegistry<()> = HandlerRegistry::empty().register("ok", Always(true));
        let handler = registry.resolve("ok").unwrap();
        assert!(handler.perform_job(&(), &json!(null)).await);
        assert!(registry.contains("ok"));
    }

    #[test]
    fn unknown_name_fails_to_resolve() {
        let registry: HandlerRegistry<()> = HandlerRegistry::empty();
        let err = registry.resolve("nope").err().unwrap();
        assert!(matches!(err, Error::UnknownHandler(name) if name == "nope"));
    }

    #[test]
    fn factory_errors_become_construction_failures() {
        let registry: HandlerRegistry<()> = HandlerRegistry::empty()
            .register_factory("broken", || Err(Error::Config("missing smtp host".into())));
        let err = registry.resolve("broken").err().unwrap();
        match err {
            Error::HandlerConstruction { handler, reason } => {
                assert_eq!(handler, "broken");
                assert!(reason.contains("missing smtp host"));
            }
            other => panic!("expected HandlerConstruction, got {other:?}"),
        }
    }

    #[test]
    fn names_are_sorted() {
        let registry: HandlerRegistry<()> = HandlerRegistry::empty()
            .register("zeta", Always(true))
            .register("alpha", Always(false));
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }
}
