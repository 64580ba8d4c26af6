//! Dependency resolution for rules with `deps`.
//!
//! Resolution has two forms. [`DependencyResolver::resolve`] may suspend
//! (for example to load a value on first use); [`DependencyResolver::resolve_ready`]
//! never suspends and fails if anything still needs loading.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::CascadeError;
use crate::rules::resolve_reference;

/// Resolves dependency references to loaded values, in order.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Resolve `refs` (absolute, or relative to `context_id`), loading as needed.
    async fn resolve(&self, context_id: Option<&str>, refs: &[String]) -> Result<Vec<Value>, CascadeError>;

    /// Resolve `refs` from what is already loaded.
    fn resolve_ready(&self, context_id: Option<&str>, refs: &[String]) -> Result<Vec<Value>, CascadeError>;
}

type Loader = Box<dyn Fn() -> BoxFuture<'static, Result<Value, CascadeError>> + Send + Sync>;

enum Slot {
    Ready(Value),
    Lazy { loader: Loader, cell: OnceCell<Value> },
}

/// Dependency values held in memory, defined eagerly or loaded on first use.
///
/// A lazily defined value is loaded at most once; later resolutions, sync or
/// async, see the cached value.
#[derive(Default)]
pub struct ValueResolver {
    slots: HashMap<String, Slot>,
}

impl ValueResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define an already-loaded value.
    pub fn define(&mut self, id: impl Into<String>, value: Value) {
        self.slots.insert(id.into(), Slot::Ready(value));
    }

    /// Define a value produced by `loader` when first resolved.
    pub fn define_lazy<F, Fut>(&mut self, id: impl Into<String>, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CascadeError>> + Send + 'static,
    {
        let loader: Loader = Box::new(move || Box::pin(loader()));
        self.slots.insert(
            id.into(),
            Slot::Lazy {
                loader,
                cell: OnceCell::new(),
            },
        );
    }

    /// Whether `id` can be resolved without suspending.
    pub fn is_loaded(&self, id: &str) -> bool {
        match self.slots.get(id) {
            Some(Slot::Ready(_)) => true,
            Some(Slot::Lazy { cell, .. }) => cell.initialized(),
            None => false,
        }
    }

    fn slot(&self, context_id: Option<&str>, reference: &str) -> Result<(String, &Slot), CascadeError> {
        let id = resolve_reference(reference, context_id)?;
        match self.slots.get(&id) {
            Some(slot) => Ok((id, slot)),
            None => Err(CascadeError::invalid(format!("dependency {:?} is not defined", id))),
        }
    }
}

#[async_trait]
impl DependencyResolver for ValueResolver {
    async fn resolve(&self, context_id: Option<&str>, refs: &[String]) -> Result<Vec<Value>, CascadeError> {
        let mut values = Vec::with_capacity(refs.len());
        for reference in refs {
            let (id, slot) = self.slot(context_id, reference)?;
            let value = match slot {
                Slot::Ready(value) => value.clone(),
                Slot::Lazy { loader, cell } => {
                    if !cell.initialized() {
                        debug!(dependency = %id, "loading dependency");
                    }
                    cell.get_or_try_init(|| loader()).await?.clone()
                }
            };
            values.push(value);
        }
        Ok(values)
    }

    fn resolve_ready(&self, context_id: Option<&str>, refs: &[String]) -> Result<Vec<Value>, CascadeError> {
        refs.iter()
            .map(|reference| {
                let (id, slot) = self.slot(context_id, reference)?;
                match slot {
                    Slot::Ready(value) => Ok(value.clone()),
                    Slot::Lazy { cell, .. } => cell.get().cloned().ok_or_else(|| {
                        CascadeError::operation(format!("dependency {:?} has not been loaded", id))
                    }),
                }
            })
            .collect()
    }
}

impl fmt::Debug for ValueResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.slots.keys().collect();
        ids.sort();
        f.debug_struct("ValueResolver").field("ids", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn refs(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_resolve_in_order() {
        let mut r = ValueResolver::new();
        r.define("a/one", json!(1));
        r.define("a/two", json!(2));
        let values = r.resolve(None, &refs(&["a/two", "a/one"])).await.unwrap();
        assert_eq!(values, vec![json!(2), json!(1)]);
    }

    #[tokio::test]
    async fn test_relative_reference() {
        let mut r = ValueResolver::new();
        r.define("app/theme/colors", json!({"primary": "red"}));
        let values = r
            .resolve(Some("app/theme/rules"), &refs(&["./colors"]))
            .await
            .unwrap();
        assert_eq!(values[0]["primary"], "red");

        let err = r.resolve(None, &refs(&["./colors"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationInvalid);
    }

    #[tokio::test]
    async fn test_unknown_reference() {
        let r = ValueResolver::new();
        let err = r.resolve(None, &refs(&["missing"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentInvalid);
    }

    #[tokio::test]
    async fn test_lazy_loaded_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut r = ValueResolver::new();
        r.define_lazy("lazy/value", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("loaded"))
            }
        });

        assert!(!r.is_loaded("lazy/value"));
        let err = r.resolve_ready(None, &refs(&["lazy/value"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationInvalid);

        r.resolve(None, &refs(&["lazy/value"])).await.unwrap();
        r.resolve(None, &refs(&["lazy/value"])).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(r.is_loaded("lazy/value"));
        let values = r.resolve_ready(None, &refs(&["lazy/value"])).unwrap();
        assert_eq!(values, vec![json!("loaded")]);
    }

    #[tokio::test]
    async fn test_lazy_failure_propagates() {
        let mut r = ValueResolver::new();
        r.define_lazy("broken", || async { Err(CascadeError::operation("loader failed")) });
        let err = r.resolve(None, &refs(&["broken"])).await.unwrap_err();
        assert!(err.to_string().contains("loader failed"));
        assert!(!r.is_loaded("broken"));
    }
}
