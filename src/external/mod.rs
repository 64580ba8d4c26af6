//! External configuration supplied alongside registered rules.
//!
//! A provider returns, for a module id, an ordered list of entries. Each
//! entry acts as an always-matching rule without dependencies, placed in the
//! cascade by priority alone. An entry without a priority sorts below every
//! registered rule.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use crate::error::CascadeError;

/// One externally supplied configuration fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    pub config: Value,
}

impl ExternalEntry {
    pub fn new(config: Value) -> Self {
        Self {
            priority: None,
            config,
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Priority used for ordering; `-inf` when none was given.
    pub fn effective_priority(&self) -> f64 {
        self.priority.unwrap_or(f64::NEG_INFINITY)
    }
}

/// Supplies external configuration entries per module id.
#[async_trait]
pub trait ExternalConfigProvider: Send + Sync {
    async fn fetch(&self, module_id: &str) -> Result<Option<Vec<ExternalEntry>>, CascadeError>;

    /// Answer without suspending. Providers that can only answer
    /// asynchronously keep the default, which refuses.
    fn fetch_ready(&self, module_id: &str) -> Result<Option<Vec<ExternalEntry>>, CascadeError> {
        Err(CascadeError::operation(format!(
            "external configuration for {:?} is only available asynchronously",
            module_id
        )))
    }
}

/// Provider backed by a fixed map of module id to entries.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    entries: HashMap<String, Vec<ExternalEntry>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` to the list for `module_id`.
    pub fn insert(&mut self, module_id: impl Into<String>, entry: ExternalEntry) {
        self.entries.entry(module_id.into()).or_default().push(entry);
    }

    pub fn with_entry(mut self, module_id: impl Into<String>, entry: ExternalEntry) -> Self {
        self.insert(module_id, entry);
        self
    }
}

#[async_trait]
impl ExternalConfigProvider for StaticProvider {
    async fn fetch(&self, module_id: &str) -> Result<Option<Vec<ExternalEntry>>, CascadeError> {
        self.fetch_ready(module_id)
    }

    fn fetch_ready(&self, module_id: &str) -> Result<Option<Vec<ExternalEntry>>, CascadeError> {
        Ok(self.entries.get(module_id).cloned())
    }
}

type FetchFn =
    Box<dyn Fn(String) -> BoxFuture<'static, Result<Option<Vec<ExternalEntry>>, CascadeError>> + Send + Sync>;

/// Provider wrapping an async function of the module id.
pub struct FnProvider {
    fetch: FetchFn,
}

impl FnProvider {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Vec<ExternalEntry>>, CascadeError>> + Send + 'static,
    {
        Self {
            fetch: Box::new(move |id| Box::pin(f(id))),
        }
    }
}

#[async_trait]
impl ExternalConfigProvider for FnProvider {
    async fn fetch(&self, module_id: &str) -> Result<Option<Vec<ExternalEntry>>, CascadeError> {
        (self.fetch)(module_id.to_string()).await
    }
}

impl fmt::Debug for FnProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnProvider(..)")
    }
}
