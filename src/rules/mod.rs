//! Rules, rule sets and the rule store.
//!
//! A rule pairs selection criteria with a configuration fragment, or with a
//! function producing one from resolved dependencies. Rules are registered in
//! rule sets, which carry the context id that relative references resolve
//! against.

mod ids;
mod store;

pub use ids::{is_relative, resolve_reference};
pub use store::RuleStore;

use cascade_criteria::{Criteria, Selector};
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::CascadeError;

/// Function form of a rule's `apply`, called with dependency values in `deps` order.
pub type ApplyFn = Arc<dyn Fn(&[Value]) -> Option<Value> + Send + Sync>;

/// What a rule contributes when it matches.
#[derive(Clone)]
pub enum Apply {
    /// A fixed fragment.
    Fragment(Value),
    /// A function of the rule's resolved dependencies.
    Function(ApplyFn),
}

impl Apply {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Option<Value> + Send + Sync + 'static,
    {
        Apply::Function(Arc::new(f))
    }

    /// Produce this rule's fragment. A function returning nothing (or `null`)
    /// contributes an empty object.
    pub fn evaluate(&self, deps: &[Value]) -> Value {
        match self {
            Apply::Fragment(fragment) => fragment.clone(),
            Apply::Function(f) => match f(deps) {
                None | Some(Value::Null) => Value::Object(Map::new()),
                Some(fragment) => fragment,
            },
        }
    }
}

impl From<Value> for Apply {
    fn from(fragment: Value) -> Self {
        Apply::Fragment(fragment)
    }
}

impl fmt::Debug for Apply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Apply::Fragment(fragment) => f.debug_tuple("Fragment").field(fragment).finish(),
            Apply::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// A rule as supplied by the caller, before normalization.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    /// Higher priorities are merged later and so win (default 0).
    pub priority: f64,
    pub select: Selector,
    /// Dependency references, absolute or relative to the rule set's context id.
    pub deps: Vec<String>,
    pub apply: Apply,
}

impl RuleSpec {
    pub fn new(select: Selector, apply: impl Into<Apply>) -> Self {
        Self {
            priority: 0.0,
            select,
            deps: Vec::new(),
            apply: apply.into(),
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// A unit of registration.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    /// Base for relative module and dependency references.
    pub context_id: Option<String>,
    pub rules: Vec<RuleSpec>,
}

impl RuleSet {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: Some(context_id.into()),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: RuleSpec) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Position of a rule in the cascade: `(priority, specificity, ordinal)`,
/// compared lexicographically ascending. The greatest key is merged last.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PrecedenceKey {
    pub priority: f64,
    pub specificity: u8,
    pub ordinal: u64,
}

impl PartialEq for PrecedenceKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PrecedenceKey {}

impl PartialOrd for PrecedenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrecedenceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then(self.specificity.cmp(&other.specificity))
            .then(self.ordinal.cmp(&other.ordinal))
    }
}

/// A validated, normalized rule.
#[derive(Debug)]
pub struct Rule {
    pub criteria: Criteria,
    /// Absolute dependency references.
    pub deps: Vec<String>,
    pub apply: Apply,
    /// Context id of the owning rule set.
    pub context_id: Option<String>,
    /// Assigned its ordinal by [`RuleStore::insert`].
    pub key: PrecedenceKey,
}

impl Rule {
    /// Validate `spec` and resolve its references.
    ///
    /// Module, annotation and dependency ids are resolved against
    /// `context_id` and then passed through `canonicalize` (alias lookup).
    pub fn normalize<F>(
        spec: RuleSpec,
        context_id: Option<&str>,
        mut canonicalize: F,
    ) -> Result<Rule, CascadeError>
    where
        F: FnMut(&str) -> Result<String, CascadeError>,
    {
        if spec.priority.is_nan() {
            return Err(CascadeError::invalid("rule priority must be a number"));
        }

        let criteria = spec
            .select
            .into_criteria(|id| canonicalize(&resolve_reference(id, context_id)?))?;

        let deps = spec
            .deps
            .iter()
            .map(|dep| canonicalize(&resolve_reference(dep, context_id)?))
            .collect::<Result<Vec<_>, _>>()?;

        let key = PrecedenceKey {
            priority: spec.priority,
            specificity: criteria.specificity(),
            ordinal: 0,
        };

        Ok(Rule {
            criteria,
            deps,
            apply: spec.apply,
            context_id: context_id.map(str::to_string),
            key,
        })
    }
}
