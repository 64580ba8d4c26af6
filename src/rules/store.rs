//! Rule store: per-module rule lists in ascending precedence order.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use super::Rule;

/// Rules indexed by the canonical module ids they select.
///
/// Append-only: rules are never removed. Each per-module list is kept in
/// ascending [`PrecedenceKey`](super::PrecedenceKey) order, so the rule that
/// should be merged last sits at the highest index.
#[derive(Debug, Default)]
pub struct RuleStore {
    by_module: HashMap<String, Vec<Arc<Rule>>>,
    next_ordinal: u64,
    len: usize,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `rule` under every module id it selects.
    ///
    /// The rule receives the next insertion ordinal, so among rules with
    /// equal priority and specificity the later one sorts last.
    pub fn insert(&mut self, mut rule: Rule) -> Arc<Rule> {
        rule.key.ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.len += 1;

        let rule = Arc::new(rule);
        for module_id in &rule.criteria.module {
            let list = self.by_module.entry(module_id.clone()).or_default();
            let position = list.partition_point(|existing| existing.key <= rule.key);
            trace!(
                module = %module_id,
                position,
                priority = rule.key.priority,
                specificity = rule.key.specificity,
                ordinal = rule.key.ordinal,
                "indexed rule"
            );
            list.insert(position, Arc::clone(&rule));
        }
        rule
    }

    /// Rules selecting `module_id`, ascending precedence. Empty if none.
    pub fn rules_for(&self, module_id: &str) -> &[Arc<Rule>] {
        self.by_module
            .get(module_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of registered rules (a rule selecting several modules counts once).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Module ids with at least one rule, sorted.
    pub fn module_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_module.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
