//! Resolution engine
//!
//! Resolves the effective configuration of a module (or of an annotation on
//! a module):
//! 1. Canonicalize the module id through the module metadata (alias lookup)
//! 2. Expand it into its inheritance chain when `inherit` is requested
//! 3. Collect matching rules per chain id, most general id first
//! 4. Interleave external configuration entries by priority
//! 5. Resolve each rule's dependencies and evaluate its fragment
//! 6. Merge the fragments in order; no fragments at all resolves to `None`

mod explain;

pub use explain::{Contribution, ContributionSource, Explanation, ExplainOutput};

use cascade_criteria::{matches, MatchRequest, SelectionContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::merge_fragments;
use crate::deps::{DependencyResolver, ValueResolver};
use crate::error::CascadeError;
use crate::external::{ExternalConfigProvider, ExternalEntry};
use crate::modules::{inheritance_chain, ModuleMetadata, ModuleRegistry};
use crate::rules::{Rule, RuleSet, RuleStore};

/// Which side wins when an external entry and a registered rule share a priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The registered rule is merged after the external entry.
    #[default]
    InternalWins,
    /// The external entry is merged after the registered rule.
    ExternalWins,
}

/// Engine behavior switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineOptions {
    #[serde(default)]
    pub external_ties: TieBreak,
}

/// Per-call resolution flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectArgs {
    /// Also apply rules attached to the module's ancestor types.
    pub inherit: bool,
}

impl SelectArgs {
    pub fn inherit() -> Self {
        Self { inherit: true }
    }
}

/// One entry of the merge sequence, before evaluation.
#[derive(Debug, Clone)]
enum Step {
    Rule { module_id: String, rule: Arc<Rule> },
    External { module_id: String, index: usize, entry: ExternalEntry },
}

impl Step {
    fn priority(&self) -> f64 {
        match self {
            Step::Rule { rule, .. } => rule.key.priority,
            Step::External { entry, .. } => entry.effective_priority(),
        }
    }
}

/// Canonical request plus the internal rules it matched.
#[derive(Debug)]
struct Plan {
    module_id: String,
    annotation_id: Option<String>,
    chain: Vec<String>,
    steps: Vec<Step>,
}

/// The configuration cascade engine.
///
/// Owns its rule store; collaborators are shared handles. Register rules
/// with [`Engine::add`] before resolving; resolution only reads the store,
/// so concurrent `select_async` calls on a shared engine are safe.
pub struct Engine {
    context: SelectionContext,
    options: EngineOptions,
    store: RuleStore,
    modules: Arc<dyn ModuleMetadata>,
    resolver: Arc<dyn DependencyResolver>,
    external: Option<Arc<dyn ExternalConfigProvider>>,
}

impl Engine {
    /// Engine for `context` with empty module metadata and no dependency values.
    pub fn new(context: SelectionContext) -> Self {
        Self {
            context,
            options: EngineOptions::default(),
            store: RuleStore::new(),
            modules: Arc::new(ModuleRegistry::new()),
            resolver: Arc::new(ValueResolver::new()),
            external: None,
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_modules(mut self, modules: Arc<dyn ModuleMetadata>) -> Self {
        self.modules = modules;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_external(mut self, provider: Arc<dyn ExternalConfigProvider>) -> Self {
        self.external = Some(provider);
        self
    }

    pub fn context(&self) -> &SelectionContext {
        &self.context
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// Register a rule set.
    ///
    /// Every rule is validated and normalized before any is stored, so a
    /// failing set leaves the store untouched.
    pub fn add(&mut self, rule_set: RuleSet) -> Result<(), CascadeError> {
        let context_id = rule_set.context_id.as_deref();
        let rules = rule_set
            .rules
            .into_iter()
            .map(|spec| Rule::normalize(spec, context_id, |id| self.canonical_id(id)))
            .collect::<Result<Vec<_>, _>>()?;

        for rule in rules {
            let rule = self.store.insert(rule);
            debug!(
                modules = ?rule.criteria.module,
                context = ?rule.context_id,
                priority = rule.key.priority,
                specificity = rule.key.specificity,
                ordinal = rule.key.ordinal,
                "registered rule"
            );
        }
        Ok(())
    }

    /// Resolve the effective configuration, loading dependencies and querying
    /// the external provider as needed.
    ///
    /// Returns `None` when no rule or external entry contributed anything.
    pub async fn select_async(
        &self,
        module_id: &str,
        annotation_id: Option<&str>,
        args: SelectArgs,
    ) -> Result<Option<Value>, CascadeError> {
        let explanation = self.explain_async(module_id, annotation_id, args).await?;
        merge_fragments(explanation.fragments())
    }

    /// Like [`Engine::select_async`], without suspending: every dependency and
    /// the external provider's answer must already be available.
    pub fn select(
        &self,
        module_id: &str,
        annotation_id: Option<&str>,
        args: SelectArgs,
    ) -> Result<Option<Value>, CascadeError> {
        let explanation = self.explain(module_id, annotation_id, args)?;
        merge_fragments(explanation.fragments())
    }

    /// The ordered contributions `select_async` merges.
    pub async fn explain_async(
        &self,
        module_id: &str,
        annotation_id: Option<&str>,
        args: SelectArgs,
    ) -> Result<Explanation, CascadeError> {
        let plan = self.plan(module_id, annotation_id, args)?;
        let external = match (&self.external, &plan.annotation_id) {
            (Some(provider), None) => provider.fetch(&plan.module_id).await?,
            _ => None,
        };
        let (header, steps) = self.interleave(plan, external.unwrap_or_default())?;

        let mut contributions = Vec::with_capacity(steps.len());
        for step in steps {
            let values = match &step {
                Step::Rule { rule, .. } if !rule.deps.is_empty() => {
                    trace!(deps = ?rule.deps, "resolving dependencies");
                    self.resolver
                        .resolve(rule.context_id.as_deref(), &rule.deps)
                        .await?
                }
                _ => Vec::new(),
            };
            contributions.push(evaluate(step, &values));
        }
        Ok(header.with_contributions(contributions))
    }

    /// Non-suspending form of [`Engine::explain_async`].
    pub fn explain(
        &self,
        module_id: &str,
        annotation_id: Option<&str>,
        args: SelectArgs,
    ) -> Result<Explanation, CascadeError> {
        let plan = self.plan(module_id, annotation_id, args)?;
        let external = match (&self.external, &plan.annotation_id) {
            (Some(provider), None) => provider.fetch_ready(&plan.module_id)?,
            _ => None,
        };
        let (header, steps) = self.interleave(plan, external.unwrap_or_default())?;

        let contributions = steps
            .into_iter()
            .map(|step| {
                let values = match &step {
                    Step::Rule { rule, .. } if !rule.deps.is_empty() => self
                        .resolver
                        .resolve_ready(rule.context_id.as_deref(), &rule.deps)?,
                    _ => Vec::new(),
                };
                Ok(evaluate(step, &values))
            })
            .collect::<Result<Vec<_>, CascadeError>>()?;
        Ok(header.with_contributions(contributions))
    }

    /// Canonical id for `id`: alias lookup, falling back to the literal id.
    fn canonical_id(&self, id: &str) -> Result<String, CascadeError> {
        match self.modules.get_id(id) {
            Some(canonical) if canonical.is_empty() => Err(CascadeError::invalid(format!(
                "{:?} resolves to an empty module id",
                id
            ))),
            Some(canonical) => Ok(canonical),
            None => Ok(id.to_string()),
        }
    }

    /// Canonicalize the request, expand the chain and collect matching rules.
    fn plan(
        &self,
        module_id: &str,
        annotation_id: Option<&str>,
        args: SelectArgs,
    ) -> Result<Plan, CascadeError> {
        if module_id.is_empty() {
            return Err(CascadeError::required("module id"));
        }
        let canonical = self.canonical_id(module_id)?;
        let annotation_id = match annotation_id {
            Some(id) if !id.is_empty() => Some(self.canonical_id(id)?),
            _ => None,
        };

        let chain = if args.inherit {
            inheritance_chain(self.modules.as_ref(), &canonical)?
        } else {
            vec![canonical.clone()]
        };

        let request = match annotation_id.as_deref() {
            Some(annotation) => MatchRequest::annotation(&self.context, annotation),
            None => MatchRequest::module(&self.context),
        };

        let mut steps = Vec::new();
        for id in &chain {
            let candidates = self.store.rules_for(id);
            let before = steps.len();
            steps.extend(
                candidates
                    .iter()
                    .filter(|rule| matches(&rule.criteria, &request))
                    .map(|rule| Step::Rule {
                        module_id: id.clone(),
                        rule: Arc::clone(rule),
                    }),
            );
            trace!(
                module = %id,
                candidates = candidates.len(),
                matched = steps.len() - before,
                "matched rules"
            );
        }

        debug!(
            module = %canonical,
            annotation = ?annotation_id,
            inherit = args.inherit,
            chain_len = chain.len(),
            matched = steps.len(),
            "planned resolution"
        );

        Ok(Plan {
            module_id: canonical,
            annotation_id,
            chain,
            steps,
        })
    }

    /// Place external entries among the matched rules.
    ///
    /// An entry goes right after the last rule with a lower priority (or not
    /// higher, when external entries win ties), and before everything if
    /// there is none. Entries landing in the same slot keep ascending
    /// priority, then provider order.
    fn interleave(
        &self,
        plan: Plan,
        external: Vec<ExternalEntry>,
    ) -> Result<(Explanation, Vec<Step>), CascadeError> {
        let Plan {
            module_id,
            annotation_id,
            chain,
            steps: internal,
        } = plan;

        let mut placed: Vec<(usize, Step)> = Vec::with_capacity(external.len());
        for (index, entry) in external.into_iter().enumerate() {
            let priority = entry.effective_priority();
            if priority.is_nan() {
                return Err(CascadeError::invalid(format!(
                    "external entry {} for {:?} has a non-numeric priority",
                    index, module_id
                )));
            }
            let slot = internal
                .iter()
                .rposition(|step| match self.options.external_ties {
                    TieBreak::InternalWins => step.priority() < priority,
                    TieBreak::ExternalWins => step.priority() <= priority,
                })
                .map(|pos| pos + 1)
                .unwrap_or(0);
            trace!(index, priority, slot, "placed external entry");
            placed.push((
                slot,
                Step::External {
                    module_id: module_id.clone(),
                    index,
                    entry,
                },
            ));
        }
        placed.sort_by(|(slot_a, a), (slot_b, b)| {
            slot_a
                .cmp(slot_b)
                .then(a.priority().total_cmp(&b.priority()))
        });

        let mut steps = Vec::with_capacity(internal.len() + placed.len());
        let mut pending = placed.into_iter().peekable();
        for (position, step) in internal.into_iter().enumerate() {
            while let Some((_, external)) = pending.next_if(|(slot, _)| *slot == position) {
                steps.push(external);
            }
            steps.push(step);
        }
        steps.extend(pending.map(|(_, step)| step));

        let header = Explanation {
            module_id,
            annotation_id,
            chain,
            contributions: Vec::new(),
        };
        Ok((header, steps))
    }
}

/// Evaluate one step into its contribution.
fn evaluate(step: Step, deps: &[Value]) -> Contribution {
    match step {
        Step::Rule { module_id, rule } => Contribution {
            fragment: rule.apply.evaluate(deps),
            source: ContributionSource::Rule {
                module_id,
                context_id: rule.context_id.clone(),
                priority: rule.key.priority,
                specificity: rule.key.specificity,
                ordinal: rule.key.ordinal,
                deps: rule.deps.clone(),
            },
        },
        Step::External {
            module_id,
            index,
            entry,
        } => Contribution {
            source: ContributionSource::External {
                module_id,
                index,
                priority: entry.effective_priority(),
            },
            fragment: match entry.config {
                Value::Null => Value::Object(Map::new()),
                config => config,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::external::StaticProvider;
    use crate::rules::{Apply, RuleSpec};
    use cascade_criteria::Selector;
    use serde_json::json;

    fn rule(module: &str, priority: f64, fragment: Value) -> RuleSpec {
        RuleSpec::new(Selector::module(module), fragment).with_priority(priority)
    }

    fn engine_with(rules: Vec<RuleSpec>) -> Engine {
        let mut engine = Engine::new(SelectionContext::default());
        engine
            .add(RuleSet {
                context_id: None,
                rules,
            })
            .unwrap();
        engine
    }

    #[test]
    fn test_empty_module_id() {
        let engine = engine_with(vec![]);
        let err = engine.select("", None, SelectArgs::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentRequired);
    }

    #[test]
    fn test_no_rules_is_none() {
        let engine = engine_with(vec![rule("other", 0.0, json!({"a": 1}))]);
        assert_eq!(engine.select("m", None, SelectArgs::default()).unwrap(), None);
    }

    #[test]
    fn test_failed_set_stores_nothing() {
        let mut engine = Engine::new(SelectionContext::default());
        let bad = RuleSpec::new(
            Selector {
                module: vec![Some("m".to_string()), None],
                ..Default::default()
            },
            json!({}),
        );
        let err = engine
            .add(RuleSet {
                context_id: None,
                rules: vec![rule("m", 0.0, json!({"a": 1})), bad],
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentRequired);
        assert!(engine.store().is_empty());
        assert!(engine.store().rules_for("m").is_empty());
    }

    #[test]
    fn test_alias_canonicalization() {
        let mut modules = ModuleRegistry::new();
        modules.register_type("app/Widget", None).unwrap();
        modules.alias("Widget", "app/Widget").unwrap();
        let mut engine =
            Engine::new(SelectionContext::default()).with_modules(Arc::new(modules));
        engine
            .add(RuleSet::default().with_rule(rule("Widget", 0.0, json!({"a": 1}))))
            .unwrap();

        assert_eq!(engine.store().module_ids(), vec!["app/Widget"]);
        let result = engine.select("Widget", None, SelectArgs::default()).unwrap();
        assert_eq!(result, Some(json!({"a": 1})));
    }

    #[test]
    fn test_empty_alias_target_is_invalid() {
        struct EmptyAlias;
        impl ModuleMetadata for EmptyAlias {
            fn get_id(&self, _: &str) -> Option<String> {
                Some(String::new())
            }
            fn get(&self, _: &str) -> Option<crate::modules::ModuleDescriptor> {
                None
            }
        }
        let engine = Engine::new(SelectionContext::default()).with_modules(Arc::new(EmptyAlias));
        let err = engine.select("m", None, SelectArgs::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentInvalid);
    }

    #[test]
    fn test_external_slotting() {
        let provider = StaticProvider::new()
            .with_entry("m", ExternalEntry::new(json!({"v": "ext-default"})))
            .with_entry("m", ExternalEntry::new(json!({"v": "ext-5"})).with_priority(5.0))
            .with_entry("m", ExternalEntry::new(json!({"v": "ext-0"})).with_priority(0.0));
        let mut engine =
            Engine::new(SelectionContext::default()).with_external(Arc::new(provider));
        engine
            .add(
                RuleSet::default()
                    .with_rule(rule("m", 0.0, json!({"v": "int-0"})))
                    .with_rule(rule("m", 10.0, json!({"v": "int-10"}))),
            )
            .unwrap();

        let explanation = engine.explain("m", None, SelectArgs::default()).unwrap();
        let order: Vec<&str> = explanation
            .contributions
            .iter()
            .map(|c| c.fragment["v"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["ext-default", "ext-0", "int-0", "ext-5", "int-10"]);
    }

    #[test]
    fn test_external_wins_ties_when_configured() {
        let provider = StaticProvider::new()
            .with_entry("m", ExternalEntry::new(json!({"v": "ext"})).with_priority(0.0));
        let mut engine = Engine::new(SelectionContext::default())
            .with_external(Arc::new(provider))
            .with_options(EngineOptions {
                external_ties: TieBreak::ExternalWins,
            });
        engine
            .add(RuleSet::default().with_rule(rule("m", 0.0, json!({"v": "int"}))))
            .unwrap();

        let result = engine.select("m", None, SelectArgs::default()).unwrap();
        assert_eq!(result, Some(json!({"v": "ext"})));
    }

    #[test]
    fn test_annotation_requests_skip_external() {
        let provider = StaticProvider::new().with_entry("m", ExternalEntry::new(json!({"v": 1})));
        let engine = Engine::new(SelectionContext::default()).with_external(Arc::new(provider));
        assert_eq!(engine.select("m", Some("a/Label"), SelectArgs::default()).unwrap(), None);
        assert!(engine.select("m", None, SelectArgs::default()).unwrap().is_some());
    }

    #[test]
    fn test_external_nan_priority() {
        let provider = StaticProvider::new()
            .with_entry("m", ExternalEntry::new(json!({})).with_priority(f64::NAN));
        let engine = Engine::new(SelectionContext::default()).with_external(Arc::new(provider));
        let err = engine.select("m", None, SelectArgs::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentInvalid);
    }

    #[test]
    fn test_function_apply_without_deps() {
        let engine = engine_with(vec![RuleSpec::new(
            Selector::module("m"),
            Apply::function(|deps| Some(json!({ "count": deps.len() }))),
        )]);
        let result = engine.select("m", None, SelectArgs::default()).unwrap();
        assert_eq!(result, Some(json!({"count": 0})));
    }

    #[test]
    fn test_sync_select_requires_loaded_deps() {
        let mut resolver = ValueResolver::new();
        resolver.define_lazy("dep/lazy", || async { Ok(json!("v")) });
        let mut engine =
            Engine::new(SelectionContext::default()).with_resolver(Arc::new(resolver));
        engine
            .add(RuleSet::default().with_rule(
                RuleSpec::new(
                    Selector::module("m"),
                    Apply::function(|deps| Some(json!({ "dep": deps[0] }))),
                )
                .with_deps(["dep/lazy"]),
            ))
            .unwrap();

        let err = engine.select("m", None, SelectArgs::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationInvalid);
    }
}
