//! Cascade Config - rule-based configuration resolution
//!
//! Rules select modules (optionally narrowed by application, user, theme,
//! locale or annotation) and contribute configuration fragments. Resolving a
//! module collects the matching rules, optionally along the module's type
//! ancestry, orders them by priority, specificity and registration order,
//! blends in externally supplied entries, resolves rule dependencies, and
//! merges the fragments with per-key `$op` operators.

pub mod config;
pub mod deps;
pub mod engine;
pub mod error;
pub mod external;
pub mod modules;
pub mod rules;

pub use cascade_criteria::{Accepted, SelectionContext, Selector};
pub use config::{merge_fragments, CascadeFile, LoadError, MergeOp};
pub use deps::{DependencyResolver, ValueResolver};
pub use engine::{Engine, EngineOptions, ExplainOutput, Explanation, SelectArgs, TieBreak};
pub use error::{CascadeError, ErrorKind};
pub use external::{ExternalConfigProvider, ExternalEntry, FnProvider, StaticProvider};
pub use modules::{ModuleDescriptor, ModuleKind, ModuleMetadata, ModuleRegistry};
pub use rules::{Apply, Rule, RuleSet, RuleSpec, RuleStore};
