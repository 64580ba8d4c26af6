//! Cascade files: a whole engine described in TOML
//!
//! ```toml
//! [context]
//! user = "alice"
//! locale = ["en-US", "en"]
//!
//! [options]
//! external_ties = "internal_wins"
//!
//! [[modules]]
//! id = "app/Base"
//!
//! [[modules]]
//! id = "app/Widget"
//! ancestor = "app/Base"
//!
//! [aliases]
//! Widget = "app/Widget"
//!
//! [values]
//! "app/palette" = { primary = "red" }
//!
//! [[external]]
//! module = "app/Widget"
//! priority = 1
//! config = { border = 2 }
//!
//! [[rule_sets]]
//! context_id = "app/rules"
//!
//! [[rule_sets.rules]]
//! priority = 10
//! select = { module = "./Widget", theme = "dark" }
//! deps = ["./palette"]
//! apply = { color = "white" }
//! ```

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use cascade_criteria::{SelectionContext, Selector};

use crate::deps::ValueResolver;
use crate::engine::{Engine, EngineOptions};
use crate::error::CascadeError;
use crate::external::{ExternalEntry, StaticProvider};
use crate::modules::{ModuleKind, ModuleRegistry};
use crate::rules::{RuleSet, RuleSpec};

/// A module descriptor in a cascade file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleEntry {
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: ModuleKind,
    /// Ancestor of a type.
    #[serde(default)]
    pub ancestor: Option<String>,
    /// Type of an instance.
    #[serde(default, rename = "type")]
    pub type_id: Option<String>,
}

fn default_kind() -> ModuleKind {
    ModuleKind::Type
}

impl ModuleEntry {
    /// Id this entry must be registered after.
    fn parent(&self) -> Option<&str> {
        match self.kind {
            ModuleKind::Type => self.ancestor.as_deref(),
            ModuleKind::Instance => self.type_id.as_deref(),
        }
    }
}

/// An external configuration entry in a cascade file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalFileEntry {
    pub module: String,
    #[serde(default)]
    pub priority: Option<f64>,
    pub config: toml::Value,
}

/// A rule in a cascade file. `apply` is always a fixed table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    #[serde(default)]
    pub priority: f64,
    pub select: Selector,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default = "empty_table")]
    pub apply: toml::Value,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSetFile {
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleFile>,
}

/// Parsed cascade file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CascadeFile {
    #[serde(default)]
    pub context: SelectionContext,

    #[serde(default)]
    pub options: EngineOptions,

    #[serde(default)]
    pub modules: Vec<ModuleEntry>,

    /// Exact alias -> canonical id.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    /// Id prefix -> replacement prefix.
    #[serde(default)]
    pub namespaces: BTreeMap<String, String>,

    /// Dependency values by id.
    #[serde(default)]
    pub values: BTreeMap<String, toml::Value>,

    #[serde(default)]
    pub external: Vec<ExternalFileEntry>,

    #[serde(default)]
    pub rule_sets: Vec<RuleSetFile>,
}

/// A cascade file with its provenance.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub file: CascadeFile,
    pub path: String,
    /// SHA-256 digest of the raw file bytes
    pub digest: String,
}

impl CascadeFile {
    /// Load and parse a TOML file, returning it with its digest
    pub fn load(path: &Path) -> Result<LoadedFile, LoadError> {
        let bytes = fs::read(path).map_err(|e| LoadError::Io(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| LoadError::Parse(format!("Invalid UTF-8: {}", e)))?;
        let file = Self::parse(&contents)?;

        debug!(path = %path.display(), digest = %digest, "loaded cascade file");
        Ok(LoadedFile {
            file,
            path: path.to_string_lossy().to_string(),
            digest,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, LoadError> {
        toml::from_str(contents).map_err(|e| LoadError::Parse(format!("TOML parse error: {}", e)))
    }

    pub fn rule_count(&self) -> usize {
        self.rule_sets.iter().map(|set| set.rules.len()).sum()
    }

    /// Build the module registry described by `modules`, `aliases` and `namespaces`.
    ///
    /// Modules may be listed in any order; each is registered once its
    /// ancestor (or type) is known.
    pub fn module_registry(&self) -> Result<ModuleRegistry, CascadeError> {
        let mut registry = ModuleRegistry::new();
        let mut pending: Vec<&ModuleEntry> = self.modules.iter().collect();

        while !pending.is_empty() {
            let declared: Vec<&str> = pending.iter().map(|m| m.id.as_str()).collect();
            let ready = pending
                .iter()
                .position(|m| m.parent().map_or(true, |p| !declared.contains(&p)))
                .unwrap_or(0);
            let entry = pending.remove(ready);
            match entry.kind {
                ModuleKind::Type => registry.register_type(&entry.id, entry.ancestor.as_deref())?,
                ModuleKind::Instance => {
                    let type_id = entry.type_id.as_deref().unwrap_or_default();
                    registry.register_instance(&entry.id, type_id)?
                }
            }
        }

        for (alias, target) in &self.aliases {
            registry.alias(alias, target)?;
        }
        for (prefix, target) in &self.namespaces {
            registry.map_namespace(prefix, target)?;
        }
        Ok(registry)
    }

    /// Build an engine from this file. Values in `overrides` replace the
    /// file's context dimension by dimension.
    pub fn into_engine(self, overrides: SelectionContext) -> Result<Engine, CascadeError> {
        let modules = self.module_registry()?;

        let mut resolver = ValueResolver::new();
        for (id, value) in self.values {
            resolver.define(id, toml_to_json(value));
        }

        let mut provider = StaticProvider::new();
        for entry in self.external {
            provider.insert(
                entry.module,
                ExternalEntry {
                    priority: entry.priority,
                    config: toml_to_json(entry.config),
                },
            );
        }

        let context = self.context.overlay(overrides);
        let mut engine = Engine::new(context)
            .with_options(self.options)
            .with_modules(Arc::new(modules))
            .with_resolver(Arc::new(resolver))
            .with_external(Arc::new(provider));

        for set in self.rule_sets {
            let rules = set
                .rules
                .into_iter()
                .map(|rule| {
                    RuleSpec::new(rule.select, toml_to_json(rule.apply))
                        .with_priority(rule.priority)
                        .with_deps(rule.deps)
                })
                .collect();
            engine.add(RuleSet {
                context_id: set.context_id,
                rules,
            })?;
        }
        Ok(engine)
    }
}

/// Convert TOML Value to JSON Value
pub fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            Value::Object(map)
        }
    }
}

/// Cascade file errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Rule(#[from] CascadeError),
}
