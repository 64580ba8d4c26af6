//! Module metadata: canonical ids, aliases and type ancestry.
//!
//! The engine only needs two questions answered: "what is the canonical id
//! for this name?" and "what does this module descend from?". [`ModuleRegistry`]
//! answers both from an in-memory arena; other sources can implement
//! [`ModuleMetadata`] directly.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::CascadeError;

/// Whether a module is a type (may have an ancestor) or an instance of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Type,
    Instance,
}

/// What the metadata service knows about one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDescriptor {
    pub id: String,
    pub kind: ModuleKind,
    /// A type's single ancestor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ancestor: Option<String>,
    /// An instance's type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_id: Option<String>,
}

/// Source of canonical ids and ancestry.
pub trait ModuleMetadata: Send + Sync {
    /// Canonical id for an id or alias, `None` if unknown.
    fn get_id(&self, id_or_alias: &str) -> Option<String>;

    /// Descriptor for a canonical id, `None` if unknown.
    fn get(&self, id: &str) -> Option<ModuleDescriptor>;
}

/// Ids to query for `id` when inheritance is requested, most general first.
///
/// Instances never inherit from their type: their chain is just themselves,
/// as is the chain of a module the metadata does not know.
pub fn inheritance_chain(metadata: &dyn ModuleMetadata, id: &str) -> Result<Vec<String>, CascadeError> {
    let descriptor = match metadata.get(id) {
        Some(d) if d.kind == ModuleKind::Type => d,
        _ => return Ok(vec![id.to_string()]),
    };

    let mut chain = vec![id.to_string()];
    let mut seen: HashSet<String> = chain.iter().cloned().collect();
    let mut next = descriptor.ancestor;

    while let Some(ancestor) = next {
        if !seen.insert(ancestor.clone()) {
            return Err(CascadeError::invalid(format!(
                "ancestry of {:?} is cyclic at {:?}",
                id, ancestor
            )));
        }
        next = metadata.get(&ancestor).and_then(|d| d.ancestor);
        chain.push(ancestor);
    }

    chain.reverse();
    debug!(module = %id, chain = ?chain, "expanded inheritance chain");
    Ok(chain)
}

#[derive(Debug)]
struct Entry {
    id: String,
    kind: ModuleKind,
    /// Arena index of the ancestor (types) or type (instances).
    parent: Option<usize>,
}

/// In-memory module metadata: an arena of descriptors indexed by id.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    aliases: HashMap<String, String>,
    /// Prefix mappings, longest prefix first.
    namespaces: Vec<(String, String)>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type with an optional ancestor type.
    pub fn register_type(&mut self, id: &str, ancestor: Option<&str>) -> Result<(), CascadeError> {
        let parent = match ancestor {
            Some(ancestor) => Some(self.lookup_type(ancestor, "ancestor")?),
            None => None,
        };
        self.push(id, ModuleKind::Type, parent)
    }

    /// Register a type derived from `base_type_id`, which is mandatory.
    pub fn register_subtype(&mut self, id: &str, base_type_id: &str) -> Result<(), CascadeError> {
        if base_type_id.is_empty() {
            return Err(CascadeError::required("baseTypeId"));
        }
        self.register_type(id, Some(base_type_id))
    }

    /// Register an instance of `type_id`.
    pub fn register_instance(&mut self, id: &str, type_id: &str) -> Result<(), CascadeError> {
        if type_id.is_empty() {
            return Err(CascadeError::required("instance type id"));
        }
        let parent = self.lookup_type(type_id, "type")?;
        self.push(id, ModuleKind::Instance, Some(parent))
    }

    /// Make `alias` resolve to `target`.
    pub fn alias(&mut self, alias: &str, target: &str) -> Result<(), CascadeError> {
        if alias.is_empty() || target.is_empty() {
            return Err(CascadeError::required("alias and target ids"));
        }
        self.aliases.insert(alias.to_string(), target.to_string());
        Ok(())
    }

    /// Map every id starting with `prefix` onto `target` + the remainder.
    pub fn map_namespace(&mut self, prefix: &str, target: &str) -> Result<(), CascadeError> {
        if prefix.is_empty() || target.is_empty() {
            return Err(CascadeError::required("namespace prefix and target"));
        }
        self.namespaces.retain(|(p, _)| p != prefix);
        self.namespaces.push((prefix.to_string(), target.to_string()));
        self.namespaces
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Ok(())
    }

    /// Root-to-leaf ancestry of `id`; see [`inheritance_chain`].
    pub fn chain(&self, id: &str) -> Result<Vec<String>, CascadeError> {
        inheritance_chain(self, id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, id: &str, kind: ModuleKind, parent: Option<usize>) -> Result<(), CascadeError> {
        if id.is_empty() {
            return Err(CascadeError::required("module id"));
        }
        if self.index.contains_key(id) {
            return Err(CascadeError::operation(format!("module {:?} is already registered", id)));
        }
        self.index.insert(id.to_string(), self.entries.len());
        self.entries.push(Entry {
            id: id.to_string(),
            kind,
            parent,
        });
        Ok(())
    }

    fn lookup_type(&self, id: &str, role: &str) -> Result<usize, CascadeError> {
        match self.index.get(id) {
            Some(&idx) if self.entries[idx].kind == ModuleKind::Type => Ok(idx),
            Some(_) => Err(CascadeError::invalid(format!("{} {:?} is not a type", role, id))),
            None => Err(CascadeError::invalid(format!("{} {:?} is not registered", role, id))),
        }
    }
}

impl ModuleMetadata for ModuleRegistry {
    fn get_id(&self, id_or_alias: &str) -> Option<String> {
        if self.index.contains_key(id_or_alias) {
            return Some(id_or_alias.to_string());
        }
        if let Some(target) = self.aliases.get(id_or_alias) {
            return Some(target.clone());
        }
        self.namespaces.iter().find_map(|(prefix, target)| {
            id_or_alias
                .strip_prefix(prefix.as_str())
                .map(|rest| format!("{}{}", target, rest))
        })
    }

    fn get(&self, id: &str) -> Option<ModuleDescriptor> {
        let entry = &self.entries[*self.index.get(id)?];
        let parent = entry.parent.map(|idx| self.entries[idx].id.clone());
        let (ancestor, type_id) = match entry.kind {
            ModuleKind::Type => (parent, None),
            ModuleKind::Instance => (None, parent),
        };
        Some(ModuleDescriptor {
            id: entry.id.clone(),
            kind: entry.kind,
            ancestor,
            type_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn registry() -> ModuleRegistry {
        let mut r = ModuleRegistry::new();
        r.register_type("test/T1", None).unwrap();
        r.register_subtype("test/T2", "test/T1").unwrap();
        r.register_subtype("test/T3", "test/T2").unwrap();
        r.register_instance("test/t3", "test/T3").unwrap();
        r
    }

    #[test]
    fn test_descriptors() {
        let r = registry();
        let t3 = r.get("test/T3").unwrap();
        assert_eq!(t3.kind, ModuleKind::Type);
        assert_eq!(t3.ancestor.as_deref(), Some("test/T2"));

        let inst = r.get("test/t3").unwrap();
        assert_eq!(inst.kind, ModuleKind::Instance);
        assert_eq!(inst.type_id.as_deref(), Some("test/T3"));
        assert!(inst.ancestor.is_none());

        assert!(r.get("test/T1").unwrap().ancestor.is_none());
        assert!(r.get("missing").is_none());
    }

    #[test]
    fn test_chain_root_to_leaf() {
        let r = registry();
        assert_eq!(
            inheritance_chain(&r, "test/T3").unwrap(),
            vec!["test/T1", "test/T2", "test/T3"]
        );
        assert_eq!(r.chain("test/T2").unwrap(), vec!["test/T1", "test/T2"]);
        assert_eq!(r.chain("test/t3").unwrap(), vec!["test/t3"]);
    }

    #[test]
    fn test_instance_does_not_inherit() {
        let r = registry();
        assert_eq!(inheritance_chain(&r, "test/t3").unwrap(), vec!["test/t3"]);
    }

    #[test]
    fn test_unknown_module_chain() {
        let r = registry();
        assert_eq!(inheritance_chain(&r, "other").unwrap(), vec!["other"]);
    }

    #[test]
    fn test_cycle_detected() {
        struct Cyclic;
        impl ModuleMetadata for Cyclic {
            fn get_id(&self, id: &str) -> Option<String> {
                Some(id.to_string())
            }
            fn get(&self, id: &str) -> Option<ModuleDescriptor> {
                let ancestor = if id == "a" { "b" } else { "a" };
                Some(ModuleDescriptor {
                    id: id.to_string(),
                    kind: ModuleKind::Type,
                    ancestor: Some(ancestor.to_string()),
                    type_id: None,
                })
            }
        }
        let err = inheritance_chain(&Cyclic, "a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentInvalid);
    }

    #[test]
    fn test_registration_errors() {
        let mut r = registry();
        assert_eq!(
            r.register_subtype("x", "").unwrap_err().kind(),
            ErrorKind::ArgumentRequired
        );
        assert_eq!(
            r.register_type("", None).unwrap_err().kind(),
            ErrorKind::ArgumentRequired
        );
        assert_eq!(
            r.register_type("x", Some("nope")).unwrap_err().kind(),
            ErrorKind::ArgumentInvalid
        );
        assert_eq!(
            r.register_instance("x", "test/t3").unwrap_err().kind(),
            ErrorKind::ArgumentInvalid
        );
        assert_eq!(
            r.register_type("test/T1", None).unwrap_err().kind(),
            ErrorKind::OperationInvalid
        );
    }

    #[test]
    fn test_aliases_and_namespaces() {
        let mut r = registry();
        r.alias("Base", "test/T1").unwrap();
        r.map_namespace("t/", "test/").unwrap();
        r.map_namespace("t/deep/", "elsewhere/").unwrap();

        assert_eq!(r.get_id("test/T2").as_deref(), Some("test/T2"));
        assert_eq!(r.get_id("Base").as_deref(), Some("test/T1"));
        assert_eq!(r.get_id("t/T3").as_deref(), Some("test/T3"));
        assert_eq!(r.get_id("t/deep/X").as_deref(), Some("elsewhere/X"));
        assert_eq!(r.get_id("unknown"), None);
    }
}
