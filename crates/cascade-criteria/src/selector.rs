//! Selector parsing and normalized criteria.

use serde::{Deserialize, Serialize};

use crate::Dimension;

/// Accepted values for one dimension. A single string and a list of strings
/// both deserialize into this; membership is "any of".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany", into = "Vec<String>")]
pub struct Accepted(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Accepted {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(v) => Accepted(vec![v]),
            OneOrMany::Many(vs) => Accepted(vs),
        }
    }
}

impl From<Accepted> for Vec<String> {
    fn from(value: Accepted) -> Self {
        value.0
    }
}

impl From<&str> for Accepted {
    fn from(value: &str) -> Self {
        Accepted(vec![value.to_string()])
    }
}

impl From<String> for Accepted {
    fn from(value: String) -> Self {
        Accepted(vec![value])
    }
}

impl From<Vec<String>> for Accepted {
    fn from(values: Vec<String>) -> Self {
        Accepted(values)
    }
}

impl From<Vec<&str>> for Accepted {
    fn from(values: Vec<&str>) -> Self {
        Accepted(values.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Accepted {
    fn from(values: [&str; N]) -> Self {
        Accepted(values.iter().map(|v| v.to_string()).collect())
    }
}

impl Accepted {
    /// Whether `value` is one of the accepted values.
    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }

    /// Whether any value of `other` is accepted here.
    pub fn intersects(&self, other: &Accepted) -> bool {
        other.0.iter().any(|v| self.contains(v))
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }
}

/// Errors raised while normalizing a selector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("select.module is required")]
    ModuleMissing,

    #[error("select.module[{index}] is null or empty")]
    EmptyModuleEntry { index: usize },

    #[error("select.annotation[{index}] is empty")]
    EmptyAnnotationEntry { index: usize },
}

/// A rule's selection criteria as registered.
///
/// `module` keeps nullable entries so that malformed input (for example a
/// JSON `[null]`) is rejected by normalization instead of by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Selector {
    /// Selected module ids (mandatory, one or more).
    #[serde(default, deserialize_with = "module_ids")]
    pub module: Vec<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<Accepted>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Accepted>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Accepted>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<Accepted>,

    /// Annotation ids this rule configures instead of the module itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Accepted>,
}

fn module_ids<'de, D>(deserializer: D) -> Result<Vec<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ModuleIds {
        One(Option<String>),
        Many(Vec<Option<String>>),
    }

    Ok(match ModuleIds::deserialize(deserializer)? {
        ModuleIds::One(id) => vec![id],
        ModuleIds::Many(ids) => ids,
    })
}

impl Selector {
    /// Select a single module id.
    pub fn module(id: impl Into<String>) -> Self {
        Self {
            module: vec![Some(id.into())],
            ..Default::default()
        }
    }

    /// Select several module ids.
    pub fn modules<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            module: ids.into_iter().map(|id| Some(id.into())).collect(),
            ..Default::default()
        }
    }

    pub fn application(mut self, accepted: impl Into<Accepted>) -> Self {
        self.application = Some(accepted.into());
        self
    }

    pub fn user(mut self, accepted: impl Into<Accepted>) -> Self {
        self.user = Some(accepted.into());
        self
    }

    pub fn theme(mut self, accepted: impl Into<Accepted>) -> Self {
        self.theme = Some(accepted.into());
        self
    }

    pub fn locale(mut self, accepted: impl Into<Accepted>) -> Self {
        self.locale = Some(accepted.into());
        self
    }

    pub fn annotation(mut self, accepted: impl Into<Accepted>) -> Self {
        self.annotation = Some(accepted.into());
        self
    }

    /// Validate and normalize into [`Criteria`].
    ///
    /// Every module id must be present and non-empty; this is checked for
    /// all entries before `canonicalize` runs on any of them. Module and
    /// annotation ids are passed through `canonicalize`; the remaining
    /// dimensions are kept verbatim.
    pub fn into_criteria<E, F>(self, mut canonicalize: F) -> Result<Criteria, E>
    where
        E: From<SelectorError>,
        F: FnMut(&str) -> Result<String, E>,
    {
        if self.module.is_empty() {
            return Err(SelectorError::ModuleMissing.into());
        }
        let mut raw = Vec::with_capacity(self.module.len());
        for (index, id) in self.module.iter().enumerate() {
            match id.as_deref() {
                Some(id) if !id.is_empty() => raw.push(id),
                _ => return Err(SelectorError::EmptyModuleEntry { index }.into()),
            }
        }
        if let Some(ref annotation) = self.annotation {
            if let Some(index) = annotation.values().iter().position(|a| a.is_empty()) {
                return Err(SelectorError::EmptyAnnotationEntry { index }.into());
            }
        }

        let mut module: Vec<String> = Vec::with_capacity(raw.len());
        for id in raw {
            let id = canonicalize(id)?;
            if !module.contains(&id) {
                module.push(id);
            }
        }

        let annotation = match self.annotation {
            Some(accepted) => Some(Accepted(
                accepted
                    .values()
                    .iter()
                    .map(|a| canonicalize(a))
                    .collect::<Result<Vec<_>, E>>()?,
            )),
            None => None,
        };

        Ok(Criteria {
            module,
            application: self.application,
            user: self.user,
            theme: self.theme,
            locale: self.locale,
            annotation,
        })
    }
}

/// Normalized, validated selection criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Criteria {
    /// Canonical module ids, deduplicated, in registration order.
    pub module: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<Accepted>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Accepted>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<Accepted>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<Accepted>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Accepted>,
}

impl Criteria {
    /// Accepted values for a weighted dimension, if constrained.
    pub fn get(&self, dim: Dimension) -> Option<&Accepted> {
        match dim {
            Dimension::User => self.user.as_ref(),
            Dimension::Theme => self.theme.as_ref(),
            Dimension::Locale => self.locale.as_ref(),
            Dimension::Application => self.application.as_ref(),
        }
    }

    pub fn specificity(&self) -> u8 {
        crate::specificity(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str) -> Result<String, SelectorError> {
        Ok(id.to_string())
    }

    #[test]
    fn test_parse_single_and_list_values() {
        let selector: Selector = serde_json::from_str(
            r#"{"module": "test/type", "user": "alice", "locale": ["en", "de"]}"#,
        )
        .unwrap();
        assert_eq!(selector.module, vec![Some("test/type".to_string())]);
        assert_eq!(selector.user, Some(Accepted::from("alice")));
        assert_eq!(selector.locale, Some(Accepted::from(["en", "de"])));
        assert!(selector.theme.is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_dimension() {
        let result: Result<Selector, _> =
            serde_json::from_str(r#"{"module": "m", "platform": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_module() {
        let selector: Selector = serde_json::from_str(r#"{"user": "alice"}"#).unwrap();
        assert_eq!(
            selector.into_criteria(identity),
            Err(SelectorError::ModuleMissing)
        );
    }

    #[test]
    fn test_null_module_entry() {
        let selector: Selector = serde_json::from_str(r#"{"module": ["a", null]}"#).unwrap();
        assert_eq!(
            selector.into_criteria(identity),
            Err(SelectorError::EmptyModuleEntry { index: 1 })
        );
    }

    #[test]
    fn test_empty_module_entry() {
        let selector = Selector::modules(["a", ""]);
        assert_eq!(
            selector.into_criteria(identity),
            Err(SelectorError::EmptyModuleEntry { index: 1 })
        );
    }

    #[test]
    fn test_canonicalize_is_not_called_on_invalid_input() {
        let mut calls = 0;
        let selector = Selector {
            module: vec![Some("a".to_string()), None],
            ..Default::default()
        };
        let result = selector.into_criteria(|id| {
            calls += 1;
            Ok::<_, SelectorError>(id.to_string())
        });
        assert!(result.is_err());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_modules_deduplicated_after_canonicalization() {
        let selector = Selector::modules(["alias/type", "real/type"]);
        let criteria = selector
            .into_criteria(|id| Ok::<_, SelectorError>(id.replace("alias/", "real/")))
            .unwrap();
        assert_eq!(criteria.module, vec!["real/type".to_string()]);
    }

    #[test]
    fn test_serialize_round_trip_shape() {
        let selector = Selector::module("m").theme("dark");
        let json = serde_json::to_value(&selector).unwrap();
        assert_eq!(json["module"], serde_json::json!(["m"]));
        assert_eq!(json["theme"], serde_json::json!(["dark"]));
        assert!(json.get("user").is_none());
    }
}
