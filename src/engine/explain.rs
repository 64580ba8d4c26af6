//! Explain output for a resolution
//!
//! Lists every fragment that took part in a resolution, in merge order, with
//! where it came from and why it sorted where it did.

use cascade_criteria::SelectionContext;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::merge_fragments;
use crate::error::CascadeError;

/// Schema identifier for explain output
pub const SCHEMA_ID: &str = "cascade/explain@1";

/// Where a fragment came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ContributionSource {
    /// A registered rule, found under `module_id` of the chain.
    Rule {
        module_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context_id: Option<String>,
        #[serde(serialize_with = "priority_repr")]
        priority: f64,
        specificity: u8,
        ordinal: u64,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        deps: Vec<String>,
    },
    /// Entry `index` of the external provider's answer.
    External {
        module_id: String,
        index: usize,
        #[serde(serialize_with = "priority_repr")]
        priority: f64,
    },
}

/// Non-finite priorities render as strings, JSON has no infinity.
fn priority_repr<S: Serializer>(priority: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if priority.is_finite() {
        serializer.serialize_f64(*priority)
    } else if priority.is_sign_negative() {
        serializer.serialize_str("-inf")
    } else {
        serializer.serialize_str("inf")
    }
}

/// One evaluated fragment and its origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    #[serde(flatten)]
    pub source: ContributionSource,
    pub fragment: Value,
}

/// The merge sequence of one resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    /// Canonical module id.
    pub module_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_id: Option<String>,
    /// Ids queried, most general first.
    pub chain: Vec<String>,
    /// Fragments in merge order; the last one wins.
    pub contributions: Vec<Contribution>,
}

impl Explanation {
    pub(crate) fn with_contributions(mut self, contributions: Vec<Contribution>) -> Self {
        self.contributions = contributions;
        self
    }

    /// Fragments in merge order.
    pub fn fragments(self) -> Vec<Value> {
        self.contributions.into_iter().map(|c| c.fragment).collect()
    }
}

/// Explain output for the CLI
#[derive(Debug, Clone, Serialize)]
pub struct ExplainOutput {
    pub schema_id: String,

    pub created_at: DateTime<Utc>,

    /// Module id as requested, before alias resolution
    pub requested: String,

    /// Whether ancestor rules were included
    pub inherit: bool,

    /// Selection context the rules were matched against
    pub context: SelectionContext,

    #[serde(flatten)]
    pub explanation: Explanation,

    /// Merged configuration (null when nothing matched)
    pub result: Option<Value>,

    /// SHA-256 of the JCS-canonical result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_digest: Option<String>,
}

impl ExplainOutput {
    /// Merge `explanation` and wrap it for output.
    pub fn build(
        requested: &str,
        inherit: bool,
        context: &SelectionContext,
        explanation: Explanation,
    ) -> Result<Self, CascadeError> {
        let result = merge_fragments(explanation.clone().fragments())?;
        let result_digest = match result {
            Some(ref value) => Some(Self::digest(value)?),
            None => None,
        };

        Ok(Self {
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            requested: requested.to_string(),
            inherit,
            context: context.clone(),
            explanation,
            result,
            result_digest,
        })
    }

    /// SHA-256 hex digest of the RFC 8785 canonical form of `value`.
    pub fn digest(value: &Value) -> Result<String, CascadeError> {
        let jcs_bytes = serde_json_canonicalizer::to_vec(value)
            .map_err(|e| CascadeError::invalid(format!("cannot canonicalize result: {}", e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Serialize to JSON (pretty printed)
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable listing
    pub fn to_human(&self) -> String {
        let mut lines = Vec::new();

        let explanation = &self.explanation;
        lines.push(format!("Module: {} (requested as {})", explanation.module_id, self.requested));
        if let Some(ref annotation) = explanation.annotation_id {
            lines.push(format!("Annotation: {}", annotation));
        }
        lines.push(format!("Chain: {}", explanation.chain.join(" -> ")));
        lines.push(String::new());

        if explanation.contributions.is_empty() {
            lines.push("No rule matched.".to_string());
            return lines.join("\n");
        }

        lines.push("Contributions (merged in this order, last wins):".to_string());
        for (i, contribution) in explanation.contributions.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, Self::format_source(&contribution.source)));
            lines.push(format!("     {}", contribution.fragment));
        }
        lines.push(String::new());
        match self.result {
            Some(ref result) => lines.push(format!("Result: {}", result)),
            None => lines.push("Result: null".to_string()),
        }

        lines.join("\n")
    }

    fn format_source(source: &ContributionSource) -> String {
        match source {
            ContributionSource::Rule {
                module_id,
                context_id,
                priority,
                specificity,
                ordinal,
                deps,
            } => {
                let mut text = format!(
                    "rule on {} [priority {}, specificity {}, #{}]",
                    module_id, priority, specificity, ordinal
                );
                if let Some(context) = context_id {
                    text.push_str(&format!(" from {}", context));
                }
                if !deps.is_empty() {
                    text.push_str(&format!(" deps: {}", deps.join(", ")));
                }
                text
            }
            ContributionSource::External {
                module_id,
                index,
                priority,
            } => format!("external #{} for {} [priority {}]", index, module_id, priority),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn explanation() -> Explanation {
        Explanation {
            module_id: "app/Widget".to_string(),
            annotation_id: None,
            chain: vec!["app/Base".to_string(), "app/Widget".to_string()],
            contributions: vec![
                Contribution {
                    source: ContributionSource::External {
                        module_id: "app/Widget".to_string(),
                        index: 0,
                        priority: f64::NEG_INFINITY,
                    },
                    fragment: json!({"a": 0, "b": 0}),
                },
                Contribution {
                    source: ContributionSource::Rule {
                        module_id: "app/Widget".to_string(),
                        context_id: Some("app/rules".to_string()),
                        priority: 0.0,
                        specificity: 8,
                        ordinal: 3,
                        deps: vec![],
                    },
                    fragment: json!({"a": 1}),
                },
            ],
        }
    }

    #[test]
    fn test_build_merges_result() {
        let output =
            ExplainOutput::build("Widget", true, &SelectionContext::default(), explanation()).unwrap();
        assert_eq!(output.result, Some(json!({"a": 1, "b": 0})));
        assert_eq!(output.result_digest.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_json_shape() {
        let output =
            ExplainOutput::build("Widget", false, &SelectionContext::default(), explanation()).unwrap();
        let json: Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();
        assert_eq!(json["schema_id"], SCHEMA_ID);
        assert_eq!(json["module_id"], "app/Widget");
        assert_eq!(json["contributions"][0]["source"], "external");
        assert_eq!(json["contributions"][0]["priority"], "-inf");
        assert_eq!(json["contributions"][1]["source"], "rule");
        assert_eq!(json["contributions"][1]["specificity"], 8);
    }

    #[test]
    fn test_digest_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": [1, 2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": [1, 2], "x": 1}"#).unwrap();
        assert_eq!(ExplainOutput::digest(&a).unwrap(), ExplainOutput::digest(&b).unwrap());
    }

    #[test]
    fn test_human_output() {
        let output =
            ExplainOutput::build("Widget", true, &SelectionContext::default(), explanation()).unwrap();
        let text = output.to_human();
        assert!(text.contains("Chain: app/Base -> app/Widget"));
        assert!(text.contains("external #0"));
        assert!(text.contains("from app/rules"));
    }

    #[test]
    fn test_empty_explanation() {
        let empty = Explanation {
            contributions: vec![],
            ..explanation()
        };
        let output = ExplainOutput::build("Widget", false, &SelectionContext::default(), empty).unwrap();
        assert!(output.result.is_none());
        assert!(output.result_digest.is_none());
        assert!(output.to_human().contains("No rule matched."));
    }
}
