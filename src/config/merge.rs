//! Operator-aware fragment merge
//!
//! Fragments are folded left to right, later fragments taking precedence.
//! Per key, the operator is either given explicitly by wrapping the value as
//! `{"$op": "replace" | "merge" | "add", "value": ...}` or chosen from the
//! shapes on both sides:
//! - Objects: merge by key (recursive)
//! - Arrays: REPLACE (last wins)
//! - Scalars and mismatched shapes: replace (last wins)

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::CascadeError;

/// Key naming the operator inside a wrapped value.
pub const OP_KEY: &str = "$op";

/// Key holding the payload inside a wrapped value.
pub const VALUE_KEY: &str = "value";

/// Per-key merge operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOp {
    /// Discard the existing value.
    Replace,
    /// Recurse key by key when both sides are objects, otherwise replace.
    Merge,
    /// Append when both sides are arrays, otherwise replace.
    Add,
}

impl FromStr for MergeOp {
    type Err = CascadeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(MergeOp::Replace),
            "merge" => Ok(MergeOp::Merge),
            "add" => Ok(MergeOp::Add),
            other => Err(CascadeError::operation(format!(
                "unknown {} {:?} (expected replace, merge or add)",
                OP_KEY, other
            ))),
        }
    }
}

impl fmt::Display for MergeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeOp::Replace => write!(f, "replace"),
            MergeOp::Merge => write!(f, "merge"),
            MergeOp::Add => write!(f, "add"),
        }
    }
}

/// Shape categories driving the default operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Object,
    Array,
    Other,
}

fn shape(value: &Value) -> Shape {
    match value {
        Value::Object(_) => Shape::Object,
        Value::Array(_) => Shape::Array,
        _ => Shape::Other,
    }
}

/// Operator used when the incoming value carries none.
fn default_op(current: Option<&Value>, incoming: &Value) -> MergeOp {
    match (current.map(shape), shape(incoming)) {
        (Some(Shape::Object), Shape::Object) => MergeOp::Merge,
        (Some(Shape::Array), Shape::Array) => MergeOp::Replace,
        // Scalars, absent keys and mismatched shapes
        _ => MergeOp::Replace,
    }
}

/// Split an `{"$op", "value"}` wrapper into its operator and payload.
fn unwrap_op(value: Value) -> Result<(Option<MergeOp>, Value), CascadeError> {
    let mut map = match value {
        Value::Object(map) => map,
        other => return Ok((None, other)),
    };
    let op = match map.remove(OP_KEY) {
        None => return Ok((None, Value::Object(map))),
        Some(Value::String(name)) => name.parse()?,
        Some(other) => {
            return Err(CascadeError::operation(format!(
                "{} must be a string, got {}",
                OP_KEY, other
            )))
        }
    };
    let payload = map.remove(VALUE_KEY).unwrap_or(Value::Null);
    Ok((Some(op), payload))
}

/// Resolve a value that replaces whatever was there.
///
/// Operator wrappers nested inside objects are applied against an empty
/// target, so they never leak into the merged result. Arrays are kept as-is.
fn resolve_replacement(value: Value) -> Result<Value, CascadeError> {
    match value {
        Value::Object(map) => Ok(Value::Object(merge_maps(Map::new(), map)?)),
        other => Ok(other),
    }
}

/// Merge one incoming key into `target`.
fn merge_key(target: &mut Map<String, Value>, key: String, incoming: Value) -> Result<(), CascadeError> {
    let (explicit, incoming) = unwrap_op(incoming)?;
    let current = target.remove(&key);
    let op = explicit.unwrap_or_else(|| default_op(current.as_ref(), &incoming));

    let merged = match (op, current, incoming) {
        (MergeOp::Merge, Some(Value::Object(base)), Value::Object(overlay)) => {
            Value::Object(merge_maps(base, overlay)?)
        }
        (MergeOp::Add, Some(Value::Array(mut base)), Value::Array(overlay)) => {
            base.extend(overlay);
            Value::Array(base)
        }
        // Replace, and merge/add on shapes they cannot combine
        (_, _, incoming) => resolve_replacement(incoming)?,
    };
    target.insert(key, merged);
    Ok(())
}

fn merge_maps(
    mut base: Map<String, Value>,
    overlay: Map<String, Value>,
) -> Result<Map<String, Value>, CascadeError> {
    for (key, value) in overlay {
        merge_key(&mut base, key, value)?;
    }
    Ok(base)
}

/// Merge `overlay` on top of `base`.
///
/// Two objects merge key by key; any other pair yields `overlay`.
pub fn merge_pair(base: Value, overlay: Value) -> Result<Value, CascadeError> {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => Ok(Value::Object(merge_maps(base, overlay)?)),
        (_, overlay) => resolve_replacement(overlay),
    }
}

/// Merge fragments in order (first is base, last has highest precedence).
///
/// Returns `None` when there are no fragments at all.
pub fn merge_fragments(fragments: Vec<Value>) -> Result<Option<Value>, CascadeError> {
    let mut acc: Option<Value> = None;
    for fragment in fragments {
        acc = Some(match acc {
            None => resolve_replacement(fragment)?,
            Some(current) => merge_pair(current, fragment)?,
        });
    }
    Ok(acc)
}
