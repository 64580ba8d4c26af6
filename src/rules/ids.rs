//! Reference resolution against a rule set's context id.
//!
//! A reference is relative when it starts with `./` or `../`; it resolves
//! against the directory of the context id (everything before its last `/`).

use crate::error::CascadeError;

/// Whether `reference` must be resolved against a context id.
pub fn is_relative(reference: &str) -> bool {
    reference.starts_with("./") || reference.starts_with("../")
}

/// Resolve `reference` to an absolute id.
pub fn resolve_reference(reference: &str, context_id: Option<&str>) -> Result<String, CascadeError> {
    if reference.is_empty() {
        return Err(CascadeError::required("reference must not be empty"));
    }
    if !is_relative(reference) {
        return Ok(reference.to_string());
    }

    let context_id = match context_id {
        Some(id) if !id.is_empty() => id,
        _ => {
            return Err(CascadeError::operation(format!(
                "relative reference {:?} used without a context id",
                reference
            )))
        }
    };

    let mut segments: Vec<&str> = context_id.split('/').collect();
    segments.pop();

    for part in reference.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(CascadeError::invalid(format!(
                        "reference {:?} escapes the root of context {:?}",
                        reference, context_id
                    )));
                }
            }
            name => segments.push(name),
        }
    }

    if segments.is_empty() {
        return Err(CascadeError::invalid(format!(
            "reference {:?} resolves to an empty id in context {:?}",
            reference, context_id
        )));
    }
    Ok(segments.join("/"))
}
