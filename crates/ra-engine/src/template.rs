//! Template expansion
//!
//! A template-bound rule supplies only a configuration map; its concrete
//! modules are materialized from the template body. Module configuration
//! values may reference the rule's configuration with `${name}`: a value
//! that is exactly one reference is replaced by the referenced value with
//! its type intact, while references embedded in longer strings are
//! substituted textually.

use serde_json::Value;
use thiserror::Error;

use ra_core::{Action, Condition, RuleTemplate, Trigger, ValueMap};

/// Errors raised while materializing a rule from a template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub(crate) enum ExpansionError {
    #[error("module '{module_id}' references unknown configuration value '${{{reference}}}'")]
    UnknownReference { module_id: String, reference: String },

    #[error("module '{module_id}' has an unterminated configuration reference")]
    UnterminatedReference { module_id: String },
}

/// Materialize concrete modules from a template and a rule's configuration.
pub(crate) fn expand(
    template: &RuleTemplate,
    configuration: &ValueMap,
) -> Result<(Vec<Trigger>, Vec<Condition>, Vec<Action>), ExpansionError> {
    let triggers = template
        .triggers
        .iter()
        .map(|t| {
            let mut t = t.clone();
            t.configuration = substitute_map(&t.id, t.configuration, configuration)?;
            Ok(t)
        })
        .collect::<Result<_, _>>()?;

    let conditions = template
        .conditions
        .iter()
        .map(|c| {
            let mut c = c.clone();
            c.configuration = substitute_map(&c.id, c.configuration, configuration)?;
            Ok(c)
        })
        .collect::<Result<_, _>>()?;

    let actions = template
        .actions
        .iter()
        .map(|a| {
            let mut a = a.clone();
            a.configuration = substitute_map(&a.id, a.configuration, configuration)?;
            Ok(a)
        })
        .collect::<Result<_, _>>()?;

    Ok((triggers, conditions, actions))
}

fn substitute_map(
    module_id: &str,
    map: ValueMap,
    configuration: &ValueMap,
) -> Result<ValueMap, ExpansionError> {
    map.into_iter()
        .map(|(k, v)| Ok((k, substitute_value(module_id, v, configuration)?)))
        .collect()
}

fn substitute_value(
    module_id: &str,
    value: Value,
    configuration: &ValueMap,
) -> Result<Value, ExpansionError> {
    match value {
        Value::String(s) => substitute_string(module_id, s, configuration),
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|v| substitute_value(module_id, v, configuration))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(entries) => Ok(Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, substitute_value(module_id, v, configuration)?)))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other),
    }
}

fn substitute_string(
    module_id: &str,
    s: String,
    configuration: &ValueMap,
) -> Result<Value, ExpansionError> {
    // Whole-string reference: the referenced value keeps its type.
    if let Some(name) = s
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|name| !name.contains("${") && !name.contains('}'))
    {
        return configuration
            .get(name)
            .cloned()
            .ok_or_else(|| ExpansionError::UnknownReference {
                module_id: module_id.to_string(),
                reference: name.to_string(),
            });
    }

    if !s.contains("${") {
        return Ok(Value::String(s));
    }

    // Embedded references are substituted textually.
    let mut result = String::with_capacity(s.len());
    let mut rest = s.as_str();
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(ExpansionError::UnterminatedReference {
                module_id: module_id.to_string(),
            });
        };
        let name = &after[..end];
        let value = configuration
            .get(name)
            .ok_or_else(|| ExpansionError::UnknownReference {
                module_id: module_id.to_string(),
                reference: name.to_string(),
            })?;
        match value {
            Value::String(text) => result.push_str(text),
            other => result.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(Value::String(result))
}
