//! Dataflow connection resolution
//!
//! Conditions and actions declare which outputs feed their inputs. On a
//! module's first execution those declarations are resolved to
//! [`OutputRef`]s, lazy pointers into the source module's published output
//! values; at execution time the refs are dereferenced into an input
//! snapshot merged over the rule's execution context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use ra_core::module_type::data_types_compatible;
use ra_core::{Connection, ValueMap};
use ra_registries::ModuleTypeRegistry;

use crate::runtime::Activation;

/// A lazy pointer to the latest value a source module published for one of
/// its named outputs.
#[derive(Clone)]
pub(crate) struct OutputRef {
    output_name: String,
    store: Arc<Mutex<ValueMap>>,
}

impl OutputRef {
    pub fn new(output_name: impl Into<String>, store: Arc<Mutex<ValueMap>>) -> Self {
        Self {
            output_name: output_name.into(),
            store,
        }
    }

    /// The current value of the referenced output, if the source module has
    /// published one.
    pub fn value(&self) -> Option<serde_json::Value> {
        self.store.lock().unwrap().get(&self.output_name).cloned()
    }
}

/// Resolve a module's declared connections against the other modules of its
/// activation. Connections to unknown modules or to modules that produce no
/// outputs are skipped with a warning.
pub(crate) fn resolve_connections(
    module_id: &str,
    connections: &[Connection],
    activation: &Activation,
) -> HashMap<String, OutputRef> {
    let mut resolved = HashMap::new();
    for connection in connections {
        match activation.source(&connection.source_module_id) {
            Some(source) => {
                resolved.insert(
                    connection.input_name.clone(),
                    OutputRef::new(&connection.output_name, source.store),
                );
            }
            None => {
                let reason = if activation.contains(&connection.source_module_id) {
                    "module is not a data source"
                } else {
                    "module is not available"
                };
                warn!(
                    module_id = %module_id,
                    source = %connection.source_module_id,
                    "Cannot connect input '{}': {}",
                    connection.input_name,
                    reason
                );
            }
        }
    }
    resolved
}

/// Dereference resolved connections into an input snapshot. Outputs the
/// source has not published yet are left out.
pub(crate) fn input_values(resolved: &HashMap<String, OutputRef>) -> ValueMap {
    resolved
        .iter()
        .filter_map(|(input, output_ref)| output_ref.value().map(|v| (input.clone(), v)))
        .collect()
}

/// Validate the declared connections of every condition and action against
/// the module-type registry.
///
/// Checks that the source module exists and produces outputs, that declared
/// inputs and outputs exist in the respective schemas, that their data
/// types are compatible, and that required inputs are fed. Endpoints whose
/// module type has no registered schema are skipped; factories may serve
/// types that never publish one.
pub(crate) fn validate_connections(
    activation: &Activation,
    registry: &ModuleTypeRegistry,
) -> Vec<String> {
    let mut errors = Vec::new();

    let targets = activation
        .conditions
        .iter()
        .map(|c| (c.module.id.as_str(), c.module.type_uid.as_str(), &c.module.connections))
        .chain(
            activation
                .actions
                .iter()
                .map(|a| (a.module.id.as_str(), a.module.type_uid.as_str(), &a.module.connections)),
        );

    for (module_id, type_uid, connections) in targets {
        let target_type = registry.get(type_uid, None);
        if target_type.is_none() {
            debug!(module_id = %module_id, type_uid = %type_uid, "No schema for module type; skipping connection validation");
        }

        for connection in connections.iter() {
            let source = match activation.source(&connection.source_module_id) {
                Some(source) => source,
                None => {
                    let reason = if activation.contains(&connection.source_module_id) {
                        "is not a data source"
                    } else {
                        "does not exist"
                    };
                    errors.push(format!(
                        "connection '{}' of module '{}' references module '{}', which {}",
                        connection, module_id, connection.source_module_id, reason
                    ));
                    continue;
                }
            };

            let input = target_type
                .as_ref()
                .map(|t| (t.input(&connection.input_name), t));
            if let Some((None, _)) = input {
                errors.push(format!(
                    "module '{}' has no input named '{}'",
                    module_id, connection.input_name
                ));
                continue;
            }

            let source_type = registry.get(&source.type_uid, None);
            let output = source_type.as_ref().map(|t| t.output(&connection.output_name));
            if let Some(None) = output {
                errors.push(format!(
                    "module '{}' has no output named '{}'",
                    connection.source_module_id, connection.output_name
                ));
                continue;
            }

            if let (Some((Some(input), _)), Some(Some(output))) = (input, output) {
                if !data_types_compatible(&output.data_type, &input.data_type) {
                    errors.push(format!(
                        "incompatible connection '{}' of module '{}': output type '{}' does not match input type '{}'",
                        connection, module_id, output.data_type, input.data_type
                    ));
                }
            }
        }

        if let Some(target_type) = &target_type {
            for input in target_type.inputs.iter().filter(|i| i.required) {
                if !connections.iter().any(|c| c.input_name == input.name) {
                    errors.push(format!(
                        "required input '{}' of module '{}' is not connected",
                        input.name, module_id
                    ));
                }
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use ra_core::{Input, ModuleKind, ModuleType, Output};
    use serde_json::json;

    fn activation() -> Activation {
        Activation::new(
            vec![serde_json::from_value(json!({"id": "t", "type_uid": "timer"})).unwrap()],
            vec![serde_json::from_value(json!({
                "id": "c",
                "type_uid": "threshold",
                "connections": [
                    {"input_name": "value", "source_module_id": "t", "output_name": "elapsed"}
                ]
            }))
            .unwrap()],
            vec![serde_json::from_value(json!({
                "id": "a",
                "type_uid": "notify",
                "connections": [
                    {"input_name": "at", "source_module_id": "t", "output_name": "elapsed"}
                ]
            }))
            .unwrap()],
        )
    }

    #[test]
    fn test_output_ref_tracks_latest_value() {
        let activation = activation();
        let trigger = activation.trigger("t").unwrap();
        let output_ref = OutputRef::new("elapsed", trigger.outputs_store());

        assert_eq!(output_ref.value(), None);
        trigger.set_outputs([("elapsed".to_string(), json!(3))].into_iter().collect());
        assert_eq!(output_ref.value(), Some(json!(3)));
        trigger.set_outputs([("elapsed".to_string(), json!(4))].into_iter().collect());
        assert_eq!(output_ref.value(), Some(json!(4)));
    }

    #[test]
    fn test_resolve_and_materialize() {
        let activation = activation();
        activation
            .trigger("t")
            .unwrap()
            .set_outputs([("elapsed".to_string(), json!(42))].into_iter().collect());

        let condition = &activation.conditions[0];
        let resolved = resolve_connections(
            &condition.module.id,
            &condition.module.connections,
            &activation,
        );
        assert_eq!(resolved.len(), 1);

        let inputs = input_values(&resolved);
        assert_eq!(inputs.get("value"), Some(&json!(42)));
    }

    #[test]
    fn test_resolve_skips_unknown_source() {
        let activation = activation();
        let connections = vec![Connection::new("value", "ghost", "elapsed")];
        let resolved = resolve_connections("c", &connections, &activation);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_resolve_skips_condition_source() {
        // Conditions publish no outputs and cannot feed connections.
        let activation = activation();
        let connections = vec![Connection::new("value", "c", "anything")];
        let resolved = resolve_connections("a", &connections, &activation);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_validation_passes_without_schemas() {
        let registry = ModuleTypeRegistry::new();
        assert!(validate_connections(&activation(), &registry).is_empty());
    }

    #[test]
    fn test_validation_unknown_source() {
        let registry = ModuleTypeRegistry::new();
        let activation = Activation::new(
            Vec::new(),
            Vec::new(),
            vec![serde_json::from_value(json!({
                "id": "a",
                "type_uid": "notify",
                "connections": [
                    {"input_name": "at", "source_module_id": "ghost", "output_name": "x"}
                ]
            }))
            .unwrap()],
        );
        let errors = validate_connections(&activation, &registry);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ghost"));
    }

    #[test]
    fn test_validation_with_schemas() {
        let registry = ModuleTypeRegistry::new();
        let mut timer = ModuleType::new("timer", ModuleKind::Trigger);
        timer.outputs.push(Output::new("elapsed", "number"));
        registry.add(timer);

        let mut threshold = ModuleType::new("threshold", ModuleKind::Condition);
        threshold.inputs.push(Input::new("value", "number"));
        registry.add(threshold);

        let mut notify = ModuleType::new("notify", ModuleKind::Action);
        notify.inputs.push(Input::new("at", "text"));
        registry.add(notify);

        let errors = validate_connections(&activation(), &registry);
        // The condition's number→number wiring is fine; the action wires a
        // number output into a text input.
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("incompatible"));
    }

    #[test]
    fn test_validation_missing_required_input() {
        let registry = ModuleTypeRegistry::new();
        let mut threshold = ModuleType::new("threshold", ModuleKind::Condition);
        threshold.inputs.push(Input {
            name: "limit".into(),
            data_type: "number".into(),
            required: true,
        });
        registry.add(threshold);

        let errors = validate_connections(&activation(), &registry);
        assert!(errors.iter().any(|e| e.contains("required input 'limit'")));
    }
}
