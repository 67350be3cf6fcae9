//! Connection validation against module type metadata
//!
//! Triggers only produce values. Conditions may consume trigger outputs;
//! actions may consume trigger outputs and outputs of actions declared
//! before them. The first problem found is reported.

use ha_core::ModuleKind;
use std::collections::HashMap;

use crate::error::{ValidationError, ValidationResult};
use crate::managed::ManagedModule;
use crate::type_compat::TypeCompatibility;

/// Validate the wiring of a rule's modules, given in declaration order
pub fn validate(modules: &[ManagedModule], compat: &TypeCompatibility) -> ValidationResult<()> {
    for module in modules {
        let Some(module_type) = &module.module_type else {
            return Err(ValidationError::UnknownModuleType {
                module_id: module.id().to_string(),
                type_uid: module.module.type_uid.clone(),
            });
        };
        if module_type.kind != module.kind {
            return Err(ValidationError::WrongKind {
                module_id: module.id().to_string(),
                type_uid: module_type.uid.clone(),
                expected: module.kind.to_string(),
                found: module_type.kind.to_string(),
            });
        }
    }

    let mut producers: HashMap<&str, &ManagedModule> = modules
        .iter()
        .filter(|m| m.kind == ModuleKind::Trigger)
        .map(|m| (m.id(), m))
        .collect();

    for module in modules.iter().filter(|m| m.kind == ModuleKind::Condition) {
        validate_inputs(module, &producers, compat)?;
    }

    for module in modules.iter().filter(|m| m.kind == ModuleKind::Action) {
        validate_inputs(module, &producers, compat)?;
        producers.insert(module.id(), module);
    }

    Ok(())
}

fn validate_inputs(
    module: &ManagedModule,
    producers: &HashMap<&str, &ManagedModule>,
    compat: &TypeCompatibility,
) -> ValidationResult<()> {
    let Some(module_type) = &module.module_type else {
        return Ok(());
    };

    for input in &module_type.inputs {
        let Some(connection) = module.connections.get(input.name.as_str()) else {
            if input.required {
                return Err(ValidationError::RequiredInputNotConnected {
                    module_id: module.id().to_string(),
                    input: input.name.clone(),
                });
            }
            continue;
        };

        // Context references are only known at run time
        let Some(source_id) = connection.source_module_id() else {
            continue;
        };

        let source_type = producers
            .get(source_id)
            .and_then(|source| source.module_type.as_ref())
            .ok_or_else(|| ValidationError::InvalidSource {
                module_id: module.id().to_string(),
                input: input.name.clone(),
                source_module: source_id.to_string(),
            })?;

        let output = source_type
            .output(connection.output_name())
            .ok_or_else(|| ValidationError::OutputNotFound {
                module_id: module.id().to_string(),
                input: input.name.clone(),
                source_module: source_id.to_string(),
                output: connection.output_name().to_string(),
            })?;

        // A nested path selects a part of the output whose type is not declared
        if connection.path().is_some() {
            continue;
        }

        if !compat.is_compatible(&output.type_name, &input.type_name) {
            return Err(ValidationError::IncompatibleTypes {
                module_id: module.id().to_string(),
                input: input.name.clone(),
                input_type: input.type_name.clone(),
                source_module: source_id.to_string(),
                output: output.name.clone(),
                output_type: output.type_name.clone(),
            });
        }
    }

    Ok(())
}
