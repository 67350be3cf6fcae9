//! Rule preparation
//!
//! Turns a registered rule into the list of managed modules the engine binds
//! handlers to: template materialization, module id checks, configuration
//! resolution, connection parsing, auto-mapping and validation.

use ha_core::{
    validate_module_id, Configuration, ModelError, ModuleKind, ModuleTypeProvider, Rule,
    RuleStatusDetail, RuleStatusInfo, TemplateProvider,
};
use std::collections::HashSet;
use tracing::debug;

use crate::auto_mapper::auto_map;
use crate::connection::resolve_connections;
use crate::error::{ConnectionError, ValidationError};
use crate::managed::ManagedModule;
use crate::reference::resolve_configuration;
use crate::type_compat::TypeCompatibility;
use crate::validator::validate;

/// Why a rule could not be prepared
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PrepareError {
    TemplateMissing(String),
    Model(ModelError),
    Connection { module_id: String, error: ConnectionError },
    Validation(ValidationError),
}

impl PrepareError {
    /// Status a rule ends in after this error
    pub fn status_info(&self, rule_uid: &str) -> RuleStatusInfo {
        match self {
            PrepareError::TemplateMissing(template_uid) => RuleStatusInfo::uninitialized(
                RuleStatusDetail::TemplateMissingError,
                Some(format!("Template '{}' is not available", template_uid)),
            ),
            PrepareError::Model(error) => RuleStatusInfo::uninitialized(
                RuleStatusDetail::ConfigurationError,
                Some(error.to_string()),
            ),
            PrepareError::Connection { module_id, error } => RuleStatusInfo::uninitialized(
                RuleStatusDetail::ConfigurationError,
                Some(format!("Module '{}': {}", module_id, error)),
            ),
            PrepareError::Validation(error) => RuleStatusInfo::uninitialized(
                RuleStatusDetail::InvalidRule,
                Some(format!("Validation of rule {} has failed! {}", rule_uid, error)),
            ),
        }
    }
}

/// Expand a template-based rule into its modules
///
/// Rules that declare modules of their own, or have no template, are used as
/// they are.
pub(crate) fn materialize(
    rule: &Rule,
    templates: Option<&dyn TemplateProvider>,
) -> Result<Rule, PrepareError> {
    let Some(template_uid) = rule.template_uid.as_deref().filter(|_| rule.is_empty()) else {
        return Ok(rule.clone());
    };

    let template = templates
        .and_then(|provider| provider.get(template_uid))
        .ok_or_else(|| PrepareError::TemplateMissing(template_uid.to_string()))?;

    let mut configuration: Configuration = template.config_defaults.clone();
    for (key, value) in &rule.configuration {
        configuration.insert(key.clone(), value.clone());
    }

    debug!(rule_uid = %rule.uid, template_uid = %template_uid, "Materialized rule from template");
    Ok(Rule {
        configuration,
        triggers: template.triggers.clone(),
        conditions: template.conditions.clone(),
        actions: template.actions.clone(),
        ..rule.clone()
    })
}

/// Build and validate the managed modules of a materialized rule
pub(crate) fn prepare_modules(
    rule: &Rule,
    module_types: &dyn ModuleTypeProvider,
    compat: &TypeCompatibility,
) -> Result<Vec<ManagedModule>, PrepareError> {
    let mut seen = HashSet::new();
    for (_, module) in rule.modules() {
        validate_module_id(&module.id).map_err(PrepareError::Model)?;
        if !seen.insert(module.id.as_str()) {
            return Err(PrepareError::Model(ModelError::DuplicateModuleId(
                module.id.clone(),
            )));
        }
    }

    let mut modules = Vec::with_capacity(seen.len());
    for (kind, module) in rule.modules() {
        let mut managed = ManagedModule::new(kind, module.clone());
        managed.module.configuration =
            resolve_configuration(&module.configuration, &rule.configuration);

        // Trigger inputs are not wired
        if kind != ModuleKind::Trigger {
            managed.connections =
                resolve_connections(&module.inputs).map_err(|error| PrepareError::Connection {
                    module_id: module.id.clone(),
                    error,
                })?;
        }

        managed.module_type = module_types.get(&module.type_uid);
        modules.push(managed);
    }

    auto_map(&mut modules);
    validate(&modules, compat).map_err(PrepareError::Validation)?;
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::{Input, Module, ModuleType, Output, RuleTemplate};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct Types(HashMap<String, Arc<ModuleType>>);

    impl Types {
        fn new(types: Vec<ModuleType>) -> Self {
            Self(types.into_iter().map(|t| (t.uid.clone(), Arc::new(t))).collect())
        }
    }

    impl ModuleTypeProvider for Types {
        fn get(&self, uid: &str) -> Option<Arc<ModuleType>> {
            self.0.get(uid).cloned()
        }
    }

    struct Templates(RuleTemplate);

    impl TemplateProvider for Templates {
        fn get(&self, uid: &str) -> Option<Arc<RuleTemplate>> {
            (self.0.uid == uid).then(|| Arc::new(self.0.clone()))
        }
    }

    fn types() -> Types {
        Types::new(vec![
            ModuleType::trigger("temp.Trigger")
                .with_output(Output::new("x", "Decimal").with_tags(["temp"])),
            ModuleType::action("fan.Action")
                .with_input(Input::new("in", "Number").with_tags(["temp"]).required()),
        ])
    }

    #[test]
    fn test_prepare_auto_maps_and_validates() {
        let rule = Rule::new(Some("r1".into()))
            .with_config("speed", json!(3))
            .with_trigger(Module::new("t1", "temp.Trigger"))
            .with_action(Module::new("a1", "fan.Action").with_config("level", json!("$speed")));

        let modules = prepare_modules(&rule, &types(), &TypeCompatibility::default()).unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[1].module.inputs["in"], "t1.x");
        assert_eq!(modules[1].module.configuration["level"], json!(3));
        // The registered rule is left untouched
        assert!(rule.actions[0].inputs.is_empty());
    }

    #[test]
    fn test_invalid_and_duplicate_module_ids() {
        let bad = Rule::new(Some("r1".into())).with_trigger(Module::new("t.1", "temp.Trigger"));
        let err = prepare_modules(&bad, &types(), &TypeCompatibility::default()).unwrap_err();
        assert_eq!(
            err.status_info("r1").detail,
            RuleStatusDetail::ConfigurationError
        );

        let duplicate = Rule::new(Some("r1".into()))
            .with_trigger(Module::new("m", "temp.Trigger"))
            .with_action(Module::new("m", "fan.Action"));
        assert!(matches!(
            prepare_modules(&duplicate, &types(), &TypeCompatibility::default()),
            Err(PrepareError::Model(ModelError::DuplicateModuleId(_)))
        ));
    }

    #[test]
    fn test_malformed_reference() {
        let rule = Rule::new(Some("r1".into()))
            .with_trigger(Module::new("t1", "temp.Trigger"))
            .with_action(Module::new("a1", "fan.Action").with_input("in", "nodot"));
        let err = prepare_modules(&rule, &types(), &TypeCompatibility::default()).unwrap_err();
        assert_eq!(
            err.status_info("r1").detail,
            RuleStatusDetail::ConfigurationError
        );
    }

    #[test]
    fn test_validation_message() {
        let rule = Rule::new(Some("r1".into())).with_action(Module::new("a1", "fan.Action"));
        let info = prepare_modules(&rule, &types(), &TypeCompatibility::default())
            .unwrap_err()
            .status_info("r1");
        assert_eq!(info.detail, RuleStatusDetail::InvalidRule);
        assert!(info
            .message
            .unwrap()
            .starts_with("Validation of rule r1 has failed!"));
    }

    #[test]
    fn test_materialize_template() {
        let template = RuleTemplate::new("tpl.Cooling")
            .with_default("speed", json!(1))
            .with_trigger(Module::new("t1", "temp.Trigger"))
            .with_action(Module::new("a1", "fan.Action").with_config("level", json!("$speed")));
        let templates = Templates(template);

        let rule = Rule::new(Some("r1".into()))
            .with_template("tpl.Cooling")
            .with_config("speed", json!(5));
        let materialized = materialize(&rule, Some(&templates)).unwrap();
        assert_eq!(materialized.triggers.len(), 1);
        assert_eq!(materialized.configuration["speed"], json!(5));

        let modules =
            prepare_modules(&materialized, &types(), &TypeCompatibility::default()).unwrap();
        assert_eq!(modules[1].module.configuration["level"], json!(5));

        let missing = Rule::new(Some("r2".into())).with_template("tpl.Unknown");
        assert_eq!(
            materialize(&missing, Some(&templates)),
            Err(PrepareError::TemplateMissing("tpl.Unknown".into()))
        );
        assert!(materialize(&missing, None).is_err());
    }
}
