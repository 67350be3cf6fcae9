//! Tag-based auto-mapping
//!
//! Unconnected inputs carrying tags are wired to the single output whose tag
//! set contains all of the input's tags. Outputs sharing an identical tag set
//! are ambiguous and never used. Conditions look at trigger outputs only;
//! actions also look at outputs of actions declared before them.

use ha_core::ModuleKind;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::connection::Connection;
use crate::managed::ManagedModule;

#[derive(Debug, Clone, PartialEq, Eq)]
struct OutputRef {
    module_id: String,
    output: String,
    /// Declaration position of the producing module
    position: usize,
}

/// Tag set to output index with ambiguous tag sets removed
#[derive(Debug, Default)]
struct TagIndex {
    entries: HashMap<BTreeSet<String>, OutputRef>,
    ambiguous: HashSet<BTreeSet<String>>,
}

impl TagIndex {
    fn build<'a>(modules: impl Iterator<Item = (usize, &'a ManagedModule)>) -> Self {
        let mut index = Self::default();
        for (position, module) in modules {
            let Some(module_type) = &module.module_type else {
                continue;
            };
            for output in module_type.outputs.iter().filter(|o| !o.tags.is_empty()) {
                index.insert(
                    output.tags.clone(),
                    OutputRef {
                        module_id: module.id().to_string(),
                        output: output.name.clone(),
                        position,
                    },
                );
            }
        }
        index
    }

    fn insert(&mut self, tags: BTreeSet<String>, output: OutputRef) {
        if self.ambiguous.contains(&tags) {
            return;
        }
        if self.entries.remove(&tags).is_some() {
            self.ambiguous.insert(tags);
        } else {
            self.entries.insert(tags, output);
        }
    }

    fn candidates<'a>(
        &'a self,
        tags: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a OutputRef> {
        self.entries
            .iter()
            .filter(move |(key, _)| key.is_superset(tags))
            .map(|(_, output)| output)
    }
}

/// A connection created by auto-mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoMapping {
    pub module_id: String,
    pub input: String,
    pub reference: String,
}

/// Connect unconnected tagged inputs; returns the connections made
pub fn auto_map(modules: &mut [ManagedModule]) -> Vec<AutoMapping> {
    let indexed = modules.iter().enumerate();
    let trigger_index =
        TagIndex::build(indexed.clone().filter(|(_, m)| m.kind == ModuleKind::Trigger));
    let action_index =
        TagIndex::build(indexed.filter(|(_, m)| m.kind == ModuleKind::Action));

    let mut mappings = Vec::new();
    for (position, module) in modules.iter_mut().enumerate() {
        if module.kind == ModuleKind::Trigger {
            continue;
        }
        let Some(module_type) = module.module_type.clone() else {
            continue;
        };

        for input in module_type.inputs.iter().filter(|i| !i.tags.is_empty()) {
            if module.is_connected(&input.name) {
                continue;
            }

            let mut candidates: Vec<&OutputRef> = trigger_index.candidates(&input.tags).collect();
            if module.kind == ModuleKind::Action {
                candidates.extend(
                    action_index
                        .candidates(&input.tags)
                        .filter(|output| output.position < position),
                );
            }

            let [target] = candidates.as_slice() else {
                debug!(
                    module_id = %module.id(),
                    input = %input.name,
                    candidates = candidates.len(),
                    "Input not auto-mapped"
                );
                continue;
            };

            let reference = format!("{}.{}", target.module_id, target.output);
            module
                .module
                .inputs
                .insert(input.name.clone(), reference.clone());
            module.connections.insert(Connection::to_output(
                input.name.clone(),
                target.module_id.clone(),
                target.output.clone(),
            ));
            debug!(
                module_id = %module.id(),
                input = %input.name,
                reference = %reference,
                "Auto-mapped input"
            );

            mappings.push(AutoMapping {
                module_id: module.id().to_string(),
                input: input.name.clone(),
                reference,
            });
        }
    }
    mappings
}
