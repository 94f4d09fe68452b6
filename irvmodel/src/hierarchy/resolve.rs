//! Instance resolution, hierarchical path lookup and module removal.
use std::sync::Arc;

use log::{debug, info, trace};
use petgraph::{Direction, prelude::DiGraphMap};

use crate::{
    hierarchy::{Binding, Hierarchy, Instance, InstanceKey, ModuleKey, ResolutionSummary},
    macros::Macro,
    scanner,
};

/// Node reached by [`Hierarchy::resolve_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathTarget {
    Module(ModuleKey),
    Macro(Arc<Macro>),
    /// An instance whose type is still pending; carries the type name.
    Unresolved(String),
    NotFound,
}

impl PathTarget {
    pub fn module(&self) -> Option<ModuleKey> {
        match self {
            PathTarget::Module(key) => Some(*key),
            _ => None,
        }
    }
}

impl Hierarchy {
    /// Resolution phase: instantiate every module body and bind instances.
    ///
    /// Instances that already exist are re-validated rather than recreated,
    /// so running this again on an unchanged graph changes nothing.
    pub fn resolve_instances(&mut self) -> ResolutionSummary {
        let keys: Vec<ModuleKey> = self.modules.keys().collect();
        for module_key in keys {
            let Some(body) = self.modules[module_key].body.as_deref() else {
                continue;
            };
            let found = scanner::scan_instances(body);
            trace!(
                "Module `{}` instantiates {} children",
                self.modules[module_key].name,
                found.len()
            );

            for (inst_name, type_name) in found {
                let key = match self.modules[module_key].instances.get(&inst_name) {
                    Some(key) => *key,
                    None => {
                        let key = self.instances.insert(Instance {
                            name: inst_name.clone(),
                            type_name: type_name.clone(),
                            parent: module_key,
                            binding: Binding::Pending(type_name),
                        });
                        self.modules[module_key].instances.insert(inst_name, key);
                        key
                    }
                };
                self.resolve_instance(key);
            }
        }

        self.resolve_references();
        let summary = self.summary();
        info!(
            "Resolution pass: {} instances bound, {} pending, {} constraint references pending",
            summary.resolved, summary.pending, summary.pending_references
        );
        summary
    }

    /// Retry every pending instance and constraint reference.
    ///
    /// Pending entries are only retried when this (or a full resolution pass)
    /// runs; adding macros or modules does not trigger it.
    pub fn resolve_pending(&mut self) -> ResolutionSummary {
        let waiting: Vec<InstanceKey> = self.pending.values().flatten().copied().collect();
        debug!("Retrying {} pending instances", waiting.len());
        for key in waiting {
            self.resolve_instance(key);
        }
        self.resolve_references();
        self.summary()
    }

    fn summary(&self) -> ResolutionSummary {
        let pending = self.pending_count();
        ResolutionSummary {
            resolved: self.instances.len() - pending,
            pending,
            pending_references: self
                .constraints
                .values()
                .filter(|c| c.reference().is_some_and(|r| r.binding.is_pending()))
                .count(),
        }
    }

    /// Bind one instance; returns whether it ended up resolved.
    pub(crate) fn resolve_instance(&mut self, key: InstanceKey) -> bool {
        let Some(instance) = self.instances.get(key) else {
            return false;
        };
        let binding = self.bind_type(&instance.type_name, &instance.binding);
        let type_name = instance.type_name.clone();

        if binding.is_pending() {
            self.pending.entry(type_name).or_default().insert(key);
        } else {
            self.unindex_pending(&type_name, key);
        }

        let resolved = !binding.is_pending();
        self.instances[key].binding = binding;
        resolved
    }

    /// Binding for `type_name` given the instance's current binding.
    ///
    /// A still-valid module binding is kept. Otherwise the macro library is
    /// asked first, then the module map.
    fn bind_type(&self, type_name: &str, current: &Binding) -> Binding {
        if let Binding::Module(key) = current {
            if self.defined_module_key(type_name) == Some(*key) {
                return current.clone();
            }
            debug!("Module binding of type `{}` no longer resolves", type_name);
        }

        if let Some(found) = self.macros.get_macro(type_name) {
            return Binding::Macro(found);
        }
        if let Binding::Macro(previous) = current {
            return Binding::Macro(previous.clone());
        }
        if let Some(key) = self.defined_module_key(type_name) {
            return Binding::Module(key);
        }
        Binding::Pending(type_name.to_string())
    }

    /// Walk a `/`-separated path: the first segment names a module, each
    /// following segment an instance of the node reached so far.
    ///
    /// Macros and pending instances have no children, so the walk stops at
    /// them and returns that node even if segments remain.
    pub fn resolve_path(&self, path: &str) -> PathTarget {
        let mut segments = path.split('/').filter(|segment| !segment.is_empty());
        let Some(mut current) = segments.next().and_then(|first| self.module_key(first)) else {
            return PathTarget::NotFound;
        };

        for segment in segments {
            let Some(instance) = self
                .modules
                .get(current)
                .and_then(|module| module.instances.get(segment))
                .and_then(|key| self.instances.get(*key))
            else {
                return PathTarget::NotFound;
            };

            match &instance.binding {
                Binding::Module(key) if self.modules.contains_key(*key) => current = *key,
                Binding::Module(_) => return PathTarget::Unresolved(instance.type_name.clone()),
                Binding::Macro(found) => return PathTarget::Macro(found.clone()),
                Binding::Pending(type_name) => return PathTarget::Unresolved(type_name.clone()),
            }
        }

        PathTarget::Module(current)
    }

    /// Module reached by `path`, if the walk ends on a module.
    pub fn module_by_path(&self, path: &str) -> Option<ModuleKey> {
        self.resolve_path(path).module()
    }

    /// Forget a module and everything it owns.
    ///
    /// Instances elsewhere that were bound to it are re-validated at once and
    /// fall back to pending (or to a macro of the same name).
    pub fn remove_module(&mut self, name: &str) -> bool {
        let Some(key) = self.by_name.remove(name) else {
            return false;
        };
        let Some(module) = self.modules.remove(key) else {
            return false;
        };

        for instance in module.instances.into_values() {
            self.drop_instance(instance);
        }
        for constraint in module.constraints {
            self.constraints.remove(constraint);
        }
        if self.top == Some(key) {
            self.top = None;
        }

        let dependants: Vec<InstanceKey> = self
            .instances
            .iter()
            .filter(|(_, instance)| instance.binding == Binding::Module(key))
            .map(|(key, _)| key)
            .collect();
        for dependant in dependants {
            self.resolve_instance(dependant);
        }
        self.resolve_references();

        info!("Removed module `{}`", name);
        true
    }

    /// Instantiation graph between modules; edge weights count instances.
    pub fn module_graph(&self) -> DiGraphMap<ModuleKey, usize> {
        let mut graph = DiGraphMap::new();
        for key in self.modules.keys() {
            graph.add_node(key);
        }
        for instance in self.instances.values() {
            if let Binding::Module(child) = instance.binding {
                if let Some(weight) = graph.edge_weight_mut(instance.parent, child) {
                    *weight += 1;
                } else {
                    graph.add_edge(instance.parent, child, 1);
                }
            }
        }
        graph
    }

    /// Defined modules that no other module instantiates, in name order.
    pub fn candidate_tops(&self) -> Vec<ModuleKey> {
        let graph = self.module_graph();
        self.modules()
            .filter(|(key, module)| {
                module.is_defined()
                    && graph
                        .neighbors_directed(*key, Direction::Incoming)
                        .all(|parent| parent == *key)
            })
            .map(|(key, _)| key)
            .collect()
    }
}
