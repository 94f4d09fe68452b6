//! Module/instance graph of a design.
//!
//! The [`Hierarchy`] owns every [`Module`], [`Instance`] and
//! [`Constraint`](crate::constraints::Constraint) in slot-map arenas and hands
//! out stable keys; nothing in the graph points back at its owner through a
//! reference. The graph is built in two phases:
//!
//! 1. *Discovery* registers module definitions scanned out of source files.
//!    Redefining a name keeps its key, so constraints and parents stay wired.
//! 2. *Resolution* creates the instances of every module body and binds each
//!    one to a macro or a module. Whatever cannot be bound yet stays
//!    [`Binding::Pending`] and is indexed by type name until a later pass.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use either::Either;
use log::{debug, info, warn};
use slotmap::{SlotMap, new_key_type};
use strum::EnumIs;

use crate::{
    constraints::{Constraint, ConstraintKind},
    macros::{Macro, MacroLibrary},
    scanner::{self, ScannedModule},
    tech::Stackup,
    utils::{Error, ModelResult},
};

pub mod attach;
pub mod resolve;

new_key_type! {
    /// Stable key of a [`Module`].
    pub struct ModuleKey;

    /// Stable key of an [`Instance`].
    pub struct InstanceKey;

    /// Stable key of a placement constraint.
    pub struct ConstraintKey;
}

/// What an instance or a constraint reference is bound to.
#[derive(Debug, Clone, PartialEq, Eq, EnumIs)]
pub enum Binding {
    /// A module defined in source text.
    Module(ModuleKey),
    /// A physical macro from the macro library.
    Macro(Arc<Macro>),
    /// Nothing matches this name yet.
    Pending(String),
}

/// A named occurrence of a module or macro inside a parent module's body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    name: String,
    type_name: String,
    parent: ModuleKey,
    binding: Binding,
}

impl Instance {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type name exactly as written in the instantiation.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn parent(&self) -> ModuleKey {
        self.parent
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }
}

/// A design block and the placement constraints attached to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    name: String,
    file: Option<PathBuf>,
    body: Option<String>,
    instances: BTreeMap<String, InstanceKey>,

    // Attachment order, append-only even when a path is overwritten.
    constraints: Vec<ConstraintKey>,
    constraint_indices: HashMap<ConstraintKey, usize>,
    constraints_by_path: BTreeMap<String, ConstraintKey>,
    toplevel: Option<ConstraintKey>,
    hierarchical: Vec<ConstraintKey>,
}

impl Module {
    fn placeholder(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File of the definition; `None` for a placeholder.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Whether a definition was scanned for this module.
    ///
    /// Placeholders are created when a constraint names a module before any
    /// source file defining it has been scanned.
    pub fn is_defined(&self) -> bool {
        self.body.is_some()
    }

    pub fn instances(&self) -> impl Iterator<Item = (&str, InstanceKey)> {
        self.instances.iter().map(|(name, key)| (name.as_str(), *key))
    }

    pub fn instance(&self, name: &str) -> Option<InstanceKey> {
        self.instances.get(name).copied()
    }

    /// Constraints attached since the last clear, in attachment order.
    pub fn constraints(&self) -> &[ConstraintKey] {
        &self.constraints
    }

    /// Position of `key` in [`Module::constraints`].
    pub fn constraint_index(&self, key: ConstraintKey) -> Option<usize> {
        self.constraint_indices.get(&key).copied()
    }

    /// The latest constraint attached at `path`.
    pub fn constraint_at(&self, path: &str) -> Option<ConstraintKey> {
        self.constraints_by_path.get(path).copied()
    }

    pub fn constraint_paths(&self) -> impl Iterator<Item = (&str, ConstraintKey)> {
        self.constraints_by_path
            .iter()
            .map(|(path, key)| (path.as_str(), *key))
    }

    pub fn toplevel_constraint(&self) -> Option<ConstraintKey> {
        self.toplevel
    }

    pub fn hierarchical_constraints(&self) -> &[ConstraintKey] {
        &self.hierarchical
    }

    pub(crate) fn add_constraint(&mut self, key: ConstraintKey, path: &str, kind: ConstraintKind) {
        self.constraints_by_path.insert(path.to_string(), key);
        self.constraint_indices.insert(key, self.constraints.len());
        self.constraints.push(key);

        match kind {
            ConstraintKind::TopLevel => self.toplevel = Some(key),
            ConstraintKind::Hierarchical => self.hierarchical.push(key),
            _ => {}
        }
    }

    pub(crate) fn clear_constraints(&mut self) {
        self.constraints.clear();
        self.constraint_indices.clear();
        self.constraints_by_path.clear();
        self.toplevel = None;
        self.hierarchical.clear();
    }
}

/// Result of registering one scanned definition.
#[derive(Debug, Clone, PartialEq, Eq, EnumIs)]
pub enum Registration {
    /// First definition of this name (including filling a placeholder).
    New(ModuleKey),
    /// The same file defined this name again.
    Reloaded(ModuleKey),
    /// Another file already defined this name; the new definition wins.
    Redefined {
        key: ModuleKey,
        previous_file: PathBuf,
    },
}

impl Registration {
    pub fn key(&self) -> ModuleKey {
        match self {
            Registration::New(key) | Registration::Reloaded(key) => *key,
            Registration::Redefined { key, .. } => *key,
        }
    }
}

/// Counts after a resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub resolved: usize,
    pub pending: usize,
    pub pending_references: usize,
}

/// Outcome of a batch discovery + resolution.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub registrations: Vec<Registration>,
    /// Files that could not be read; the batch went on without them.
    pub skipped: Vec<(PathBuf, Error)>,
    pub resolution: ResolutionSummary,
}

/// Owner of the whole design graph.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    modules: SlotMap<ModuleKey, Module>,
    by_name: BTreeMap<String, ModuleKey>,
    instances: SlotMap<InstanceKey, Instance>,
    pending: BTreeMap<String, BTreeSet<InstanceKey>>,
    constraints: SlotMap<ConstraintKey, Constraint>,
    macros: MacroLibrary,
    stackup: Option<Stackup>,
    top: Option<ModuleKey>,
}

impl Hierarchy {
    pub fn new(macros: MacroLibrary) -> Self {
        Self {
            macros,
            ..Self::default()
        }
    }

    pub fn macros(&self) -> &MacroLibrary {
        &self.macros
    }

    /// Mutable access to the macro library. Bindings only pick up new macros
    /// on the next resolution pass.
    pub fn macros_mut(&mut self) -> &mut MacroLibrary {
        &mut self.macros
    }

    pub fn module(&self, key: ModuleKey) -> Option<&Module> {
        self.modules.get(key)
    }

    pub fn module_key(&self, name: &str) -> Option<ModuleKey> {
        self.by_name.get(name).copied()
    }

    pub fn module_by_name(&self, name: &str) -> Option<&Module> {
        self.module_key(name).and_then(|key| self.modules.get(key))
    }

    /// Key of a module that has a scanned definition.
    pub(crate) fn defined_module_key(&self, name: &str) -> Option<ModuleKey> {
        self.module_key(name)
            .filter(|key| self.modules.get(*key).is_some_and(Module::is_defined))
    }

    /// All modules, in name order.
    pub fn modules(&self) -> impl Iterator<Item = (ModuleKey, &Module)> {
        self.by_name
            .values()
            .filter_map(|key| self.modules.get(*key).map(|module| (*key, module)))
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn instance(&self, key: InstanceKey) -> Option<&Instance> {
        self.instances.get(key)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Type names that currently have instances waiting for a definition.
    pub fn pending_types(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    /// Instances waiting for `type_name`.
    pub fn pending_instances(&self, type_name: &str) -> impl Iterator<Item = InstanceKey> + '_ {
        match self.pending.get(type_name) {
            Some(waiting) => Either::Left(waiting.iter().copied()),
            None => Either::Right(std::iter::empty()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(BTreeSet::len).sum()
    }

    pub fn top_module(&self) -> Option<ModuleKey> {
        self.top.filter(|key| self.modules.contains_key(*key))
    }

    pub fn set_top_module(&mut self, key: Option<ModuleKey>) {
        self.top = key;
    }

    /// Select the top-level module by name.
    pub fn set_top_module_by_name(&mut self, name: &str) -> ModelResult<ModuleKey> {
        let key = self
            .module_key(name)
            .ok_or_else(|| Error::UnknownModule(name.to_string()))?;
        info!("Top-level module set to `{}`", name);
        self.top = Some(key);
        Ok(key)
    }

    pub fn stackup(&self) -> Option<&Stackup> {
        self.stackup.as_ref()
    }

    /// Register one scanned definition; last write wins.
    ///
    /// A redefinition keeps the module key. Its instances are discarded only
    /// when the body text actually changed, so re-scanning an unchanged file
    /// leaves the graph as it was.
    pub fn register_scanned(&mut self, scanned: ScannedModule) -> Registration {
        let ScannedModule { name, file, body } = scanned;

        let Some(key) = self.module_key(&name) else {
            let key = self.modules.insert(Module {
                name: name.clone(),
                file: Some(file),
                body: Some(body),
                ..Module::default()
            });
            self.by_name.insert(name, key);
            return Registration::New(key);
        };

        let module = &mut self.modules[key];
        let previous_file = module.file.replace(file.clone());
        let stale = if module.body.as_deref() != Some(body.as_str()) {
            module.body = Some(body);
            std::mem::take(&mut module.instances)
        } else {
            BTreeMap::new()
        };
        for instance in stale.into_values() {
            self.drop_instance(instance);
        }

        match previous_file {
            None => Registration::New(key),
            Some(previous) if previous == file => Registration::Reloaded(key),
            Some(previous) => {
                warn!(
                    "Module `{}` from `{}` replaces the definition from `{}`",
                    name,
                    file.display(),
                    previous.display()
                );
                Registration::Redefined {
                    key,
                    previous_file: previous,
                }
            }
        }
    }

    /// Discover every module defined in `content`.
    pub fn register_source(&mut self, file: &Path, content: &str) -> Vec<Registration> {
        scanner::scan_modules(file, content)
            .into_iter()
            .map(|scanned| self.register_scanned(scanned))
            .collect()
    }

    /// Read and discover one source file.
    pub fn register_file(&mut self, file: &Path) -> ModelResult<Vec<Registration>> {
        let content = std::fs::read_to_string(file).map_err(|source| Error::SourceRead {
            file: file.to_path_buf(),
            source,
        })?;
        let registrations = self.register_source(file, &content);
        debug!(
            "Registered {} modules from `{}`",
            registrations.len(),
            file.display()
        );
        Ok(registrations)
    }

    /// Discover an ordered list of files, then resolve instances.
    ///
    /// Unreadable files are skipped and reported.
    pub fn register_modules_from_files<P: AsRef<Path>>(
        &mut self,
        files: impl IntoIterator<Item = P>,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for file in files {
            let file = file.as_ref();
            match self.register_file(file) {
                Ok(registrations) => report.registrations.extend(registrations),
                Err(e) => {
                    warn!("Skipping source file: {}", e);
                    report.skipped.push((file.to_path_buf(), e));
                }
            }
        }
        report.resolution = self.resolve_instances();
        report
    }

    /// Discover every file under `directory` with `extension`, then resolve.
    pub fn register_modules_from_directory(
        &mut self,
        directory: &Path,
        extension: &str,
    ) -> DiscoveryReport {
        let files = scanner::source_files_in(directory, extension);
        info!(
            "Found {} `.{}` files under `{}`",
            files.len(),
            extension,
            directory.display()
        );
        self.register_modules_from_files(files)
    }

    /// Module for the first segment of a constraint path, creating an
    /// undefined placeholder when no definition has been scanned yet.
    pub(crate) fn module_or_placeholder(&mut self, name: &str) -> ModuleKey {
        if let Some(key) = self.module_key(name) {
            return key;
        }
        debug!("Creating placeholder module `{}`", name);
        let key = self.modules.insert(Module::placeholder(name.to_string()));
        self.by_name.insert(name.to_string(), key);
        key
    }

    fn drop_instance(&mut self, key: InstanceKey) {
        if let Some(instance) = self.instances.remove(key) {
            self.unindex_pending(&instance.type_name, key);
        }
    }

    fn unindex_pending(&mut self, type_name: &str, key: InstanceKey) {
        if let Some(waiting) = self.pending.get_mut(type_name) {
            waiting.remove(&key);
            if waiting.is_empty() {
                self.pending.remove(type_name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redefinition_keeps_key_and_reports_previous_file() {
        let mut hierarchy = Hierarchy::default();
        let first = hierarchy.register_source(Path::new("a.sv"), "module core(); endmodule");
        let second = hierarchy.register_source(Path::new("b.sv"), "module core(); alu u0(); endmodule");

        assert!(first[0].is_new());
        assert_eq!(
            second[0],
            Registration::Redefined {
                key: first[0].key(),
                previous_file: PathBuf::from("a.sv"),
            }
        );
        assert_eq!(hierarchy.module_count(), 1);
        assert_eq!(
            hierarchy.module_by_name("core").unwrap().file(),
            Some(Path::new("b.sv"))
        );
    }

    #[test]
    fn same_file_reload_is_reported_as_reload() {
        let mut hierarchy = Hierarchy::default();
        hierarchy.register_source(Path::new("a.sv"), "module core(); endmodule");
        let again = hierarchy.register_source(Path::new("a.sv"), "module core(); endmodule");
        assert!(again[0].is_reloaded());
    }

    #[test]
    fn placeholder_is_filled_by_later_definition() {
        let mut hierarchy = Hierarchy::default();
        let placeholder = hierarchy.module_or_placeholder("late");
        assert!(!hierarchy.module(placeholder).unwrap().is_defined());
        assert!(hierarchy.defined_module_key("late").is_none());

        let registered = hierarchy.register_source(Path::new("late.sv"), "module late(); endmodule");
        assert_eq!(registered, vec![Registration::New(placeholder)]);
        assert!(hierarchy.module(placeholder).unwrap().is_defined());
    }

    #[test]
    fn unknown_top_module_is_an_error() {
        let mut hierarchy = Hierarchy::default();
        assert!(
            hierarchy
                .set_top_module_by_name("chip")
                .unwrap_err()
                .is_unknown_module()
        );
    }
}
