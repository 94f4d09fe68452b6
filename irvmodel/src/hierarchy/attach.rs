//! Constraint attachment, reference binding and alignment bookkeeping.
use log::{debug, trace};

use crate::{
    constraints::{Constraint, Reference, ReferenceRole},
    geometry::Geometry,
    hierarchy::{Binding, ConstraintKey, Hierarchy, ModuleKey, resolve::PathTarget},
    tech::{self, Alignment, Stackup},
    utils::{Error, ModelResult},
};

/// Verdict counts after re-checking every constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentSummary {
    pub aligned: usize,
    pub misaligned: usize,
    pub unknown: usize,
}

impl Hierarchy {
    /// Store `constraint` and attach it to the module named by the first
    /// segment of its path, creating a placeholder module if needed.
    ///
    /// Nothing is stored when the path has no module segment.
    pub(crate) fn attach_constraint(&mut self, constraint: Constraint) -> ModelResult<ConstraintKey> {
        let owner_name = constraint
            .path()
            .split('/')
            .find(|segment| !segment.is_empty())
            .ok_or_else(|| Error::InvalidPath(constraint.path().to_string()))?
            .to_string();

        let owner = self.module_or_placeholder(&owner_name);
        let path = constraint.path().to_string();
        let kind = constraint.kind();
        constraint.set_owner(owner);

        let key = self.constraints.insert(constraint);
        self.modules[owner].add_constraint(key, &path, kind);
        self.resolve_reference(key);
        self.refresh_alignment(key);

        debug!("Attached {} constraint `{}` to module `{}`", kind, path, owner_name);
        Ok(key)
    }

    /// Drop every attached constraint. Modules, instances, macros and the
    /// stackup are kept, so a new constraint batch starts from a clean slate.
    pub fn clear_constraints(&mut self) {
        let dropped = self.constraints.len();
        self.constraints.clear();
        for module in self.modules.values_mut() {
            module.clear_constraints();
        }
        debug!("Cleared {} constraints", dropped);
    }

    pub fn constraint(&self, key: ConstraintKey) -> Option<&Constraint> {
        self.constraints.get(key)
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// Constraints of `module` in attachment order.
    pub fn constraints_of(
        &self,
        module: ModuleKey,
    ) -> impl Iterator<Item = (ConstraintKey, &Constraint)> + '_ {
        self.modules
            .get(module)
            .map(|module| module.constraints.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|key| self.constraints.get(*key).map(|c| (*key, c)))
    }

    /// Replace the declared geometry of a constraint and re-check it.
    pub fn set_constraint_geometry(
        &mut self,
        key: ConstraintKey,
        geometry: Geometry,
    ) -> ModelResult<&Alignment> {
        self.constraints
            .get_mut(key)
            .ok_or(Error::UnknownConstraint)?
            .set_geometry(geometry);
        self.refresh_alignment(key);
        Ok(self.constraints[key].alignment())
    }

    /// Attach (or detach) technology data and re-check every constraint.
    pub fn set_stackup(&mut self, stackup: Option<Stackup>) -> AlignmentSummary {
        self.stackup = stackup;
        self.check_alignment_all()
    }

    /// Re-run the alignment check of every constraint.
    pub fn check_alignment_all(&mut self) -> AlignmentSummary {
        let keys: Vec<ConstraintKey> = self.constraints.keys().collect();
        let mut summary = AlignmentSummary::default();
        for key in keys {
            match self.refresh_alignment(key) {
                Alignment::Aligned => summary.aligned += 1,
                Alignment::Misaligned(_) => summary.misaligned += 1,
                Alignment::Unknown => summary.unknown += 1,
            }
        }
        debug!(
            "Alignment: {} aligned, {} misaligned, {} unknown",
            summary.aligned, summary.misaligned, summary.unknown
        );
        summary
    }

    /// Constraints whose reference is still pending.
    pub fn pending_reference_count(&self) -> usize {
        self.constraints
            .values()
            .filter(|c| c.reference().is_some_and(|r| r.binding.is_pending()))
            .count()
    }

    fn refresh_alignment(&mut self, key: ConstraintKey) -> &Alignment {
        let alignment = match self.constraints[key].effective_bbox() {
            Some(bbox) => tech::check_alignment(&bbox, self.stackup.as_ref()),
            None => Alignment::Unknown,
        };
        let constraint = &mut self.constraints[key];
        constraint.set_alignment(alignment);
        constraint.alignment()
    }

    pub(crate) fn resolve_references(&mut self) {
        let keys: Vec<ConstraintKey> = self
            .constraints
            .iter()
            .filter(|(_, c)| c.reference().is_some())
            .map(|(key, _)| key)
            .collect();
        for key in keys {
            self.resolve_reference(key);
        }
    }

    /// Re-bind the reference of one constraint; returns whether it is bound.
    pub(crate) fn resolve_reference(&mut self, key: ConstraintKey) -> bool {
        let Some(binding) = self
            .constraints
            .get(key)
            .and_then(Constraint::reference)
            .map(|reference| self.bind_reference(reference))
        else {
            return false;
        };

        let resolved = !binding.is_pending();
        if self.constraints[key].set_binding(binding) {
            trace!("Reference of constraint `{}` rebound", self.constraints[key].path());
            self.refresh_alignment(key);
        }
        resolved
    }

    fn bind_reference(&self, reference: &Reference) -> Binding {
        let target = reference.target.as_str();
        match reference.role {
            ReferenceRole::Master => self.bind_master(target),
            ReferenceRole::Macro => self.bind_placed_macro(target),
        }
    }

    /// A master is a module, by path or by name, falling back to a macro.
    fn bind_master(&self, target: &str) -> Binding {
        if target.contains('/') {
            return match self.resolve_path(target) {
                PathTarget::Module(key) if self.modules[key].is_defined() => Binding::Module(key),
                PathTarget::Macro(found) => Binding::Macro(found),
                PathTarget::Unresolved(type_name) => self
                    .macros
                    .get_macro(&type_name)
                    .map(Binding::Macro)
                    .unwrap_or_else(|| Binding::Pending(target.to_string())),
                _ => Binding::Pending(target.to_string()),
            };
        }

        if let Some(key) = self.defined_module_key(target) {
            return Binding::Module(key);
        }
        self.macros
            .get_macro(target)
            .map(Binding::Macro)
            .unwrap_or_else(|| Binding::Pending(target.to_string()))
    }

    /// A placed macro is found by walking its path, falling back to the
    /// library entry named after the leaf segment.
    fn bind_placed_macro(&self, path: &str) -> Binding {
        let leaf = path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(path);

        match self.resolve_path(path) {
            PathTarget::Macro(found) => Binding::Macro(found),
            PathTarget::Unresolved(type_name) => self
                .macros
                .get_macro(&type_name)
                .or_else(|| self.macros.get_macro(leaf))
                .map(Binding::Macro)
                .unwrap_or(Binding::Pending(type_name)),
            PathTarget::Module(_) | PathTarget::NotFound => self
                .macros
                .get_macro(leaf)
                .map(Binding::Macro)
                .unwrap_or_else(|| Binding::Pending(leaf.to_string())),
        }
    }
}
