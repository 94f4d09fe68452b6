//! Constraint-type registry and record deserialization.
use std::{collections::BTreeMap, fmt, ops::ControlFlow, str::FromStr, sync::Arc};

use log::{debug, info, warn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIs, EnumString};

use crate::{
    constraints::{
        Constraint, ConstraintBody, ConstraintKind, ConstraintRecord, Reference, ReferenceRole,
        params::{self, ParamSpec},
    },
    hierarchy::{ConstraintKey, Hierarchy},
    utils::{Error, ModelResult},
};

/// Builds the type-specific part of a constraint from its record.
pub type ConstraintCtor =
    Arc<dyn Fn(&ConstraintRecord) -> ModelResult<ConstraintBody> + Send + Sync>;

/// What to do with the rest of a batch once a record names an unknown type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIs, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum UnknownConstraintPolicy {
    /// Reject the record and keep going.
    #[default]
    Skip,
    /// Reject the record and stop the batch.
    Abort,
}

#[derive(Clone)]
struct Registered {
    ctor: ConstraintCtor,
    specs: Arc<[ParamSpec]>,
}

/// Outcome of [`PlacementConstraintManager::deserialize_all`].
#[derive(Debug, Default)]
pub struct DeserializeReport {
    pub attached: Vec<ConstraintKey>,
    /// Index of each rejected record in the batch, with its error.
    pub rejected: Vec<(usize, Error)>,
    /// Set when the batch stopped early on an unknown type.
    pub aborted: bool,
    /// Set when the per-record callback broke out of the batch.
    pub interrupted: bool,
}

/// What happened to one record of a batch.
#[derive(Debug, Clone, Copy, EnumIs)]
pub enum RecordOutcome<'a> {
    Attached(ConstraintKey),
    Rejected(&'a Error),
}

/// Maps constraint type tags to constructors.
///
/// [`Default`] registers the five built-in kinds; further kinds can be added
/// with [`PlacementConstraintManager::register`] before any records are read.
#[derive(Clone)]
pub struct PlacementConstraintManager {
    types: BTreeMap<String, Registered>,
}

impl fmt::Debug for PlacementConstraintManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlacementConstraintManager")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for PlacementConstraintManager {
    fn default() -> Self {
        let mut manager = Self::empty();
        for kind in [
            ConstraintKind::TopLevel,
            ConstraintKind::Obstruction,
            ConstraintKind::Overlap,
        ] {
            manager.register(kind.to_string(), Vec::new(), move |_| {
                Ok(ConstraintBody::plain(kind))
            });
        }
        manager.register(
            ConstraintKind::Hierarchical.to_string(),
            params::hierarchical_params(),
            hierarchical,
        );
        manager.register(
            ConstraintKind::HardMacro.to_string(),
            params::macro_params(),
            hardmacro,
        );
        manager
    }
}

fn hierarchical(record: &ConstraintRecord) -> ModelResult<ConstraintBody> {
    let master = record
        .master
        .as_deref()
        .map(str::trim)
        .filter(|master| !master.is_empty())
        .ok_or_else(|| Error::MissingField {
            field: "master",
            path: record.path.clone(),
        })?;
    Ok(ConstraintBody::referencing(
        ConstraintKind::Hierarchical,
        Reference::new(master, ReferenceRole::Master),
    ))
}

fn hardmacro(record: &ConstraintRecord) -> ModelResult<ConstraintBody> {
    Ok(ConstraintBody::referencing(
        ConstraintKind::HardMacro,
        Reference::new(record.path.clone(), ReferenceRole::Macro),
    ))
}

impl PlacementConstraintManager {
    /// A manager with no registered types.
    pub fn empty() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// Register a constructor for `tag`, replacing any previous one.
    ///
    /// `extra_params` are appended after the parameters shared by every kind.
    pub fn register<F>(&mut self, tag: impl Into<String>, extra_params: Vec<ParamSpec>, ctor: F)
    where
        F: Fn(&ConstraintRecord) -> ModelResult<ConstraintBody> + Send + Sync + 'static,
    {
        let tag = tag.into().to_ascii_lowercase();
        debug!("Registered constraint type `{}`", tag);
        self.types.insert(
            tag,
            Registered {
                ctor: Arc::new(ctor),
                specs: params::spec_table(extra_params),
            },
        );
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.types.contains_key(&tag.to_ascii_lowercase())
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Build a constraint without attaching it.
    pub fn construct(&self, record: &ConstraintRecord) -> ModelResult<Constraint> {
        let tag = record.type_tag.trim().to_ascii_lowercase();
        let registered = self
            .types
            .get(&tag)
            .ok_or_else(|| Error::UnknownConstraintType {
                tag: record.type_tag.clone(),
                path: record.path.clone(),
            })?;

        let mut body = (registered.ctor)(record)?;
        if ConstraintKind::from_str(&tag).is_err() {
            body.kind = ConstraintKind::Other;
        }
        Ok(Constraint::new(
            record.clone(),
            body,
            registered.specs.clone(),
        ))
    }

    /// Build a constraint from `record` and attach it to its owning module.
    ///
    /// Either the whole constraint is attached or nothing changes.
    pub fn deserialize(
        &self,
        record: &ConstraintRecord,
        hierarchy: &mut Hierarchy,
    ) -> ModelResult<ConstraintKey> {
        let constraint = self.construct(record)?;
        hierarchy.attach_constraint(constraint)
    }

    /// Deserialize a batch in order.
    ///
    /// Every failing record is rejected on its own. Under
    /// [`UnknownConstraintPolicy::Abort`] an unknown type tag also stops the
    /// batch; the records attached before it stay attached.
    pub fn deserialize_all<'a>(
        &self,
        records: impl IntoIterator<Item = &'a ConstraintRecord>,
        hierarchy: &mut Hierarchy,
        policy: UnknownConstraintPolicy,
    ) -> DeserializeReport {
        self.deserialize_all_with(records, hierarchy, policy, |_, _, _, _| {
            ControlFlow::Continue(())
        })
    }

    /// [`Self::deserialize_all`], calling `on_record` after every record with
    /// the hierarchy as it stands. Returning [`ControlFlow::Break`] stops the
    /// batch and sets [`DeserializeReport::interrupted`].
    pub fn deserialize_all_with<'a, F>(
        &self,
        records: impl IntoIterator<Item = &'a ConstraintRecord>,
        hierarchy: &mut Hierarchy,
        policy: UnknownConstraintPolicy,
        mut on_record: F,
    ) -> DeserializeReport
    where
        F: FnMut(&Hierarchy, usize, &ConstraintRecord, RecordOutcome<'_>) -> ControlFlow<()>,
    {
        let mut report = DeserializeReport::default();
        for (index, record) in records.into_iter().enumerate() {
            let flow = match self.deserialize(record, hierarchy) {
                Ok(key) => {
                    report.attached.push(key);
                    on_record(&*hierarchy, index, record, RecordOutcome::Attached(key))
                }
                Err(e) => {
                    warn!("Rejected placement constraint #{}: {}", index, e);
                    let flow = on_record(&*hierarchy, index, record, RecordOutcome::Rejected(&e));
                    let stop = policy.is_abort() && e.is_unknown_constraint_type();
                    report.rejected.push((index, e));
                    if stop {
                        report.aborted = true;
                        break;
                    }
                    flow
                }
            };
            if flow.is_break() {
                report.interrupted = true;
                break;
            }
        }
        info!(
            "Attached {} placement constraints, rejected {}",
            report.attached.len(),
            report.rejected.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use bigdecimal::BigDecimal;

    use super::*;
    use crate::{
        constraints::{ConstraintExt, params::{Param, ParamType, ParamValue}},
        macros::Macro,
    };

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn design() -> Hierarchy {
        let mut hierarchy = Hierarchy::default();
        hierarchy.register_source(
            Path::new("top.sv"),
            "module top(); leaf u_leaf(); sram u_mem(); endmodule\nmodule leaf(); endmodule",
        );
        hierarchy.resolve_instances();
        hierarchy
    }

    #[test]
    fn unknown_type_is_rejected_without_attaching() {
        let manager = PlacementConstraintManager::default();
        let mut hierarchy = design();
        let top = hierarchy.module_key("top").unwrap();

        let err = manager
            .deserialize(&ConstraintRecord::new("top/u_leaf", "bogus"), &mut hierarchy)
            .unwrap_err();
        assert!(err.is_unknown_constraint_type());
        assert!(hierarchy.module(top).unwrap().constraints().is_empty());
        assert_eq!(hierarchy.constraint_count(), 0);
    }

    #[test]
    fn overwrite_appends_and_replaces_path_entry() {
        let manager = PlacementConstraintManager::default();
        let mut hierarchy = design();
        let record = ConstraintRecord::new("top/u_leaf", "obstruction");

        let first = manager.deserialize(&record, &mut hierarchy).unwrap();
        let second = manager.deserialize(&record, &mut hierarchy).unwrap();

        let top = hierarchy.module_by_name("top").unwrap();
        assert_eq!(top.constraints(), &[first, second]);
        assert_eq!(top.constraint_at("top/u_leaf"), Some(second));
        assert_eq!(top.constraint_index(second), Some(1));
    }

    #[test]
    fn toplevel_fills_the_slot() {
        let manager = PlacementConstraintManager::default();
        let mut hierarchy = design();
        let key = manager
            .deserialize(&ConstraintRecord::new("top", "TopLevel"), &mut hierarchy)
            .unwrap();

        let top = hierarchy.module_by_name("top").unwrap();
        assert_eq!(top.toplevel_constraint(), Some(key));
        assert!(hierarchy.constraint(key).unwrap().kind().is_top_level());
    }

    #[test]
    fn hierarchical_requires_master() {
        let manager = PlacementConstraintManager::default();
        let mut hierarchy = design();
        let err = manager
            .deserialize(&ConstraintRecord::new("top/u_leaf", "hierarchical"), &mut hierarchy)
            .unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "master", .. }));
        assert_eq!(hierarchy.constraint_count(), 0);
    }

    #[test]
    fn hardmacro_takes_footprint_until_overridden() {
        let manager = PlacementConstraintManager::default();
        let mut hierarchy = design();
        let record = ConstraintRecord::new("top/u_mem", "hardmacro").with_position(dec("0"), dec("0"));
        let key = manager.deserialize(&record, &mut hierarchy).unwrap();
        assert_eq!(hierarchy.constraint(key).unwrap().effective_size(), (None, None));

        hierarchy.macros_mut().insert(Macro::new("sram", dec("12"), dec("6.4")));
        hierarchy.resolve_pending();
        assert_eq!(
            hierarchy.constraint(key).unwrap().effective_size(),
            (Some(dec("12")), Some(dec("6.4")))
        );

        let explicit = record.with_size(dec("14"), dec("7"));
        let key = manager.deserialize(&explicit, &mut hierarchy).unwrap();
        assert_eq!(
            hierarchy.constraint(key).unwrap().effective_size(),
            (Some(dec("14")), Some(dec("7")))
        );
    }

    #[test]
    fn abort_policy_stops_at_unknown_type() {
        let manager = PlacementConstraintManager::default();
        let records = [
            ConstraintRecord::new("top", "toplevel"),
            ConstraintRecord::new("top/u_leaf", "bogus"),
            ConstraintRecord::new("top/u_leaf", "overlap"),
        ];

        let mut skipping = design();
        let report = manager.deserialize_all(&records, &mut skipping, UnknownConstraintPolicy::Skip);
        assert_eq!((report.attached.len(), report.rejected.len(), report.aborted), (2, 1, false));

        let mut aborting = design();
        let report = manager.deserialize_all(&records, &mut aborting, UnknownConstraintPolicy::Abort);
        assert_eq!((report.attached.len(), report.rejected.len(), report.aborted), (1, 1, true));
        assert_eq!(report.rejected[0].0, 1);
    }

    #[test]
    fn callback_sees_each_record_and_can_stop_the_batch() {
        let manager = PlacementConstraintManager::default();
        let records = [
            ConstraintRecord::new("top", "toplevel"),
            ConstraintRecord::new("top/u_leaf", "bogus"),
            ConstraintRecord::new("top/u_leaf", "overlap"),
            ConstraintRecord::new("top/u_leaf", "obstruction"),
        ];

        let mut hierarchy = design();
        let mut seen = Vec::new();
        let report = manager.deserialize_all_with(
            &records,
            &mut hierarchy,
            UnknownConstraintPolicy::Skip,
            |hierarchy, index, record, outcome| {
                seen.push((index, record.type_tag.clone(), outcome.is_attached(), hierarchy.constraint_count()));
                if index == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        );

        assert_eq!(
            seen,
            [
                (0, "toplevel".to_string(), true, 1),
                (1, "bogus".to_string(), false, 1),
                (2, "overlap".to_string(), true, 2),
            ]
        );
        assert!(report.interrupted);
        assert!(!report.aborted);
        assert_eq!((report.attached.len(), report.rejected.len()), (2, 1));
        assert_eq!(hierarchy.constraint_count(), 2);
    }

    #[derive(Debug)]
    struct Blockage {
        layer: String,
    }

    impl ConstraintExt for Blockage {
        fn params(&self, _record: &ConstraintRecord) -> Vec<Param> {
            vec![Param {
                name: "Layer".into(),
                ty: ParamType::Str,
                value: Some(ParamValue::Str(self.layer.clone())),
                children: Vec::new(),
            }]
        }
    }

    #[test]
    fn registered_extension_is_constructed() {
        let mut manager = PlacementConstraintManager::default();
        manager.register(
            "routing_blockage",
            Vec::new(),
            |_| {
                Ok(ConstraintBody::plain(ConstraintKind::Other).with_extension(Arc::new(Blockage {
                    layer: "M3".into(),
                })))
            },
        );
        assert!(manager.is_registered("Routing_Blockage"));

        let mut hierarchy = design();
        let key = manager
            .deserialize(&ConstraintRecord::new("top/u_leaf", "routing_blockage"), &mut hierarchy)
            .unwrap();
        let constraint = hierarchy.constraint(key).unwrap();
        assert!(constraint.kind().is_other());
        assert_eq!(
            constraint.param("Layer").unwrap().value,
            Some(ParamValue::Str("M3".into()))
        );
        let blockage = constraint
            .extension()
            .and_then(|ext| ext.downcast_ref::<Blockage>())
            .unwrap();
        assert_eq!(blockage.layer, "M3");
    }
}
