//! Placement constraints attached to modules of the hierarchy.
//!
//! A constraint binds a hierarchical path to a rectangle and a placement
//! semantic. Constraints are built from flat [`ConstraintRecord`]s by the
//! [`PlacementConstraintManager`](manager::PlacementConstraintManager) and
//! stored in the [`Hierarchy`](crate::hierarchy::Hierarchy) arena; the module
//! named by the first path segment owns them.
use std::{fmt, sync::Arc};

use bigdecimal::BigDecimal;
use downcast_rs::{DowncastSync, impl_downcast};
use once_cell::sync::OnceCell;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIs, EnumString, IntoStaticStr};

use crate::{
    geometry::{BoundingBox, Geometry, Margins},
    hierarchy::{Binding, ModuleKey},
    tech::Alignment,
};

pub mod manager;
pub mod params;

use params::{Param, ParamSource, ParamSpec, ParamValue};

/// Placement semantic of a constraint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIs, EnumString, Display, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConstraintKind {
    /// Outline of the top-level module.
    TopLevel,
    /// Placement of a child mirroring a master module.
    Hierarchical,
    Obstruction,
    Overlap,
    /// Placement of a fixed-size macro.
    HardMacro,
    /// Kinds registered by extensions.
    Other,
}

/// A constraint as produced by a configuration reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct ConstraintRecord {
    pub path: String,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub type_tag: String,
    #[cfg_attr(
        feature = "serde",
        serde(
            default,
            skip_serializing_if = "Option::is_none",
            with = "crate::geometry::decimal::option"
        )
    )]
    pub x: Option<BigDecimal>,
    #[cfg_attr(
        feature = "serde",
        serde(
            default,
            skip_serializing_if = "Option::is_none",
            with = "crate::geometry::decimal::option"
        )
    )]
    pub y: Option<BigDecimal>,
    #[cfg_attr(
        feature = "serde",
        serde(
            default,
            skip_serializing_if = "Option::is_none",
            with = "crate::geometry::decimal::option"
        )
    )]
    pub width: Option<BigDecimal>,
    #[cfg_attr(
        feature = "serde",
        serde(
            default,
            skip_serializing_if = "Option::is_none",
            with = "crate::geometry::decimal::option"
        )
    )]
    pub height: Option<BigDecimal>,
    /// Master module of a hierarchical constraint.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub master: Option<String>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub margins: Option<Margins>,
}

impl ConstraintRecord {
    pub fn new(path: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            type_tag: type_tag.into(),
            ..Self::default()
        }
    }

    pub fn with_position(mut self, x: BigDecimal, y: BigDecimal) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn with_size(mut self, width: BigDecimal, height: BigDecimal) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_master(mut self, master: impl Into<String>) -> Self {
        self.master = Some(master.into());
        self
    }

    /// Declared geometry; an unset origin is zero.
    pub fn geometry(&self) -> Geometry {
        Geometry::new(
            self.x.clone().unwrap_or_default(),
            self.y.clone().unwrap_or_default(),
            self.width.clone(),
            self.height.clone(),
        )
    }

    /// Attribute by its record field name, `None` when unset or unknown.
    pub fn attribute(&self, name: &str) -> Option<ParamValue> {
        let decimal = |value: &Option<BigDecimal>| value.clone().map(ParamValue::Decimal);
        match name {
            "path" => Some(ParamValue::Str(self.path.clone())),
            "type" => Some(ParamValue::Str(self.type_tag.clone())),
            "x" => decimal(&self.x),
            "y" => decimal(&self.y),
            "width" => decimal(&self.width),
            "height" => decimal(&self.height),
            "master" => self.master.clone().map(ParamValue::Str),
            _ => None,
        }
    }

    /// Keep the record in step with geometry edited after construction.
    pub(crate) fn set_geometry(&mut self, geometry: &Geometry) {
        self.x = Some(geometry.x.clone());
        self.y = Some(geometry.y.clone());
        self.width = geometry.width.clone();
        self.height = geometry.height.clone();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIs, Display)]
pub enum ReferenceRole {
    /// Module mirrored by a hierarchical constraint.
    Master,
    /// Macro placed by a hard-macro constraint.
    Macro,
}

/// An outgoing reference of a constraint and what it is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: String,
    pub role: ReferenceRole,
    pub binding: Binding,
}

impl Reference {
    pub fn new(target: impl Into<String>, role: ReferenceRole) -> Self {
        let target = target.into();
        Self {
            binding: Binding::Pending(target.clone()),
            target,
            role,
        }
    }
}

/// Behaviour contributed by constraint types registered outside this crate.
pub trait ConstraintExt: DowncastSync + fmt::Debug {
    /// Extra parameter groups appended after the declared ones.
    fn params(&self, _record: &ConstraintRecord) -> Vec<Param> {
        Vec::new()
    }
}
impl_downcast!(sync ConstraintExt);

/// What a constructor produces from a record.
#[derive(Debug, Clone)]
pub struct ConstraintBody {
    pub kind: ConstraintKind,
    pub reference: Option<Reference>,
    pub extension: Option<Arc<dyn ConstraintExt>>,
}

impl ConstraintBody {
    pub fn plain(kind: ConstraintKind) -> Self {
        Self {
            kind,
            reference: None,
            extension: None,
        }
    }

    pub fn referencing(kind: ConstraintKind, reference: Reference) -> Self {
        Self {
            kind,
            reference: Some(reference),
            extension: None,
        }
    }

    pub fn with_extension(mut self, extension: Arc<dyn ConstraintExt>) -> Self {
        self.extension = Some(extension);
        self
    }
}

/// A placement constraint stored in the hierarchy.
#[derive(Debug, Clone)]
pub struct Constraint {
    path: String,
    type_tag: String,
    kind: ConstraintKind,
    geometry: Geometry,
    margins: Option<Margins>,
    owner: OnceCell<ModuleKey>,
    reference: Option<Reference>,
    alignment: Alignment,
    record: ConstraintRecord,
    param_specs: Arc<[ParamSpec]>,
    params: Vec<Param>,
    extension: Option<Arc<dyn ConstraintExt>>,
}

impl Constraint {
    pub(crate) fn new(
        record: ConstraintRecord,
        body: ConstraintBody,
        param_specs: Arc<[ParamSpec]>,
    ) -> Self {
        let mut constraint = Self {
            path: record.path.clone(),
            type_tag: record.type_tag.clone(),
            kind: body.kind,
            geometry: record.geometry(),
            margins: record.margins.clone(),
            owner: OnceCell::new(),
            reference: body.reference,
            alignment: Alignment::Unknown,
            record,
            param_specs,
            params: Vec::new(),
            extension: body.extension,
        };
        constraint.rebuild_params();
        constraint
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The type tag as written in the record.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    /// Geometry as declared, before any macro footprint is applied.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn margins(&self) -> Option<&Margins> {
        self.margins.as_ref()
    }

    /// Owning module; set once when the constraint is attached.
    pub fn owner(&self) -> Option<ModuleKey> {
        self.owner.get().copied()
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    pub fn alignment(&self) -> &Alignment {
        &self.alignment
    }

    pub fn failing_layers(&self) -> &[String] {
        self.alignment.failing_layers()
    }

    pub fn record(&self) -> &ConstraintRecord {
        &self.record
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn param(&self, path: &str) -> Option<&Param> {
        params::lookup(&self.params, path)
    }

    pub fn extension(&self) -> Option<&Arc<dyn ConstraintExt>> {
        self.extension.as_ref()
    }

    /// Width and height in effect.
    ///
    /// Hard macros without an explicit dimension use their bound macro's
    /// footprint; a declared value always takes precedence.
    pub fn effective_size(&self) -> (Option<BigDecimal>, Option<BigDecimal>) {
        let footprint = match (&self.kind, &self.reference) {
            (
                ConstraintKind::HardMacro,
                Some(Reference {
                    binding: Binding::Macro(found),
                    ..
                }),
            ) => Some(found),
            _ => None,
        };

        let width = self
            .geometry
            .width
            .clone()
            .or_else(|| footprint.map(|m| m.size_x.clone()));
        let height = self
            .geometry
            .height
            .clone()
            .or_else(|| footprint.map(|m| m.size_y.clone()));
        (width, height)
    }

    /// Rectangle in effect, or `None` while a dimension is still unknown.
    pub fn effective_bbox(&self) -> Option<BoundingBox> {
        let (width, height) = self.effective_size();
        Some(BoundingBox::new(
            self.geometry.x.clone(),
            self.geometry.y.clone(),
            width?,
            height?,
        ))
    }

    pub(crate) fn set_owner(&self, owner: ModuleKey) -> bool {
        self.owner.set(owner).is_ok()
    }

    pub(crate) fn set_binding(&mut self, binding: Binding) -> bool {
        let Some(reference) = self.reference.as_mut() else {
            return false;
        };
        if reference.binding == binding {
            return false;
        }
        reference.binding = binding;
        self.rebuild_params();
        true
    }

    pub(crate) fn set_geometry(&mut self, geometry: Geometry) {
        self.record.set_geometry(&geometry);
        self.geometry = geometry;
        self.rebuild_params();
    }

    pub(crate) fn set_alignment(&mut self, alignment: Alignment) {
        self.alignment = alignment;
    }

    fn rebuild_params(&mut self) {
        let source = ParamSource::new(
            &self.record,
            self.reference.as_ref().map(|reference| &reference.binding),
        );
        let mut params = params::build_params(&self.param_specs, &source);
        if let Some(extension) = &self.extension {
            params.extend(extension.params(&self.record));
        }
        self.params = params;
    }
}
