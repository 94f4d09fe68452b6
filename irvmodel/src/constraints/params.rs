//! Typed parameter trees describing a constraint to its consumers.
//!
//! Each constraint kind declares a tree of [`ParamSpec`]s. A leaf names its
//! value source with a [`FieldDescriptor`]: either a record attribute read
//! directly, or a function computing the value. The tree is resolved into
//! [`Param`] values once, when the constraint is built or its geometry changes.
use std::{fmt, sync::Arc};

use bigdecimal::BigDecimal;
use strum::{Display, EnumIs};

use crate::{constraints::ConstraintRecord, hierarchy::Binding};

/// A resolved parameter value.
#[derive(Debug, Clone, PartialEq, Eq, EnumIs)]
pub enum ParamValue {
    Str(String),
    Decimal(BigDecimal),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Decimal(d) => write!(f, "{}", d),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ParamType {
    Str,
    Decimal,
    Group,
}

impl ParamType {
    /// Value of an attribute the record leaves unset.
    pub fn default_value(self) -> Option<ParamValue> {
        match self {
            ParamType::Str => Some(ParamValue::Str(String::new())),
            ParamType::Decimal => Some(ParamValue::Decimal(BigDecimal::from(0))),
            ParamType::Group => None,
        }
    }
}

/// What parameter getters read from.
#[derive(Debug, Clone, Copy)]
pub struct ParamSource<'a> {
    pub record: &'a ConstraintRecord,
    /// Binding of the constraint's reference, if it has one.
    pub binding: Option<&'a Binding>,
}

impl<'a> ParamSource<'a> {
    pub fn new(record: &'a ConstraintRecord, binding: Option<&'a Binding>) -> Self {
        Self { record, binding }
    }
}

/// Computes a value; the second argument is the leaf name.
pub type ComputedField = fn(&ParamSource<'_>, &str) -> ParamValue;

/// Where a leaf parameter reads its value from.
#[derive(Clone, Copy)]
pub enum FieldDescriptor {
    Direct(&'static str),
    Computed(ComputedField),
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDescriptor::Direct(name) => f.debug_tuple("Direct").field(name).finish(),
            FieldDescriptor::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl FieldDescriptor {
    fn resolve(&self, source: &ParamSource<'_>, name: &str, ty: ParamType) -> Option<ParamValue> {
        match self {
            FieldDescriptor::Direct(attribute) => source
                .record
                .attribute(attribute)
                .or_else(|| ty.default_value()),
            FieldDescriptor::Computed(compute) => Some(compute(source, name)),
        }
    }
}

/// Declarative shape of one parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub getter: Option<FieldDescriptor>,
    pub children: Vec<ParamSpec>,
}

impl ParamSpec {
    pub fn group(name: &'static str, children: Vec<ParamSpec>) -> Self {
        Self {
            name,
            ty: ParamType::Group,
            getter: None,
            children,
        }
    }

    pub fn field(name: &'static str, ty: ParamType, getter: FieldDescriptor) -> Self {
        Self {
            name,
            ty,
            getter: Some(getter),
            children: Vec::new(),
        }
    }

    pub fn direct(name: &'static str, ty: ParamType, attribute: &'static str) -> Self {
        Self::field(name, ty, FieldDescriptor::Direct(attribute))
    }

    pub fn computed(name: &'static str, ty: ParamType, compute: ComputedField) -> Self {
        Self::field(name, ty, FieldDescriptor::Computed(compute))
    }
}

/// A resolved parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
    pub value: Option<ParamValue>,
    pub children: Vec<Param>,
}

impl Param {
    /// Find a descendant by a `/`-separated name path, e.g. `Constraint/Position/x`.
    pub fn lookup(&self, path: &str) -> Option<&Param> {
        let mut current = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.children.iter().find(|child| child.name == segment)?;
        }
        Some(current)
    }
}

/// Find a top-level parameter group by name, then descend.
pub fn lookup<'a>(params: &'a [Param], path: &str) -> Option<&'a Param> {
    let (head, rest) = path.split_once('/').unwrap_or((path, ""));
    params
        .iter()
        .find(|param| param.name == head)
        .and_then(|param| param.lookup(rest))
}

/// Resolve every spec against `source`.
pub fn build_params(specs: &[ParamSpec], source: &ParamSource<'_>) -> Vec<Param> {
    specs
        .iter()
        .map(|spec| Param {
            name: spec.name.to_string(),
            ty: spec.ty,
            value: spec
                .getter
                .as_ref()
                .and_then(|getter| getter.resolve(source, spec.name, spec.ty)),
            children: build_params(&spec.children, source),
        })
        .collect()
}

fn margin_value(source: &ParamSource<'_>, side: &str) -> ParamValue {
    let value = source
        .record
        .margins
        .as_ref()
        .and_then(|margins| margins.side(&side.to_ascii_lowercase()).cloned())
        .unwrap_or_default();
    ParamValue::Decimal(value)
}

/// Parameters shared by every constraint kind.
pub fn base_params() -> Vec<ParamSpec> {
    vec![ParamSpec::group(
        "Constraint",
        vec![
            ParamSpec::direct("Path", ParamType::Str, "path"),
            ParamSpec::direct("Type", ParamType::Str, "type"),
            ParamSpec::group(
                "Position",
                vec![
                    ParamSpec::direct("x", ParamType::Decimal, "x"),
                    ParamSpec::direct("y", ParamType::Decimal, "y"),
                ],
            ),
            ParamSpec::group(
                "Dimensions",
                vec![
                    ParamSpec::direct("Width", ParamType::Decimal, "width"),
                    ParamSpec::direct("Height", ParamType::Decimal, "height"),
                ],
            ),
            ParamSpec::group(
                "Margins",
                ["Left", "Right", "Top", "Bottom"]
                    .into_iter()
                    .map(|side| ParamSpec::computed(side, ParamType::Decimal, margin_value))
                    .collect(),
            ),
        ],
    )]
}

pub fn hierarchical_params() -> Vec<ParamSpec> {
    vec![ParamSpec::group(
        "Hierarchical",
        vec![ParamSpec::direct("Master", ParamType::Str, "master")],
    )]
}

fn macro_file(source: &ParamSource<'_>, _: &str) -> ParamValue {
    let file = match source.binding {
        Some(Binding::Macro(found)) => found
            .source
            .as_ref()
            .map(|path| path.display().to_string()),
        _ => None,
    };
    ParamValue::Str(file.unwrap_or_default())
}

pub fn macro_params() -> Vec<ParamSpec> {
    vec![ParamSpec::group(
        "Macro",
        vec![ParamSpec::computed("LEF File", ParamType::Str, macro_file)],
    )]
}

/// Base parameters followed by `extra`, shared between constraints of a kind.
pub fn spec_table(extra: Vec<ParamSpec>) -> Arc<[ParamSpec]> {
    base_params().into_iter().chain(extra).collect()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::{geometry::Margins, macros::Macro};

    #[test]
    fn direct_fields_default_when_unset() {
        let record = ConstraintRecord::new("top/u_core", "obstruction")
            .with_position(BigDecimal::from(3), BigDecimal::from_str("1.5").unwrap());
        let params = build_params(&base_params(), &ParamSource::new(&record, None));

        assert_eq!(
            lookup(&params, "Constraint/Position/y").unwrap().value,
            Some(ParamValue::Decimal(BigDecimal::from_str("1.5").unwrap()))
        );
        assert_eq!(
            lookup(&params, "Constraint/Dimensions/Width").unwrap().value,
            Some(ParamValue::Decimal(BigDecimal::from(0)))
        );
        assert_eq!(
            lookup(&params, "Constraint/Type").unwrap().value,
            Some(ParamValue::Str("obstruction".into()))
        );
    }

    #[test]
    fn margins_are_computed_per_side() {
        let mut record = ConstraintRecord::new("top", "toplevel");
        record.margins = Some(Margins {
            left: BigDecimal::from(1),
            right: BigDecimal::from(2),
            top: BigDecimal::from(3),
            bottom: BigDecimal::from(4),
        });
        let params = build_params(&base_params(), &ParamSource::new(&record, None));

        let bottom = lookup(&params, "Constraint/Margins/Bottom").unwrap();
        assert_eq!(bottom.value, Some(ParamValue::Decimal(BigDecimal::from(4))));
        assert!(lookup(&params, "Constraint/Margins").unwrap().value.is_none());
    }

    #[test]
    fn macro_file_follows_binding() {
        let record = ConstraintRecord::new("top/u_mem", "hardmacro");
        let mut sram = Macro::new("sram", BigDecimal::from(4), BigDecimal::from(2));
        sram.source = Some("libs/sram.lef".into());
        let binding = Binding::Macro(Arc::new(sram));

        let bound = build_params(&macro_params(), &ParamSource::new(&record, Some(&binding)));
        assert_eq!(
            lookup(&bound, "Macro/LEF File").unwrap().value,
            Some(ParamValue::Str("libs/sram.lef".into()))
        );

        let pending = Binding::Pending("sram".into());
        let unbound = build_params(&macro_params(), &ParamSource::new(&record, Some(&pending)));
        assert_eq!(
            lookup(&unbound, "Macro/LEF File").unwrap().value,
            Some(ParamValue::Str(String::new()))
        );
    }

    #[test]
    fn groups_carry_no_value() {
        let record = ConstraintRecord::default();
        let params = build_params(&hierarchical_params(), &ParamSource::new(&record, None));
        assert_eq!(params[0].ty, ParamType::Group);
        assert_eq!(
            params[0].lookup("Master").unwrap().value,
            Some(ParamValue::Str(String::new()))
        );
    }
}
