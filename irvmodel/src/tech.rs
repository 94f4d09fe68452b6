//! Technology stackup and routing-grid alignment.
//!
//! A [`Stackup`] is an ordered list of [`TechMetalLayer`]s, each carrying a
//! preferred routing direction and a pitch. [`check_alignment`] decides whether
//! a placement rectangle sits on every layer's grid:
//!
//! - horizontal layers constrain the vertical edges (`x` and `x + width`),
//! - vertical layers constrain the horizontal edges (`y` and `y + height`).
//!
//! Everything is computed with [`BigDecimal`] remainders, so a `0.05` pitch
//! never produces a spurious failure from binary rounding.
use std::str::FromStr;

use bigdecimal::{BigDecimal, Zero};
use log::trace;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIs, EnumString, IntoStaticStr};

use crate::{
    geometry::BoundingBox,
    utils::{Error, ModelResult},
};

/// Preferred routing direction of a metal layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    Horizontal,
    Vertical,
}

/// A routing layer of the technology. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TechMetalLayer {
    name: String,
    direction: Direction,
    pitch: BigDecimal,
}

impl TechMetalLayer {
    /// Build a layer, rejecting zero or negative pitches.
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        pitch: BigDecimal,
    ) -> ModelResult<Self> {
        let name = name.into();
        if pitch <= BigDecimal::zero() {
            return Err(Error::InvalidPitch {
                layer: name,
                pitch: pitch.to_string(),
            });
        }
        Ok(Self {
            name,
            direction,
            pitch,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn pitch(&self) -> &BigDecimal {
        &self.pitch
    }

    /// Whether `value` lies exactly on this layer's grid.
    pub fn on_grid(&self, value: &BigDecimal) -> bool {
        (value % &self.pitch).is_zero()
    }

    /// Whether both edges constrained by this layer's direction are on grid.
    pub fn aligns(&self, bbox: &BoundingBox) -> bool {
        match self.direction {
            Direction::Horizontal => self.on_grid(&bbox.x) && self.on_grid(&bbox.right()),
            Direction::Vertical => self.on_grid(&bbox.y) && self.on_grid(&bbox.top()),
        }
    }
}

/// Metal layer as it appears in a technology description, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct MetalLayerRecord {
    pub name: String,
    pub direction: String,
    #[cfg_attr(feature = "serde", serde(with = "crate::geometry::decimal"))]
    pub pitch: BigDecimal,
}

impl TryFrom<&MetalLayerRecord> for TechMetalLayer {
    type Error = Error;

    fn try_from(record: &MetalLayerRecord) -> ModelResult<Self> {
        let direction = Direction::from_str(record.direction.trim())
            .map_err(|_| Error::UnknownDirection(record.direction.clone()))?;
        TechMetalLayer::new(record.name.clone(), direction, record.pitch.clone())
    }
}

/// Ordered set of routing layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stackup {
    layers: Vec<TechMetalLayer>,
}

impl Stackup {
    pub fn new(layers: Vec<TechMetalLayer>) -> Self {
        Self { layers }
    }

    /// Validate a list of layer records. The first invalid record aborts.
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a MetalLayerRecord>,
    ) -> ModelResult<Self> {
        let layers = records
            .into_iter()
            .map(TechMetalLayer::try_from)
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[TechMetalLayer] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&TechMetalLayer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Outcome of a grid-alignment check.
#[derive(Debug, Clone, Default, PartialEq, Eq, EnumIs)]
pub enum Alignment {
    /// The check could not run: no layers loaded yet, or geometry still incomplete.
    #[default]
    Unknown,
    /// Every layer of the stackup accepts the rectangle.
    Aligned,
    /// Names of every layer whose grid the rectangle misses.
    Misaligned(Vec<String>),
}

impl Alignment {
    /// Failing layer names; empty unless [`Alignment::Misaligned`].
    pub fn failing_layers(&self) -> &[String] {
        match self {
            Alignment::Misaligned(layers) => layers,
            _ => &[],
        }
    }
}

/// Check `bbox` against every layer of `stackup`.
///
/// Returns [`Alignment::Unknown`] while no layer is loaded, whether the
/// stackup is missing or attached without layers.
pub fn check_alignment(bbox: &BoundingBox, stackup: Option<&Stackup>) -> Alignment {
    let Some(stackup) = stackup.filter(|stackup| !stackup.is_empty()) else {
        return Alignment::Unknown;
    };

    let failing: Vec<String> = stackup
        .layers()
        .iter()
        .filter(|layer| !layer.aligns(bbox))
        .map(|layer| layer.name().to_string())
        .collect();

    trace!(
        "Alignment of ({}, {}, {}, {}) against {} layers: {} failing",
        bbox.x,
        bbox.y,
        bbox.width,
        bbox.height,
        stackup.layers().len(),
        failing.len()
    );

    if failing.is_empty() {
        Alignment::Aligned
    } else {
        Alignment::Misaligned(failing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn bbox(x: &str, y: &str, w: &str, h: &str) -> BoundingBox {
        BoundingBox::new(dec(x), dec(y), dec(w), dec(h))
    }

    fn horizontal(pitch: &str) -> Stackup {
        Stackup::new(vec![
            TechMetalLayer::new("M2", Direction::Horizontal, dec(pitch)).unwrap(),
        ])
    }

    #[test]
    fn aligned_on_exact_multiples() {
        let stackup = horizontal("0.2");
        assert_eq!(
            check_alignment(&bbox("0", "0.13", "0.4", "1"), Some(&stackup)),
            Alignment::Aligned
        );
    }

    #[test]
    fn misaligned_reports_failing_layer() {
        let stackup = horizontal("0.2");
        let verdict = check_alignment(&bbox("1.1", "0", "0.4", "1"), Some(&stackup));
        assert!(verdict.is_misaligned());
        assert_eq!(verdict.failing_layers(), ["M2".to_string()]);
    }

    #[test]
    fn unknown_without_stackup() {
        assert_eq!(
            check_alignment(&bbox("0", "0", "1", "1"), None),
            Alignment::Unknown
        );
    }

    #[test]
    fn unknown_with_layerless_stackup() {
        let stackup = Stackup::new(Vec::new());
        assert!(stackup.is_empty());
        assert_eq!(
            check_alignment(&bbox("1.1", "0", "0.4", "1"), Some(&stackup)),
            Alignment::Unknown
        );
    }

    #[test]
    fn sub_unit_pitch_does_not_round() {
        // 0.1 + 0.2 lands on a 0.3 grid only with exact arithmetic.
        let stackup = Stackup::new(vec![
            TechMetalLayer::new("M3", Direction::Vertical, dec("0.3")).unwrap(),
        ]);
        assert!(check_alignment(&bbox("7", "0.3", "1", "0.3"), Some(&stackup)).is_aligned());
        assert!(check_alignment(&bbox("7", "0.1", "1", "0.2"), Some(&stackup)).is_misaligned());
    }

    #[test]
    fn only_relevant_edges_are_checked() {
        let stackup = Stackup::new(vec![
            TechMetalLayer::new("M1", Direction::Horizontal, dec("0.5")).unwrap(),
            TechMetalLayer::new("M2", Direction::Vertical, dec("0.25")).unwrap(),
        ]);
        let verdict = check_alignment(&bbox("1", "0.1", "2.5", "1"), Some(&stackup));
        assert_eq!(verdict.failing_layers(), ["M2".to_string()]);
    }

    #[test]
    fn rejects_non_positive_pitch_and_bad_direction() {
        assert!(
            TechMetalLayer::new("M1", Direction::Vertical, dec("0"))
                .unwrap_err()
                .is_invalid_pitch()
        );

        let record = MetalLayerRecord {
            name: "M4".into(),
            direction: "diagonal".into(),
            pitch: dec("1"),
        };
        assert!(
            TechMetalLayer::try_from(&record)
                .unwrap_err()
                .is_unknown_direction()
        );
    }

    #[test]
    fn records_parse_direction_case_insensitively() {
        let records = [MetalLayerRecord {
            name: "M5".into(),
            direction: "Vertical".into(),
            pitch: dec("0.08"),
        }];
        let stackup = Stackup::from_records(&records).unwrap();
        assert_eq!(stackup.layer("M5").unwrap().direction(), Direction::Vertical);
    }
}
