//! Exact-decimal placement geometry.
//!
//! All coordinates are [`BigDecimal`] so that sub-unit routing pitches never
//! round. Records coming from text formats go through [`decimal`], which keeps
//! the decimal digits as written instead of widening them through `f64`.
use bigdecimal::BigDecimal;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A fully-known rectangle: origin plus extent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x: BigDecimal,
    pub y: BigDecimal,
    pub width: BigDecimal,
    pub height: BigDecimal,
}

impl BoundingBox {
    pub fn new(x: BigDecimal, y: BigDecimal, width: BigDecimal, height: BigDecimal) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Coordinate of the right edge (`x + width`).
    pub fn right(&self) -> BigDecimal {
        &self.x + &self.width
    }

    /// Coordinate of the top edge (`y + height`).
    pub fn top(&self) -> BigDecimal {
        &self.y + &self.height
    }
}

/// Geometry as declared by a placement constraint.
///
/// The origin defaults to zero; width and height may be left unset, in which
/// case some constraint kinds derive them from their bound macro.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Geometry {
    pub x: BigDecimal,
    pub y: BigDecimal,
    pub width: Option<BigDecimal>,
    pub height: Option<BigDecimal>,
}

impl Geometry {
    pub fn new(
        x: BigDecimal,
        y: BigDecimal,
        width: Option<BigDecimal>,
        height: Option<BigDecimal>,
    ) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The declared rectangle, or `None` while either dimension is unset.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        Some(BoundingBox::new(
            self.x.clone(),
            self.y.clone(),
            self.width.clone()?,
            self.height.clone()?,
        ))
    }
}

/// Keep-out margins around a placement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Margins {
    #[cfg_attr(feature = "serde", serde(default, with = "decimal"))]
    pub left: BigDecimal,
    #[cfg_attr(feature = "serde", serde(default, with = "decimal"))]
    pub right: BigDecimal,
    #[cfg_attr(feature = "serde", serde(default, with = "decimal"))]
    pub top: BigDecimal,
    #[cfg_attr(feature = "serde", serde(default, with = "decimal"))]
    pub bottom: BigDecimal,
}

impl Margins {
    /// Look a side up by its lowercase name (`left`, `right`, `top`, `bottom`).
    pub fn side(&self, name: &str) -> Option<&BigDecimal> {
        match name {
            "left" => Some(&self.left),
            "right" => Some(&self.right),
            "top" => Some(&self.top),
            "bottom" => Some(&self.bottom),
            _ => None,
        }
    }
}

/// Serde adapters reading decimals from strings, integers or floats and
/// writing them back as strings, so no digit is lost either way.
#[cfg(feature = "serde")]
pub mod decimal {
    use std::{fmt, str::FromStr};

    use bigdecimal::BigDecimal;
    use serde::{
        Deserialize, Serializer,
        de::{self, Deserializer, Visitor},
    };

    struct DecimalVisitor;

    impl<'de> Visitor<'de> for DecimalVisitor {
        type Value = BigDecimal;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a decimal number or a decimal string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<BigDecimal, E> {
            BigDecimal::from_str(v.trim())
                .map_err(|e| E::custom(format!("invalid decimal `{}`: {}", v, e)))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<BigDecimal, E> {
            Ok(BigDecimal::from(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<BigDecimal, E> {
            Ok(BigDecimal::from(v))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<BigDecimal, E> {
            if !v.is_finite() {
                return Err(E::custom(format!("non-finite decimal `{}`", v)));
            }
            // Shortest round-trip form, so `0.1` parses as 0.1 and not its binary expansion.
            self.visit_str(&v.to_string())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigDecimal, D::Error> {
        deserializer.deserialize_any(DecimalVisitor)
    }

    pub fn serialize<S: Serializer>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.normalized().to_string())
    }

    struct Wrapped(BigDecimal);

    impl<'de> Deserialize<'de> for Wrapped {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            super::decimal::deserialize(deserializer).map(Wrapped)
        }
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<BigDecimal>, D::Error> {
            Option::<Wrapped>::deserialize(deserializer).map(|value| value.map(|w| w.0))
        }

        pub fn serialize<S: Serializer>(
            value: &Option<BigDecimal>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }
    }
}
