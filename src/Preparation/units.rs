//! Volume and mass unit conversions.
//!
//! Canonical units inside the calculator are millilitres for volumes and
//! milligrams for masses. User-facing tags that are not recognised are passed
//! through unchanged.
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeUnit {
    Millilitre,
    Microlitre,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MassUnit {
    Milligram,
    Gram,
    Microgram,
}

impl VolumeUnit {
    /// accepts both the micro sign (U+00B5) and the greek mu (U+03BC)
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "ml" | "mL" | "ML" => Some(VolumeUnit::Millilitre),
            "µl" | "µL" | "μl" | "μL" | "ul" | "uL" => Some(VolumeUnit::Microlitre),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeUnit::Millilitre => "ml",
            VolumeUnit::Microlitre => "µl",
        }
    }

    pub fn to_ml(&self, value: f64) -> f64 {
        match self {
            VolumeUnit::Millilitre => value,
            VolumeUnit::Microlitre => value / 1000.0,
        }
    }

    pub fn from_ml(&self, value_ml: f64) -> f64 {
        match self {
            VolumeUnit::Millilitre => value_ml,
            VolumeUnit::Microlitre => value_ml * 1000.0,
        }
    }
}

impl MassUnit {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "mg" => Some(MassUnit::Milligram),
            "g" => Some(MassUnit::Gram),
            "µg" | "μg" | "ug" => Some(MassUnit::Microgram),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MassUnit::Milligram => "mg",
            MassUnit::Gram => "g",
            MassUnit::Microgram => "µg",
        }
    }

    pub fn to_mg(&self, value: f64) -> f64 {
        match self {
            MassUnit::Milligram => value,
            MassUnit::Gram => value * 1000.0,
            MassUnit::Microgram => value / 1000.0,
        }
    }

    pub fn from_mg(&self, value_mg: f64) -> f64 {
        match self {
            MassUnit::Milligram => value_mg,
            MassUnit::Gram => value_mg / 1000.0,
            MassUnit::Microgram => value_mg * 1000.0,
        }
    }
}

/// converts a tagged volume to millilitres; unknown tags leave the value as is
pub fn volume_to_ml(value: f64, tag: &str) -> f64 {
    match VolumeUnit::from_tag(tag) {
        Some(unit) => unit.to_ml(value),
        None => {
            debug!("unknown volume unit '{}', value {} kept unchanged", tag, value);
            value
        }
    }
}

/// converts a tagged mass to milligrams; unknown tags leave the value as is
pub fn mass_to_mg(value: f64, tag: &str) -> f64 {
    match MassUnit::from_tag(tag) {
        Some(unit) => unit.to_mg(value),
        None => {
            debug!("unknown mass unit '{}', value {} kept unchanged", tag, value);
            value
        }
    }
}

pub fn ml_to_ul(value_ml: f64) -> f64 {
    VolumeUnit::Microlitre.from_ml(value_ml)
}

pub fn ul_to_ml(value_ul: f64) -> f64 {
    VolumeUnit::Microlitre.to_ml(value_ul)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_volume_to_ml() {
        assert_relative_eq!(volume_to_ml(250.0, "µl"), 0.25);
        assert_relative_eq!(volume_to_ml(250.0, "μl"), 0.25);
        assert_relative_eq!(volume_to_ml(250.0, "ul"), 0.25);
        assert_relative_eq!(volume_to_ml(2.5, "ml"), 2.5);
    }

    #[test]
    fn test_mass_to_mg() {
        assert_relative_eq!(mass_to_mg(0.002, "g"), 2.0);
        assert_relative_eq!(mass_to_mg(1500.0, "µg"), 1.5);
        assert_relative_eq!(mass_to_mg(3.2, "mg"), 3.2);
    }

    #[test]
    fn test_unknown_tags_pass_through() {
        assert_eq!(volume_to_ml(7.0, "gallon"), 7.0);
        assert_eq!(mass_to_mg(7.0, "oz"), 7.0);
        assert_eq!(volume_to_ml(7.0, ""), 7.0);
    }

    #[test]
    fn test_from_canonical() {
        assert_relative_eq!(ml_to_ul(0.125), 125.0);
        assert_relative_eq!(ul_to_ml(125.0), 0.125);
        assert_relative_eq!(MassUnit::Gram.from_mg(2500.0), 2.5);
        assert_relative_eq!(MassUnit::Microgram.from_mg(0.5), 500.0);
        assert_eq!(VolumeUnit::from_tag(" mL "), Some(VolumeUnit::Millilitre));
        assert_eq!(MassUnit::from_tag("kg"), None);
    }
}
