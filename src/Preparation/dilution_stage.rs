//! One dilution step: draw a volume from a source solution and top it up with
//! diluent to reach a target concentration and volume.
//!
//! The working solution is made with this step from the stock solution, or,
//! when an intermediate dilution is needed, the step is applied twice
//! (stock -> intermediate, intermediate -> working solution).
use crate::Preparation::errors::DstError;
use crate::Preparation::stock_stage::WORKING_DILUTION_RATIO;
use crate::Preparation::warnings::{Warning, WarningKind};
use crate::protocol_config::ProtocolConfig;
use serde::{Deserialize, Serialize};

/// Relative size below which a volume difference is rounding noise. A stock at
/// exactly the working concentration gives a top-up of about -1e-16 ml.
pub const VOLUME_TOLERANCE: f64 = 1e-9;

/// what the step has to produce
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DilutionTarget {
    pub conc_ug_per_ml: f64,
    pub vol_ml: f64,
}

/// what the step draws from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DilutionSource {
    pub conc_ug_per_ml: f64,
    pub total_vol_ml: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DilutionOutcome {
    pub target: DilutionTarget,
    pub draw_vol_ml: f64,
    pub topup_vol_ml: f64,
    /// source left after the draw; negative shortfall when the draw exceeds supply
    pub leftover_vol_ml: f64,
    /// naive top-up was negative and the draw was clamped to the target volume
    pub clamped: bool,
    pub exceeds_supply: bool,
}

/// target working solution concentration in µg/ml
pub fn working_concentration_ug_per_ml(critical_conc_mg_per_ml: f64) -> f64 {
    critical_conc_mg_per_ml * WORKING_DILUTION_RATIO
}

/// working solution needed for `num_tubes` MGIT tubes, including the pipetting-loss margin
pub fn working_volume_ml(num_tubes: u32, config: &ProtocolConfig) -> f64 {
    config.ml_per_tube * num_tubes as f64 + config.dead_volume_ml
}

/// largest tube count whose working volume the source can cover without a negative top-up
pub fn max_tubes_for_source(source_conc_ug_per_ml: f64, working_conc_ug_per_ml: f64, config: &ProtocolConfig) -> u32 {
    let ratio = source_conc_ug_per_ml / working_conc_ug_per_ml;
    let tubes = ((ratio - config.dead_volume_ml) / config.ml_per_tube + VOLUME_TOLERANCE).floor();
    if tubes.is_finite() && tubes > 0.0 {
        tubes as u32
    } else {
        0
    }
}

/// Performs the step. Clamping and supply shortfall are reported through the
/// outcome flags, only a zero source concentration is an error. A negative
/// top-up within [`VOLUME_TOLERANCE`] of the target volume is set to zero
/// without flagging a clamp.
pub fn dilute(target: DilutionTarget, source: DilutionSource) -> Result<DilutionOutcome, DstError> {
    if source.conc_ug_per_ml == 0.0 || !source.conc_ug_per_ml.is_finite() {
        return Err(DstError::DivisionByZero("draw volume"));
    }
    let mut draw_vol_ml = target.vol_ml * target.conc_ug_per_ml / source.conc_ug_per_ml;
    let mut topup_vol_ml = target.vol_ml - draw_vol_ml;
    let clamped = topup_vol_ml < -VOLUME_TOLERANCE * target.vol_ml.abs();
    if topup_vol_ml < 0.0 {
        draw_vol_ml = target.vol_ml;
        topup_vol_ml = 0.0;
    }
    Ok(DilutionOutcome {
        target,
        draw_vol_ml,
        topup_vol_ml,
        leftover_vol_ml: source.total_vol_ml - draw_vol_ml,
        clamped,
        exceeds_supply: draw_vol_ml - source.total_vol_ml
            > VOLUME_TOLERANCE * source.total_vol_ml.abs(),
    })
}

impl DilutionOutcome {
    /// warnings for clamping and supply shortfall; `source_label` names the solution drawn from
    pub fn warnings(&self, drug_name: &str, source_label: &str, max_tubes: Option<u32>) -> Vec<Warning> {
        let mut warnings = Vec::new();
        if self.clamped {
            let hint = match max_tubes {
                Some(0) => format!(" The {} is too dilute for any MGIT tube.", source_label),
                Some(n) => format!(" Maximum recommended tubes: {}.", n),
                None => String::new(),
            };
            warnings.push(Warning::new(
                drug_name,
                WarningKind::NegativeTopUp,
                format!(
                    "{}: {} concentration is too low for the requested working solution; the diluent volume would be negative. Using {:.3} ml of {} with no diluent.{}",
                    drug_name, source_label, self.draw_vol_ml, source_label, hint
                ),
            ));
        }
        if self.exceeds_supply {
            warnings.push(Warning::new(
                drug_name,
                WarningKind::DrawExceedsSupply,
                format!(
                    "{}: draw exceeds available supply; {:.3} ml of {} needed but only {:.3} ml available (shortfall {:.3} ml).",
                    drug_name,
                    self.draw_vol_ml,
                    source_label,
                    self.draw_vol_ml + self.leftover_vol_ml,
                    -self.leftover_vol_ml
                ),
            ));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_working_concentration_is_84_times_cc() {
        assert_eq!(working_concentration_ug_per_ml(1.0), 84.0);
        assert_relative_eq!(working_concentration_ug_per_ml(0.25), 21.0);
        assert_relative_eq!(working_concentration_ug_per_ml(1.0), 1.0 * 8.4 / 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_working_volume_canonical_constants() {
        let config = ProtocolConfig::default();
        assert_relative_eq!(working_volume_ml(10, &config), 1.2, epsilon = 1e-12);
        assert_relative_eq!(working_volume_ml(0, &config), 0.2, epsilon = 1e-12);
        let legacy = ProtocolConfig::legacy();
        assert_relative_eq!(working_volume_ml(10, &legacy), 1.56, epsilon = 1e-12);
    }

    #[test]
    fn test_mass_balance_without_clamping() {
        let target = DilutionTarget {
            conc_ug_per_ml: 84.0,
            vol_ml: 1.2,
        };
        let source = DilutionSource {
            conc_ug_per_ml: 336.0,
            total_vol_ml: 5.0,
        };
        let out = dilute(target, source).unwrap();
        assert!(!out.clamped);
        assert!(!out.exceeds_supply);
        assert_relative_eq!(out.draw_vol_ml, 0.3, epsilon = 1e-12);
        assert_relative_eq!(out.topup_vol_ml, 0.9, epsilon = 1e-12);
        assert_relative_eq!(out.draw_vol_ml + out.topup_vol_ml, target.vol_ml, epsilon = 1e-12);
        assert_relative_eq!(out.leftover_vol_ml, 4.7, epsilon = 1e-12);
        assert!(out.warnings("RIF", "stock solution", None).is_empty());
    }

    #[test]
    fn test_under_concentrated_source_is_clamped() {
        let target = DilutionTarget {
            conc_ug_per_ml: 84.0,
            vol_ml: 1.2,
        };
        let source = DilutionSource {
            conc_ug_per_ml: 60.0,
            total_vol_ml: 5.0,
        };
        let out = dilute(target, source).unwrap();
        assert!(out.clamped);
        assert_eq!(out.topup_vol_ml, 0.0);
        assert_eq!(out.draw_vol_ml, 1.2);
        assert_relative_eq!(out.leftover_vol_ml, 3.8, epsilon = 1e-12);
        let warnings = out.warnings("INH", "stock solution", Some(0));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::NegativeTopUp);
        assert_eq!(warnings[0].drug_name, "INH");
        assert!(warnings[0].message.contains("INH"));
    }

    #[test]
    fn test_draw_exceeding_supply() {
        let target = DilutionTarget {
            conc_ug_per_ml: 84.0,
            vol_ml: 2.2,
        };
        let source = DilutionSource {
            conc_ug_per_ml: 126.0,
            total_vol_ml: 1.0,
        };
        let out = dilute(target, source).unwrap();
        assert!(!out.clamped);
        assert!(out.exceeds_supply);
        assert_relative_eq!(out.draw_vol_ml, 2.2 * 84.0 / 126.0, epsilon = 1e-12);
        assert!(out.leftover_vol_ml < 0.0);
        let warnings = out.warnings("AMK", "stock solution", None);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::DrawExceedsSupply);
    }

    #[test]
    fn test_zero_source_concentration() {
        let target = DilutionTarget {
            conc_ug_per_ml: 84.0,
            vol_ml: 1.2,
        };
        let source = DilutionSource {
            conc_ug_per_ml: 0.0,
            total_vol_ml: 1.0,
        };
        assert!(matches!(
            dilute(target, source),
            Err(DstError::DivisionByZero(_))
        ));
    }

    #[test]
    fn test_source_at_working_strength_is_not_clamped() {
        // stock one rounding step off the working concentration, either side
        let stock_conc = 84.0 * (1.0 + f64::EPSILON);
        for tubes in 1..=30 {
            let vol_ml = working_volume_ml(tubes, &ProtocolConfig::default());
            let out = dilute(
                DilutionTarget {
                    conc_ug_per_ml: 84.0,
                    vol_ml,
                },
                DilutionSource {
                    conc_ug_per_ml: 84.0 / (1.0 + f64::EPSILON),
                    total_vol_ml: vol_ml,
                },
            )
            .unwrap();
            assert!(!out.clamped, "clamped at {} tubes", tubes);
            assert!(!out.exceeds_supply, "short at {} tubes", tubes);
            assert_eq!(out.topup_vol_ml, 0.0);
            assert_eq!(out.draw_vol_ml, vol_ml);
            assert!(out.warnings("AMK", "stock solution", None).is_empty());

            let out = dilute(
                DilutionTarget {
                    conc_ug_per_ml: 84.0,
                    vol_ml,
                },
                DilutionSource {
                    conc_ug_per_ml: stock_conc,
                    total_vol_ml: vol_ml,
                },
            )
            .unwrap();
            assert!(!out.clamped && !out.exceeds_supply);
            assert!(out.topup_vol_ml >= 0.0);
        }
        // a genuine shortfall is still flagged
        let out = dilute(
            DilutionTarget {
                conc_ug_per_ml: 84.0,
                vol_ml: 1.2,
            },
            DilutionSource {
                conc_ug_per_ml: 83.9,
                total_vol_ml: 1.0,
            },
        )
        .unwrap();
        assert!(out.clamped && out.exceeds_supply);
    }

    #[test]
    fn test_max_tubes_for_source() {
        let config = ProtocolConfig::default();
        // (180 / 84 - 0.2) / 0.1 = 19.43
        assert_eq!(max_tubes_for_source(180.0, 84.0, &config), 19);
        assert_eq!(max_tubes_for_source(60.0, 84.0, &config), 5);
        assert_eq!(max_tubes_for_source(10.0, 84.0, &config), 0);
        // a ratio that should be exactly 1.0 but rounds just below it
        assert_eq!(max_tubes_for_source(84.0 * (1.0 - f64::EPSILON), 84.0, &config), 8);
    }
}
