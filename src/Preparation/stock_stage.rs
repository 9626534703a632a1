//! Stock solution stage: how much drug powder to weigh out, and once the
//! operator reports the actually weighed mass, how much diluent to add and
//! what concentration the stock ends up at.
use crate::Preparation::errors::DstError;
use crate::Preparation::potency::potency;
use crate::Preparation::warnings::{Warning, WarningKind};
use crate::protocol_config::ProtocolConfig;
use serde::{Deserialize, Serialize};

/// Working solution is 84 times more dilute than the critical-concentration
/// baseline of the MGIT protocol (8.4 / 0.1).
pub const WORKING_DILUTION_RATIO: f64 = 84.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StockEstimate {
    pub potency: f64,
    pub estimated_mass_mg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StockSolution {
    pub diluent_vol_ml: f64,
    pub stock_conc_ug_per_ml: f64,
}

/// mass of purchased powder (mg) needed for `stock_vol_ml` of stock
pub fn estimated_mass_mg(critical_conc_mg_per_ml: f64, stock_vol_ml: f64, potency: f64) -> f64 {
    critical_conc_mg_per_ml * stock_vol_ml * potency * WORKING_DILUTION_RATIO / 1000.0
}

/// Diluent volume keeping the stock on target when the weighed mass differs
/// from the estimate: the desired stock volume scaled by actual / estimated.
pub fn diluent_volume_ml(
    actual_mass_mg: f64,
    estimated_mass_mg: f64,
    stock_vol_ml: f64,
) -> Result<f64, DstError> {
    if estimated_mass_mg == 0.0 || !estimated_mass_mg.is_finite() {
        return Err(DstError::DivisionByZero("diluent volume"));
    }
    Ok(actual_mass_mg / estimated_mass_mg * stock_vol_ml)
}

/// Deprecated ratio direction (estimated / actual) found in an older copy of
/// the calculation library. Kept for comparison only, never used by the pipeline.
#[deprecated(note = "inverted ratio; use diluent_volume_ml")]
pub fn legacy_diluent_volume_ml(
    actual_mass_mg: f64,
    estimated_mass_mg: f64,
    stock_vol_ml: f64,
) -> Result<f64, DstError> {
    if actual_mass_mg == 0.0 {
        return Err(DstError::DivisionByZero("diluent volume"));
    }
    Ok(estimated_mass_mg / actual_mass_mg * stock_vol_ml)
}

/// stock concentration in µg/ml
pub fn stock_concentration_ug_per_ml(actual_mass_mg: f64, diluent_vol_ml: f64) -> Result<f64, DstError> {
    if diluent_vol_ml == 0.0 || !diluent_vol_ml.is_finite() {
        return Err(DstError::DivisionByZero("stock concentration"));
    }
    Ok(actual_mass_mg * 1000.0 / diluent_vol_ml)
}

fn require_positive(field: &'static str, value: f64) -> Result<f64, DstError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(DstError::InvalidInput { field, value })
    }
}

/// potency and estimated mass for one drug
pub fn estimate_stock(
    purchased_mw: f64,
    original_mw: f64,
    critical_conc_mg_per_ml: f64,
    stock_vol_ml: f64,
) -> Result<StockEstimate, DstError> {
    require_positive("purchased molecular weight", purchased_mw)?;
    require_positive("critical concentration", critical_conc_mg_per_ml)?;
    require_positive("stock volume", stock_vol_ml)?;
    let potency = potency(purchased_mw, original_mw)?;
    let estimated_mass_mg = estimated_mass_mg(critical_conc_mg_per_ml, stock_vol_ml, potency);
    if estimated_mass_mg <= 0.0 || !estimated_mass_mg.is_finite() {
        return Err(DstError::InvalidInput {
            field: "estimated drug mass",
            value: estimated_mass_mg,
        });
    }
    Ok(StockEstimate {
        potency,
        estimated_mass_mg,
    })
}

/// diluent volume and stock concentration after the weigh-in
pub fn prepare_stock(
    estimated_mass_mg: f64,
    actual_mass_mg: f64,
    stock_vol_ml: f64,
) -> Result<StockSolution, DstError> {
    require_positive("actual drug mass", actual_mass_mg)?;
    require_positive("stock volume", stock_vol_ml)?;
    let diluent_vol_ml = diluent_volume_ml(actual_mass_mg, estimated_mass_mg, stock_vol_ml)?;
    let stock_conc_ug_per_ml = stock_concentration_ug_per_ml(actual_mass_mg, diluent_vol_ml)?;
    Ok(StockSolution {
        diluent_vol_ml,
        stock_conc_ug_per_ml,
    })
}

/// relative deviation of the weighed mass from the estimate, in percent
pub fn weigh_in_deviation_percent(actual_mass_mg: f64, estimated_mass_mg: f64) -> f64 {
    (actual_mass_mg - estimated_mass_mg).abs() / estimated_mass_mg * 100.0
}

pub fn weigh_in_warning(
    drug_name: &str,
    actual_mass_mg: f64,
    estimated_mass_mg: f64,
    max_deviation_percent: f64,
) -> Option<Warning> {
    let deviation = weigh_in_deviation_percent(actual_mass_mg, estimated_mass_mg);
    if deviation > max_deviation_percent {
        Some(Warning::new(
            drug_name,
            WarningKind::WeighInDeviation,
            format!(
                "Actual weight ({:.3} mg) differs significantly from estimated weight ({:.3} mg) by {:.1}%. Please verify your measurement.",
                actual_mass_mg, estimated_mass_mg, deviation
            ),
        ))
    } else {
        None
    }
}

/// Flags estimates that are hard to carry out at the bench.
/// `solution_label` names what the powder is dissolved into.
pub fn practicality_warnings(
    drug_name: &str,
    estimated_mass_mg: f64,
    solution_vol_ml: f64,
    solution_label: &str,
    config: &ProtocolConfig,
) -> Vec<Warning> {
    let mut warnings = Vec::new();
    if estimated_mass_mg < config.min_weigh_mass_mg {
        warnings.push(Warning::new(
            drug_name,
            WarningKind::LowWeighMass,
            format!(
                "{}: drug weight ({:.4} mg) is less than {} mg. Consider a larger {} volume to reach a practical weight.",
                drug_name, estimated_mass_mg, config.min_weigh_mass_mg, solution_label
            ),
        ));
    }
    if solution_vol_ml < config.min_stock_volume_ml {
        warnings.push(Warning::new(
            drug_name,
            WarningKind::SmallStockVolume,
            format!(
                "{}: {} volume ({:.4} ml = {:.1} µl) might be too small to prepare and pipette.",
                drug_name,
                solution_label,
                solution_vol_ml,
                solution_vol_ml * 1000.0
            ),
        ));
    }
    if solution_vol_ml > config.max_tube_volume_ml {
        warnings.push(Warning::new(
            drug_name,
            WarningKind::ExceedsTubeVolume,
            format!(
                "{}: {} volume ({:.4} ml) exceeds the {} ml tube limit.",
                drug_name, solution_label, solution_vol_ml, config.max_tube_volume_ml
            ),
        ));
    }
    warnings
}
