use crate::Preparation::errors::DstError;
use crate::Preparation::warnings::{Warning, WarningKind};

/// Potency of the purchased batch relative to the reference compound
/// (purchased molecular weight / original molecular weight, dimensionless).
pub fn potency(purchased_mw: f64, original_mw: f64) -> Result<f64, DstError> {
    if original_mw == 0.0 {
        return Err(DstError::DivisionByZero("potency"));
    }
    Ok(purchased_mw / original_mw)
}

/// plausibility checks on the molecular weights and the resulting potency
pub fn potency_warnings(
    drug_name: &str,
    purchased_mw: f64,
    original_mw: f64,
    potency: f64,
    max_plausible_potency: f64,
) -> Vec<Warning> {
    let mut warnings = Vec::new();
    if purchased_mw < original_mw {
        warnings.push(Warning::new(
            drug_name,
            WarningKind::PurchasedBelowOriginal,
            format!(
                "Purchased molecular weight ({}) is smaller than original weight ({}). This may indicate an issue with the drug purity or molecular weight.",
                purchased_mw, original_mw
            ),
        ));
    }
    if potency <= 0.0 || potency > max_plausible_potency {
        warnings.push(Warning::new(
            drug_name,
            WarningKind::UnusualPotency,
            format!(
                "Potency for {} is {:.3}, which seems unusual. Please verify your molecular weight values.",
                drug_name, potency
            ),
        ));
    }
    warnings
}
