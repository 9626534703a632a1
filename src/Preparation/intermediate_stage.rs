//! Optional intermediate dilution between stock and working solution.
//!
//! When the stock is many times more concentrated than the working solution the
//! stock draw becomes too small to pipette. Above a protocol threshold an
//! intermediate solution `factor` times the working concentration is made
//! first and the working solution is drawn from it. Both steps are the same
//! dilution step from [`crate::Preparation::dilution_stage`].
use crate::Preparation::dilution_stage::{
    DilutionOutcome, DilutionSource, DilutionTarget, dilute, max_tubes_for_source,
};
use crate::Preparation::errors::DstError;
use crate::Preparation::warnings::Warning;
use crate::protocol_config::ProtocolConfig;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "route")]
pub enum DilutionRoute {
    DirectDraw,
    ViaIntermediate { factor: f64 },
}

/// Intermediate solution as reported to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntermediateSolution {
    pub factor: f64,
    pub conc_ug_per_ml: f64,
    pub vol_ml: f64,
    pub stock_draw_vol_ml: f64,
    pub diluent_vol_ml: f64,
    /// intermediate solution left after the working solution was drawn
    pub leftover_vol_ml: f64,
}

/// result of stock -> (intermediate ->) working solution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkingChain {
    pub route: DilutionRoute,
    pub intermediate: Option<DilutionOutcome>,
    pub working: DilutionOutcome,
    /// concentration of the solution the working solution is drawn from
    pub working_source_conc_ug_per_ml: f64,
    pub stock_leftover_vol_ml: f64,
}

/// stock concentration over working concentration
pub fn dilution_factor(stock_conc_ug_per_ml: f64, working_conc_ug_per_ml: f64) -> Result<f64, DstError> {
    if working_conc_ug_per_ml == 0.0 {
        return Err(DstError::DivisionByZero("dilution factor"));
    }
    Ok(stock_conc_ug_per_ml / working_conc_ug_per_ml)
}

/// Steps the factor down from the stock factor until the stock draw
/// (`working_vol_ml / factor`) is larger than the minimum pipettable volume.
/// Falls back to the configured factor when the floor is reached.
pub fn intermediate_factor(stock_factor: f64, working_vol_ml: f64, config: &ProtocolConfig) -> f64 {
    let mut factor = stock_factor;
    while factor > config.intermediate_factor_floor {
        factor -= config.intermediate_factor_step;
        if working_vol_ml / factor > config.min_pipette_volume_ml {
            break;
        }
    }
    if factor <= config.intermediate_factor_floor {
        factor = config.intermediate_factor_fallback;
    }
    factor
}

pub fn choose_route(
    stock_conc_ug_per_ml: f64,
    working_conc_ug_per_ml: f64,
    working_vol_ml: f64,
    config: &ProtocolConfig,
) -> Result<DilutionRoute, DstError> {
    let stock_factor = dilution_factor(stock_conc_ug_per_ml, working_conc_ug_per_ml)?;
    if stock_factor > config.intermediate_threshold {
        let factor = intermediate_factor(stock_factor, working_vol_ml, config);
        debug!(
            "stock factor {:.2} above threshold {:.2}, intermediate factor {:.2}",
            stock_factor, config.intermediate_threshold, factor
        );
        Ok(DilutionRoute::ViaIntermediate { factor })
    } else {
        Ok(DilutionRoute::DirectDraw)
    }
}

/// Makes the working solution from the stock, through an intermediate
/// dilution when the route asks for one.
pub fn prepare_working_solution(
    stock: DilutionSource,
    working: DilutionTarget,
    config: &ProtocolConfig,
) -> Result<WorkingChain, DstError> {
    let route = choose_route(stock.conc_ug_per_ml, working.conc_ug_per_ml, working.vol_ml, config)?;
    match route {
        DilutionRoute::DirectDraw => {
            let outcome = dilute(working, stock)?;
            Ok(WorkingChain {
                route,
                intermediate: None,
                working: outcome,
                working_source_conc_ug_per_ml: stock.conc_ug_per_ml,
                stock_leftover_vol_ml: outcome.leftover_vol_ml,
            })
        }
        DilutionRoute::ViaIntermediate { factor } => {
            let intermediate_conc = working.conc_ug_per_ml * factor;
            // stock and intermediate draws are both working_vol / factor
            let stock_draw = working.vol_ml / factor;
            let intermediate_vol = stock_draw * stock.conc_ug_per_ml / intermediate_conc;
            let first = dilute(
                DilutionTarget {
                    conc_ug_per_ml: intermediate_conc,
                    vol_ml: intermediate_vol,
                },
                stock,
            )?;
            let second = dilute(
                working,
                DilutionSource {
                    conc_ug_per_ml: intermediate_conc,
                    total_vol_ml: first.target.vol_ml,
                },
            )?;
            Ok(WorkingChain {
                route,
                intermediate: Some(first),
                working: second,
                working_source_conc_ug_per_ml: intermediate_conc,
                stock_leftover_vol_ml: first.leftover_vol_ml,
            })
        }
    }
}

impl WorkingChain {
    pub fn intermediate_solution(&self) -> Option<IntermediateSolution> {
        match (self.route, self.intermediate) {
            (DilutionRoute::ViaIntermediate { factor }, Some(first)) => Some(IntermediateSolution {
                factor,
                conc_ug_per_ml: first.target.conc_ug_per_ml,
                vol_ml: first.target.vol_ml,
                stock_draw_vol_ml: first.draw_vol_ml,
                diluent_vol_ml: first.topup_vol_ml,
                leftover_vol_ml: self.working.leftover_vol_ml,
            }),
            _ => None,
        }
    }

    pub fn exceeds_supply(&self) -> bool {
        self.working.exceeds_supply || self.intermediate.is_some_and(|i| i.exceeds_supply)
    }

    /// warnings of both steps, stock step first
    pub fn warnings(&self, drug_name: &str, config: &ProtocolConfig) -> Vec<Warning> {
        let mut warnings = Vec::new();
        let working_source_label = match self.intermediate {
            Some(first) => {
                warnings.extend(first.warnings(drug_name, "stock solution", None));
                "intermediate solution"
            }
            None => "stock solution",
        };
        let max_tubes = if self.working.clamped {
            Some(max_tubes_for_source(
                self.working_source_conc_ug_per_ml,
                self.working.target.conc_ug_per_ml,
                config,
            ))
        } else {
            None
        };
        warnings.extend(
            self.working
                .warnings(drug_name, working_source_label, max_tubes),
        );
        warnings
    }
}
