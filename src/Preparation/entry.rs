//! One row of the preparation table: a selected drug, the operator inputs of
//! each stage and everything derived from them.
//!
//! The three `compute_*` methods are the per-drug stage functions used both by
//! [`crate::Preparation::pipeline::calculate_panel`] and by the step-by-step
//! session. Each returns the warnings it raised; an `Err` means the entry failed
//! and the caller marks it so without touching the other entries.
//!
//! A drug is prepared either as a stock solution that is diluted to the working
//! solution, or by dissolving the powder directly in the working-solution
//! volume ([`PreparationMode`]). A direct dilution is sized by the tube count
//! from the start, so its tube count is a first-stage input.
use crate::Preparation::aliquots::{aliquot_count, aliquot_plan_volume_ml};
use crate::Preparation::dilution_stage::{
    DilutionSource, DilutionTarget, VOLUME_TOLERANCE, working_concentration_ug_per_ml,
    working_volume_ml,
};
use crate::Preparation::errors::DstError;
use crate::Preparation::intermediate_stage::{
    DilutionRoute, IntermediateSolution, prepare_working_solution,
};
use crate::Preparation::pipeline::PipelineStage;
use crate::Preparation::potency::potency_warnings;
use crate::Preparation::stock_stage::{
    estimate_stock, practicality_warnings, prepare_stock, weigh_in_warning,
};
use crate::Preparation::warnings::{Warning, WarningKind};
use crate::drug_catalog::DrugRecord;
use crate::protocol_config::ProtocolConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreparationMode {
    /// concentrated stock, diluted to the working solution, rest kept as aliquots
    #[default]
    StockSolution,
    /// powder dissolved straight into the working-solution volume
    DirectDilution,
}

/// inputs of the first stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StockParameters {
    pub purchased_mw_g_per_mol: f64,
    pub critical_conc_override_mg_per_ml: Option<f64>,
    pub mode: PreparationMode,
    /// stock to prepare; none for a direct dilution
    pub stock_vol_ml: Option<f64>,
    /// tubes a direct dilution is sized for
    pub tube_count: Option<u32>,
}

impl StockParameters {
    pub fn new(purchased_mw_g_per_mol: f64, stock_vol_ml: f64) -> Self {
        Self {
            purchased_mw_g_per_mol,
            critical_conc_override_mg_per_ml: None,
            mode: PreparationMode::StockSolution,
            stock_vol_ml: Some(stock_vol_ml),
            tube_count: None,
        }
    }

    /// stock volume taken from the aliquots to be stored
    pub fn from_aliquot_plan(purchased_mw_g_per_mol: f64, num_aliquots: u32, ml_per_aliquot: f64) -> Self {
        Self::new(
            purchased_mw_g_per_mol,
            aliquot_plan_volume_ml(num_aliquots, ml_per_aliquot),
        )
    }

    pub fn direct(purchased_mw_g_per_mol: f64, tube_count: u32) -> Self {
        Self {
            purchased_mw_g_per_mol,
            critical_conc_override_mg_per_ml: None,
            mode: PreparationMode::DirectDilution,
            stock_vol_ml: None,
            tube_count: Some(tube_count),
        }
    }

    pub fn with_critical_conc(mut self, critical_conc_mg_per_ml: f64) -> Self {
        self.critical_conc_override_mg_per_ml = Some(critical_conc_mg_per_ml);
        self
    }
}

/// All inputs for one drug of a one-shot panel calculation.
/// `drug_index` is the 0-based catalog row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreparationRequest {
    pub drug_index: usize,
    pub mode: PreparationMode,
    pub purchased_mw_g_per_mol: Option<f64>,
    pub critical_conc_override_mg_per_ml: Option<f64>,
    pub stock_vol_ml: Option<f64>,
    pub actual_mass_mg: Option<f64>,
    pub tube_count: Option<u32>,
    pub ml_per_aliquot: Option<f64>,
}

impl PreparationRequest {
    pub fn new(
        drug_index: usize,
        purchased_mw_g_per_mol: f64,
        stock_vol_ml: f64,
        actual_mass_mg: f64,
        tube_count: u32,
    ) -> Self {
        Self {
            drug_index,
            mode: PreparationMode::StockSolution,
            purchased_mw_g_per_mol: Some(purchased_mw_g_per_mol),
            critical_conc_override_mg_per_ml: None,
            stock_vol_ml: Some(stock_vol_ml),
            actual_mass_mg: Some(actual_mass_mg),
            tube_count: Some(tube_count),
            ml_per_aliquot: None,
        }
    }

    /// powder dissolved directly into the working solution for `tube_count` tubes
    pub fn direct(drug_index: usize, purchased_mw_g_per_mol: f64, actual_mass_mg: f64, tube_count: u32) -> Self {
        Self {
            drug_index,
            mode: PreparationMode::DirectDilution,
            purchased_mw_g_per_mol: Some(purchased_mw_g_per_mol),
            actual_mass_mg: Some(actual_mass_mg),
            tube_count: Some(tube_count),
            ..Self::default()
        }
    }

    pub fn with_critical_conc(mut self, critical_conc_mg_per_ml: f64) -> Self {
        self.critical_conc_override_mg_per_ml = Some(critical_conc_mg_per_ml);
        self
    }

    pub fn with_aliquot_volume(mut self, ml_per_aliquot: f64) -> Self {
        self.ml_per_aliquot = Some(ml_per_aliquot);
        self
    }

    /// stock volume sized to fill `num_aliquots` aliquots of `ml_per_aliquot`
    pub fn with_aliquot_plan(mut self, num_aliquots: u32, ml_per_aliquot: f64) -> Self {
        self.stock_vol_ml = Some(aliquot_plan_volume_ml(num_aliquots, ml_per_aliquot));
        self.ml_per_aliquot = Some(ml_per_aliquot);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason")]
pub enum EntryStatus {
    Pending,
    Computed,
    /// computed, but the draw exceeds what the upstream solution provides
    Infeasible,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparationEntry {
    pub drug_name: String,
    pub diluent: String,
    pub original_mw_g_per_mol: f64,
    pub catalog_critical_conc_mg_per_ml: f64,
    // stage 1 inputs
    pub mode: PreparationMode,
    pub critical_conc_override_mg_per_ml: Option<f64>,
    pub purchased_mw_g_per_mol: Option<f64>,
    pub stock_vol_ml: Option<f64>,
    // stage 1 derived
    pub potency: Option<f64>,
    pub estimated_mass_mg: Option<f64>,
    // stage 2
    pub actual_mass_mg: Option<f64>,
    pub diluent_vol_ml: Option<f64>,
    pub stock_conc_ug_per_ml: Option<f64>,
    // stage 3
    pub tube_count: Option<u32>,
    pub ml_per_aliquot: Option<f64>,
    pub working_conc_ug_per_ml: Option<f64>,
    pub working_vol_ml: Option<f64>,
    pub draw_vol_ml: Option<f64>,
    pub topup_vol_ml: Option<f64>,
    pub leftover_vol_ml: Option<f64>,
    pub route: Option<DilutionRoute>,
    pub intermediate: Option<IntermediateSolution>,
    pub aliquot_count: Option<u32>,
    pub status: EntryStatus,
    #[serde(skip)]
    failed_at: Option<PipelineStage>,
}

impl PreparationEntry {
    pub fn new(record: &DrugRecord) -> Self {
        Self {
            drug_name: record.name.clone(),
            diluent: record.diluent.clone(),
            original_mw_g_per_mol: record.original_mw_g_per_mol,
            catalog_critical_conc_mg_per_ml: record.critical_conc_mg_per_ml,
            mode: PreparationMode::StockSolution,
            critical_conc_override_mg_per_ml: None,
            purchased_mw_g_per_mol: None,
            stock_vol_ml: None,
            potency: None,
            estimated_mass_mg: None,
            actual_mass_mg: None,
            diluent_vol_ml: None,
            stock_conc_ug_per_ml: None,
            tube_count: None,
            ml_per_aliquot: None,
            working_conc_ug_per_ml: None,
            working_vol_ml: None,
            draw_vol_ml: None,
            topup_vol_ml: None,
            leftover_vol_ml: None,
            route: None,
            intermediate: None,
            aliquot_count: None,
            status: EntryStatus::Pending,
            failed_at: None,
        }
    }

    /// critical concentration in effect: the override if given, else the catalog value
    pub fn critical_conc_mg_per_ml(&self) -> f64 {
        self.critical_conc_override_mg_per_ml
            .unwrap_or(self.catalog_critical_conc_mg_per_ml)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, EntryStatus::Failed(_))
    }

    pub fn is_direct(&self) -> bool {
        self.mode == PreparationMode::DirectDilution
    }

    pub fn set_stock_parameters(&mut self, params: &StockParameters) {
        self.mode = params.mode;
        self.purchased_mw_g_per_mol = Some(params.purchased_mw_g_per_mol);
        self.critical_conc_override_mg_per_ml = params.critical_conc_override_mg_per_ml;
        self.stock_vol_ml = params.stock_vol_ml;
        self.tube_count = match params.mode {
            PreparationMode::DirectDilution => params.tube_count,
            PreparationMode::StockSolution => None,
        };
    }

    /// stage at which the tube count is entered, and the working solution sized
    fn tubes_entered_at(&self) -> PipelineStage {
        match self.mode {
            PreparationMode::DirectDilution => PipelineStage::EnterStockParameters,
            PreparationMode::StockSolution => PipelineStage::EnterTubeCount,
        }
    }

    fn checked_tube_count(&self) -> Result<u32, DstError> {
        match self.tube_count {
            None => Err(DstError::MissingInput("tube count")),
            Some(0) => Err(DstError::InvalidInput {
                field: "tube count",
                value: 0.0,
            }),
            Some(tubes) => Ok(tubes),
        }
    }

    /// Forgets everything entered or derived at `stage` and after it. The entry
    /// goes back to pending unless it failed at an earlier stage.
    pub fn clear_from(&mut self, stage: PipelineStage) {
        let tubes_entered_at = self.tubes_entered_at();
        if stage <= tubes_entered_at {
            self.tube_count = None;
        }
        if stage <= tubes_entered_at.next().unwrap_or(PipelineStage::Done) {
            self.working_conc_ug_per_ml = None;
            self.working_vol_ml = None;
        }
        if stage <= PipelineStage::EnterStockParameters {
            self.mode = PreparationMode::StockSolution;
            self.purchased_mw_g_per_mol = None;
            self.critical_conc_override_mg_per_ml = None;
            self.stock_vol_ml = None;
        }
        if stage <= PipelineStage::ComputeEstimate {
            self.potency = None;
            self.estimated_mass_mg = None;
        }
        if stage <= PipelineStage::AwaitWeighIn {
            self.actual_mass_mg = None;
        }
        if stage <= PipelineStage::ComputeStockStage {
            self.diluent_vol_ml = None;
            self.stock_conc_ug_per_ml = None;
        }
        if stage <= PipelineStage::EnterTubeCount {
            self.ml_per_aliquot = None;
        }
        if stage <= PipelineStage::ComputeWorkingStage {
            self.draw_vol_ml = None;
            self.topup_vol_ml = None;
            self.leftover_vol_ml = None;
            self.route = None;
            self.intermediate = None;
            self.aliquot_count = None;
        }
        match self.failed_at {
            Some(failed_at) if failed_at < stage => {}
            _ => {
                self.failed_at = None;
                self.status = EntryStatus::Pending;
            }
        }
    }

    /// marks the entry failed by `error` raised at `stage`
    pub fn fail(&mut self, error: &DstError, stage: PipelineStage) {
        self.status = EntryStatus::Failed(error.to_string());
        self.failed_at = Some(stage);
    }

    pub fn failed_at(&self) -> Option<PipelineStage> {
        self.failed_at
    }

    /// Potency and estimated mass to weigh out. A direct dilution is estimated
    /// for the working-solution volume of its tube count.
    pub fn compute_estimate(&mut self, config: &ProtocolConfig) -> Result<Vec<Warning>, DstError> {
        let purchased_mw = self
            .purchased_mw_g_per_mol
            .ok_or(DstError::MissingInput("purchased molecular weight"))?;
        let (solution_vol_ml, solution_label) = match self.mode {
            PreparationMode::StockSolution => (
                self.stock_vol_ml.ok_or(DstError::MissingInput("stock volume"))?,
                "stock solution",
            ),
            PreparationMode::DirectDilution => (
                working_volume_ml(self.checked_tube_count()?, config),
                "working solution",
            ),
        };
        let estimate = estimate_stock(
            purchased_mw,
            self.original_mw_g_per_mol,
            self.critical_conc_mg_per_ml(),
            solution_vol_ml,
        )?;
        self.potency = Some(estimate.potency);
        self.estimated_mass_mg = Some(estimate.estimated_mass_mg);
        if self.is_direct() {
            self.working_conc_ug_per_ml = Some(working_concentration_ug_per_ml(self.critical_conc_mg_per_ml()));
            self.working_vol_ml = Some(solution_vol_ml);
        }
        let mut warnings = potency_warnings(
            &self.drug_name,
            purchased_mw,
            self.original_mw_g_per_mol,
            estimate.potency,
            config.max_plausible_potency,
        );
        warnings.extend(practicality_warnings(
            &self.drug_name,
            estimate.estimated_mass_mg,
            solution_vol_ml,
            solution_label,
            config,
        ));
        Ok(warnings)
    }

    /// Diluent volume from the weighed mass, and the stock concentration. For a
    /// direct dilution the diluent makes the working solution itself.
    pub fn compute_stock_stage(&mut self, config: &ProtocolConfig) -> Result<Vec<Warning>, DstError> {
        let estimated_mass_mg = self
            .estimated_mass_mg
            .ok_or(DstError::MissingInput("estimated drug mass"))?;
        let actual_mass_mg = self
            .actual_mass_mg
            .ok_or(DstError::MissingInput("actual drug mass"))?;
        let solution_vol_ml = match self.mode {
            PreparationMode::StockSolution => self.stock_vol_ml.ok_or(DstError::MissingInput("stock volume"))?,
            PreparationMode::DirectDilution => self
                .working_vol_ml
                .ok_or(DstError::MissingInput("working volume"))?,
        };
        let stock = prepare_stock(estimated_mass_mg, actual_mass_mg, solution_vol_ml)?;
        self.diluent_vol_ml = Some(stock.diluent_vol_ml);
        if !self.is_direct() {
            self.stock_conc_ug_per_ml = Some(stock.stock_conc_ug_per_ml);
        }
        Ok(weigh_in_warning(
            &self.drug_name,
            actual_mass_mg,
            estimated_mass_mg,
            config.weigh_in_deviation_percent,
        )
        .into_iter()
        .collect())
    }

    /// A direct dilution has nothing left to draw; it only has to cover the
    /// working volume. Light powder gives less solution than the tubes need.
    fn finish_direct_dilution(&mut self) -> Result<Vec<Warning>, DstError> {
        let tubes = self.checked_tube_count()?;
        let made_ml = self
            .diluent_vol_ml
            .ok_or(DstError::MissingInput("diluent volume"))?;
        let needed_ml = self
            .working_vol_ml
            .ok_or(DstError::MissingInput("working volume"))?;
        self.leftover_vol_ml = Some(made_ml - needed_ml);
        self.aliquot_count = Some(0);
        if needed_ml - made_ml > VOLUME_TOLERANCE * needed_ml {
            self.status = EntryStatus::Infeasible;
            return Ok(vec![Warning::new(
                &self.drug_name,
                WarningKind::DrawExceedsSupply,
                format!(
                    "{}: {:.3} ml of working solution made, {:.3} ml needed for {} tubes (shortfall {:.3} ml).",
                    self.drug_name,
                    made_ml,
                    needed_ml,
                    tubes,
                    needed_ml - made_ml
                ),
            )]);
        }
        self.status = EntryStatus::Computed;
        Ok(Vec::new())
    }

    /// Working solution for the tube count, through an intermediate dilution
    /// when the stock is too concentrated. The stock available for drawing is
    /// the diluent volume the weighed powder was dissolved in.
    pub fn compute_working_stage(&mut self, config: &ProtocolConfig) -> Result<Vec<Warning>, DstError> {
        if self.is_direct() {
            return self.finish_direct_dilution();
        }
        let stock_conc = self
            .stock_conc_ug_per_ml
            .ok_or(DstError::MissingInput("stock concentration"))?;
        let stock_total_ml = self
            .diluent_vol_ml
            .ok_or(DstError::MissingInput("diluent volume"))?;
        let tubes = self.checked_tube_count()?;
        if let Some(per_aliquot) = self.ml_per_aliquot {
            if !(per_aliquot.is_finite() && per_aliquot > 0.0) {
                return Err(DstError::InvalidInput {
                    field: "volume per aliquot",
                    value: per_aliquot,
                });
            }
        }
        let target = DilutionTarget {
            conc_ug_per_ml: working_concentration_ug_per_ml(self.critical_conc_mg_per_ml()),
            vol_ml: working_volume_ml(tubes, config),
        };
        let source = DilutionSource {
            conc_ug_per_ml: stock_conc,
            total_vol_ml: stock_total_ml,
        };
        let chain = prepare_working_solution(source, target, config)?;

        self.working_conc_ug_per_ml = Some(target.conc_ug_per_ml);
        self.working_vol_ml = Some(target.vol_ml);
        self.draw_vol_ml = Some(chain.working.draw_vol_ml);
        self.topup_vol_ml = Some(chain.working.topup_vol_ml);
        self.leftover_vol_ml = Some(chain.stock_leftover_vol_ml);
        self.route = Some(chain.route);
        self.intermediate = chain.intermediate_solution();
        self.aliquot_count = Some(aliquot_count(chain.stock_leftover_vol_ml, self.ml_per_aliquot));
        self.status = if chain.exceeds_supply() {
            EntryStatus::Infeasible
        } else {
            EntryStatus::Computed
        };
        Ok(chain.warnings(&self.drug_name, config))
    }
}
