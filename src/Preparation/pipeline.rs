//! # Preparation pipeline
//!
//! Runs the stock -> (intermediate ->) working solution chain over a panel of
//! drugs. Two ways in:
//! - [`calculate_panel`]: everything is known up front, one call returns the
//!   result table and the warnings;
//! - [`PreparationSession`]: the bench workflow, where the operator enters
//!   stock parameters, reads the estimate, weighs the powder, reports the
//!   mass, then enters the tube count (a direct dilution gets its tube count
//!   with the stock parameters). The session walks the stages of
//!   [`PipelineStage`] in order and can be sent back to an earlier one.
//!
//! A drug whose numbers cannot be computed is marked failed and the rest of the
//! panel carries on. Only a selection that does not match the catalog rejects
//! the request as a whole.
use crate::Preparation::entry::{
    PreparationEntry, PreparationMode, PreparationRequest, StockParameters,
};
use crate::Preparation::errors::DstError;
use crate::Preparation::warnings::{Warning, WarningLog};
use crate::drug_catalog::DrugCatalog;
use crate::protocol_config::ProtocolConfig;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// stages of a preparation run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    SelectDrugs,
    EnterStockParameters,
    ComputeEstimate,
    AwaitWeighIn,
    ComputeStockStage,
    EnterTubeCount,
    ComputeWorkingStage,
    Done,
}

impl PipelineStage {
    pub fn next(self) -> Option<PipelineStage> {
        use PipelineStage::*;
        match self {
            SelectDrugs => Some(EnterStockParameters),
            EnterStockParameters => Some(ComputeEstimate),
            ComputeEstimate => Some(AwaitWeighIn),
            AwaitWeighIn => Some(ComputeStockStage),
            ComputeStockStage => Some(EnterTubeCount),
            EnterTubeCount => Some(ComputeWorkingStage),
            ComputeWorkingStage => Some(Done),
            Done => None,
        }
    }

    /// stages where the operator supplies inputs
    pub fn is_input_stage(self) -> bool {
        matches!(
            self,
            PipelineStage::SelectDrugs
                | PipelineStage::EnterStockParameters
                | PipelineStage::AwaitWeighIn
                | PipelineStage::EnterTubeCount
        )
    }
}

/// result table (selection order) and the warnings of the run
#[derive(Debug, Clone, Serialize)]
pub struct PanelReport {
    pub entries: Vec<PreparationEntry>,
    pub warnings: Vec<Warning>,
}

type StageFn = fn(&mut PreparationEntry, &ProtocolConfig) -> Result<Vec<Warning>, DstError>;

/// Runs one computation stage over all entries that have not failed yet.
fn run_stage(
    entries: &mut [PreparationEntry],
    log: &mut WarningLog,
    stage: PipelineStage,
    config: &ProtocolConfig,
) {
    let compute: StageFn = match stage {
        PipelineStage::ComputeEstimate => PreparationEntry::compute_estimate,
        PipelineStage::ComputeStockStage => PreparationEntry::compute_stock_stage,
        PipelineStage::ComputeWorkingStage => PreparationEntry::compute_working_stage,
        _ => return,
    };
    for (position, entry) in entries.iter_mut().enumerate() {
        if entry.is_failed() {
            continue;
        }
        match compute(entry, config) {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w.message);
                }
                log.extend(position, warnings);
            }
            Err(e) => {
                error!("{} failed at {:?}: {}", entry.drug_name, stage, e);
                entry.fail(&e, stage);
            }
        }
    }
}

fn check_unique(entries: &[PreparationEntry]) -> Result<(), DstError> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.drug_name.as_str()) {
            return Err(DstError::DuplicateDrug(entry.drug_name.clone()));
        }
    }
    Ok(())
}

fn entries_for(catalog: &DrugCatalog, indices: &[usize]) -> Result<Vec<PreparationEntry>, DstError> {
    catalog.check_indices(indices)?;
    let entries = indices
        .iter()
        .map(|&i| match catalog.get(i) {
            Some(record) if !record.available => Err(DstError::UnavailableDrug(record.name.clone())),
            Some(record) => Ok(PreparationEntry::new(record)),
            None => Err(DstError::InvalidSelection {
                number: i + 1,
                catalog_len: catalog.len(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    check_unique(&entries)?;
    Ok(entries)
}

/// Computes the whole preparation chain for every request.
///
/// # Errors
/// Only request-level problems: an index outside the catalog, an empty or
/// repeated selection, a drug marked unavailable, or an invalid configuration. Per-drug problems are
/// reported through [`crate::Preparation::entry::EntryStatus::Failed`].
pub fn calculate_panel(
    catalog: &DrugCatalog,
    requests: &[PreparationRequest],
    config: &ProtocolConfig,
) -> Result<PanelReport, DstError> {
    config.validate()?;
    let indices: Vec<usize> = requests.iter().map(|r| r.drug_index).collect();
    let mut entries = entries_for(catalog, &indices)?;
    info!("calculating preparation for {} drugs", entries.len());

    for (entry, request) in entries.iter_mut().zip(requests) {
        entry.mode = request.mode;
        entry.purchased_mw_g_per_mol = request.purchased_mw_g_per_mol;
        entry.critical_conc_override_mg_per_ml = request.critical_conc_override_mg_per_ml;
        entry.stock_vol_ml = request.stock_vol_ml;
        entry.actual_mass_mg = request.actual_mass_mg;
        entry.tube_count = request.tube_count;
        entry.ml_per_aliquot = request.ml_per_aliquot;
    }

    let mut log = WarningLog::with_entries(entries.len());
    for stage in [
        PipelineStage::ComputeEstimate,
        PipelineStage::ComputeStockStage,
        PipelineStage::ComputeWorkingStage,
    ] {
        run_stage(&mut entries, &mut log, stage, config);
    }
    let failed = entries.iter().filter(|e| e.is_failed()).count();
    info!(
        "preparation done: {} computed, {} failed, {} warnings",
        entries.len() - failed,
        failed,
        log.len()
    );
    Ok(PanelReport {
        entries,
        warnings: log.ordered(),
    })
}

/// Step-by-step preparation run over one drug selection.
///
/// ```rust, ignore
/// let catalog = DrugCatalog::default_panel();
/// let mut session = PreparationSession::new(&catalog, ProtocolConfig::default());
/// session.select_by_string("9")?;
/// session.set_stock_parameters(0, &StockParameters::new(137.14, 5.0))?;
/// session.compute_estimates()?;
/// session.record_weigh_in(0, 0.45)?;
/// session.compute_stock_stage()?;
/// session.set_tube_count(0, 10, None)?;
/// session.compute_working_stage()?;
/// let report = session.report()?;
/// ```
#[derive(Debug, Clone)]
pub struct PreparationSession<'a> {
    catalog: &'a DrugCatalog,
    config: ProtocolConfig,
    stage: PipelineStage,
    entries: Vec<PreparationEntry>,
    warnings: WarningLog,
}

impl<'a> PreparationSession<'a> {
    pub fn new(catalog: &'a DrugCatalog, config: ProtocolConfig) -> Self {
        Self {
            catalog,
            config,
            stage: PipelineStage::SelectDrugs,
            entries: Vec::new(),
            warnings: WarningLog::default(),
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn entries(&self) -> &[PreparationEntry] {
        &self.entries
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// warnings raised so far, in selection order
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.ordered()
    }

    fn expect_stage(&self, expected: PipelineStage, action: &'static str) -> Result<(), DstError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(DstError::StageOrder {
                action,
                stage: self.stage,
            })
        }
    }

    fn entry_mut(&mut self, position: usize) -> Result<&mut PreparationEntry, DstError> {
        let panel_len = self.entries.len();
        self.entries
            .get_mut(position)
            .ok_or(DstError::NoSuchEntry {
                position,
                panel_len,
            })
    }

    /// every entry still in the run must have the `missing` input before leaving `stage`
    fn require_inputs(
        &self,
        stage: PipelineStage,
        missing: &'static str,
        present: impl Fn(&PreparationEntry) -> bool,
    ) -> Result<(), DstError> {
        match self
            .entries
            .iter()
            .find(|&e| !e.is_failed() && !present(e))
        {
            Some(entry) => Err(DstError::IncompleteStage {
                stage,
                drug: entry.drug_name.clone(),
                missing,
            }),
            None => Ok(()),
        }
    }

    fn compute(&mut self, stage: PipelineStage) {
        self.stage = stage;
        run_stage(&mut self.entries, &mut self.warnings, stage, &self.config);
        self.stage = stage.next().unwrap_or(PipelineStage::Done);
    }

    /// starts the run with catalog rows `indices` (0-based)
    pub fn select_drugs(&mut self, indices: &[usize]) -> Result<(), DstError> {
        self.expect_stage(PipelineStage::SelectDrugs, "select drugs")?;
        self.config.validate()?;
        self.entries = entries_for(self.catalog, indices)?;
        self.warnings = WarningLog::with_entries(self.entries.len());
        info!(
            "selected: {}",
            self.entries
                .iter()
                .map(|e| e.drug_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.stage = PipelineStage::EnterStockParameters;
        Ok(())
    }

    /// starts the run from an operator selection string such as `"1,3 5"`
    pub fn select_by_string(&mut self, selection: &str) -> Result<(), DstError> {
        let indices = self.catalog.parse_selection(selection)?;
        self.select_drugs(&indices)
    }

    pub fn set_stock_parameters(&mut self, position: usize, params: &StockParameters) -> Result<(), DstError> {
        self.expect_stage(PipelineStage::EnterStockParameters, "enter stock parameters")?;
        require_finite("purchased molecular weight", params.purchased_mw_g_per_mol)?;
        if let Some(stock_vol_ml) = params.stock_vol_ml {
            require_finite("stock volume", stock_vol_ml)?;
        }
        if let Some(cc) = params.critical_conc_override_mg_per_ml {
            require_finite("critical concentration", cc)?;
        }
        self.entry_mut(position)?.set_stock_parameters(params);
        Ok(())
    }

    /// potency and estimated mass for every drug; moves on to the weigh-in
    pub fn compute_estimates(&mut self) -> Result<(), DstError> {
        self.expect_stage(PipelineStage::EnterStockParameters, "compute estimates")?;
        self.require_inputs(
            PipelineStage::EnterStockParameters,
            "purchased molecular weight",
            |e| e.purchased_mw_g_per_mol.is_some(),
        )?;
        self.require_inputs(PipelineStage::EnterStockParameters, "stock volume", |e| {
            e.mode != PreparationMode::StockSolution || e.stock_vol_ml.is_some()
        })?;
        self.require_inputs(PipelineStage::EnterStockParameters, "tube count", |e| {
            e.mode != PreparationMode::DirectDilution || e.tube_count.is_some()
        })?;
        self.compute(PipelineStage::ComputeEstimate);
        Ok(())
    }

    pub fn record_weigh_in(&mut self, position: usize, actual_mass_mg: f64) -> Result<(), DstError> {
        self.expect_stage(PipelineStage::AwaitWeighIn, "record a weigh-in")?;
        require_finite("actual drug mass", actual_mass_mg)?;
        self.entry_mut(position)?.actual_mass_mg = Some(actual_mass_mg);
        Ok(())
    }

    /// diluent volume and stock concentration for every drug
    pub fn compute_stock_stage(&mut self) -> Result<(), DstError> {
        self.expect_stage(PipelineStage::AwaitWeighIn, "compute the stock stage")?;
        self.require_inputs(PipelineStage::AwaitWeighIn, "actual drug mass", |e| {
            e.actual_mass_mg.is_some()
        })?;
        self.compute(PipelineStage::ComputeStockStage);
        Ok(())
    }

    pub fn set_tube_count(
        &mut self,
        position: usize,
        tube_count: u32,
        ml_per_aliquot: Option<f64>,
    ) -> Result<(), DstError> {
        self.expect_stage(PipelineStage::EnterTubeCount, "enter tube counts")?;
        if let Some(per_aliquot) = ml_per_aliquot {
            require_finite("volume per aliquot", per_aliquot)?;
        }
        let stage = self.stage;
        let entry = self.entry_mut(position)?;
        if entry.is_direct() {
            // the powder was weighed for the tube count given with the stock parameters
            return Err(DstError::StageOrder {
                action: "change the tube count of a direct dilution",
                stage,
            });
        }
        entry.tube_count = Some(tube_count);
        entry.ml_per_aliquot = ml_per_aliquot;
        Ok(())
    }

    /// working solution (and intermediate dilution where needed) for every drug
    pub fn compute_working_stage(&mut self) -> Result<(), DstError> {
        self.expect_stage(PipelineStage::EnterTubeCount, "compute the working stage")?;
        self.require_inputs(PipelineStage::EnterTubeCount, "tube count", |e| {
            e.tube_count.is_some()
        })?;
        self.compute(PipelineStage::ComputeWorkingStage);
        info!("preparation run complete, {} warnings", self.warnings.len());
        Ok(())
    }

    pub fn report(&self) -> Result<PanelReport, DstError> {
        self.expect_stage(PipelineStage::Done, "report results")?;
        Ok(PanelReport {
            entries: self.entries.clone(),
            warnings: self.warnings.ordered(),
        })
    }

    /// Goes back to an earlier input stage. Inputs of that stage are kept for
    /// editing; everything after it is cleared, warnings included.
    pub fn return_to(&mut self, stage: PipelineStage) -> Result<(), DstError> {
        if !stage.is_input_stage() || stage > self.stage {
            return Err(DstError::StageOrder {
                action: "return to that stage",
                stage: self.stage,
            });
        }
        if stage == PipelineStage::SelectDrugs {
            self.reset();
            return Ok(());
        }
        let cleared_from = stage.next().unwrap_or(PipelineStage::Done);
        for entry in self.entries.iter_mut() {
            entry.clear_from(cleared_from);
        }
        self.warnings.discard_from(cleared_from);
        info!("returned to {:?}", stage);
        self.stage = stage;
        Ok(())
    }

    /// drops the selection and everything computed for it
    pub fn reset(&mut self) {
        self.entries.clear();
        self.warnings.clear();
        self.stage = PipelineStage::SelectDrugs;
    }
}

fn require_finite(field: &'static str, value: f64) -> Result<(), DstError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DstError::InvalidInput { field, value })
    }
}
