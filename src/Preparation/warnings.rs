use crate::Preparation::pipeline::PipelineStage;
use serde::{Deserialize, Serialize};

/// what a feasibility or plausibility warning is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    PurchasedBelowOriginal,
    UnusualPotency,
    WeighInDeviation,
    /// powder to weigh out is below what a balance weighs reliably
    LowWeighMass,
    /// stock volume too small to prepare and pipette
    SmallStockVolume,
    /// solution does not fit in one tube
    ExceedsTubeVolume,
    /// naive top-up volume was negative, draw clamped to the target volume
    NegativeTopUp,
    /// draw volume larger than the source solution produced upstream
    DrawExceedsSupply,
}

impl WarningKind {
    /// computation stage that raises warnings of this kind
    pub fn raised_at(&self) -> PipelineStage {
        match self {
            WarningKind::PurchasedBelowOriginal
            | WarningKind::UnusualPotency
            | WarningKind::LowWeighMass
            | WarningKind::SmallStockVolume
            | WarningKind::ExceedsTubeVolume => PipelineStage::ComputeEstimate,
            WarningKind::WeighInDeviation => PipelineStage::ComputeStockStage,
            WarningKind::NegativeTopUp | WarningKind::DrawExceedsSupply => {
                PipelineStage::ComputeWorkingStage
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub drug_name: String,
    pub message: String,
    pub kind: WarningKind,
}

impl Warning {
    pub fn new(drug_name: &str, kind: WarningKind, message: String) -> Self {
        Self {
            drug_name: drug_name.to_string(),
            message,
            kind,
        }
    }
}

/// Warnings of one run, kept per panel entry so that they can be merged back
/// in selection order whatever order the entries were evaluated in.
#[derive(Debug, Clone, Default)]
pub struct WarningLog {
    per_entry: Vec<Vec<Warning>>,
}

impl WarningLog {
    pub fn with_entries(n: usize) -> Self {
        Self {
            per_entry: vec![Vec::new(); n],
        }
    }

    pub fn extend(&mut self, position: usize, warnings: Vec<Warning>) {
        if position >= self.per_entry.len() {
            self.per_entry.resize(position + 1, Vec::new());
        }
        self.per_entry[position].extend(warnings);
    }

    /// drops warnings raised at `stage` or later
    pub fn discard_from(&mut self, stage: PipelineStage) {
        for warnings in self.per_entry.iter_mut() {
            warnings.retain(|w| w.kind.raised_at() < stage);
        }
    }

    pub fn clear(&mut self) {
        self.per_entry.clear();
    }

    pub fn ordered(&self) -> Vec<Warning> {
        self.per_entry.iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.per_entry.iter().map(|w| w.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
