//! # Drug Catalog Module
//!
//! ## Aim
//! Immutable reference data for the DST panel: drug name, diluent, original
//! (reference) molecular weight and critical concentration. The catalog is
//! supplied by whatever stores it; this module only holds it, ships the
//! default anti-TB panel, reads/writes it as JSON, and turns an operator's
//! selection string into catalog indices.
//!
//! ## Selection strings
//! 1-based drug numbers separated by commas and/or whitespace (`"1,3 5"`), or
//! `all` for every drug flagged available. A number outside the catalog or a
//! token that is not a number rejects the whole request.
//!
//! ## Usage
//! ```rust, ignore
//! let catalog = DrugCatalog::default_panel();
//! let selected = catalog.parse_selection("1, 9 20")?;
//! ```
use crate::Preparation::errors::DstError;
use log::{info, warn};
use prettytable::{Table, row};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// one catalog row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugRecord {
    pub name: String,
    pub diluent: String,
    pub original_mw_g_per_mol: f64,
    pub critical_conc_mg_per_ml: f64,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl DrugRecord {
    pub fn new(name: &str, diluent: &str, original_mw_g_per_mol: f64, critical_conc_mg_per_ml: f64) -> Self {
        Self {
            name: name.to_string(),
            diluent: diluent.to_string(),
            original_mw_g_per_mol,
            critical_conc_mg_per_ml,
            available: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DrugCatalog {
    records: Vec<DrugRecord>,
}

const DEFAULT_PANEL: &[(&str, &str, f64, f64)] = &[
    ("Amikacin (AMK)", "WATER", 585.6, 1.0),
    ("Bedaquiline (BDQ)", "DMSO", 555.5, 1.0),
    ("Clofazimine (CFZ)", "DMSO", 473.39, 1.0),
    ("Cycloserine (CYC)", "WATER", 102.09, 1.0),
    ("Delamanid (DMD)", "DMSO", 534.48, 0.06),
    ("Ethambutol hydrochloride (EMB hyd)", "WATER", 204.31, 5.0),
    ("Ethionamide (ETH)", "DMSO", 166.24, 5.0),
    ("Imipenem (IPM)", "PHOSPHATE PH 7.2", 299.35, 1.0),
    ("Isoniazid CC (INH)-cc", "WATER", 137.14, 1.0),
    ("Isoniazid high (INH)-h", "WATER", 137.14, 10.0),
    ("Isoniazid low (INH)-l", "WATER", 137.14, 0.05),
    (
        "Levofloxacin (LVX)",
        "1/2 VOLUME OF WATER THEN 0.1 MOL/L NAOH DROPWISE TO DISSOLVE/WATER",
        361.37,
        1.0,
    ),
    ("Linezolid (LZD)", "WATER", 337.35, 1.0),
    ("Meropenem (MRP)", "WATER", 383.46, 1.0),
    ("Moxifloxacin hydrochloride (MFX hyd)", "WATER", 437.89, 0.25),
    ("Para-aminosalicylic Acid (PAS)", "WATER OR DMSO", 153.14, 4.0),
    ("Pretomanid (PA-824)", "DMSO", 359.3, 1.0),
    ("Prothionamide (PTO)", "DMSO AND WATER", 180.27, 2.5),
    ("Rifabutin (RBT)", "DMSO", 847.02, 0.5),
    ("Rifampicin (RIF)", "WATER", 822.94, 2.0),
    ("Streptomycin sulfate salt (STM)", "WATER", 1457.38, 1.0),
];

impl DrugCatalog {
    /// builds a catalog; drug names must be unique
    pub fn new(records: Vec<DrugRecord>) -> Result<Self, DstError> {
        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert(record.name.as_str()) {
                return Err(DstError::DuplicateDrug(record.name.clone()));
            }
            if record.original_mw_g_per_mol <= 0.0 || record.critical_conc_mg_per_ml <= 0.0 {
                warn!(
                    "catalog entry {} has non-positive reference data (MW {}, CC {})",
                    record.name, record.original_mw_g_per_mol, record.critical_conc_mg_per_ml
                );
            }
        }
        Ok(Self { records })
    }

    /// the 21-drug anti-TB panel used when no catalog is supplied
    pub fn default_panel() -> Self {
        let records = DEFAULT_PANEL
            .iter()
            .map(|&(name, diluent, mw, cc)| DrugRecord::new(name, diluent, mw, cc))
            .collect();
        Self { records }
    }

    pub fn from_json_str(json: &str) -> Result<Self, DstError> {
        let records: Vec<DrugRecord> = serde_json::from_str(json)?;
        Self::new(records)
    }

    pub fn from_file(file_name: &str) -> Result<Self, DstError> {
        let content = fs::read_to_string(Path::new(file_name))?;
        let catalog = Self::from_json_str(&content)?;
        info!("{} drugs loaded from {}", catalog.len(), file_name);
        Ok(catalog)
    }

    pub fn save_to_file(&self, file_name: &str) -> Result<(), DstError> {
        let content = serde_json::to_string_pretty(&self.records)?;
        fs::write(file_name, content)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DrugRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&DrugRecord> {
        self.records.get(index)
    }

    pub fn find(&self, name: &str) -> Option<(usize, &DrugRecord)> {
        self.records.iter().enumerate().find(|(_, r)| r.name == name)
    }

    /// 0-based row of the drug called `name`
    pub fn index_of(&self, name: &str) -> Result<usize, DstError> {
        self.find(name)
            .map(|(i, _)| i)
            .ok_or_else(|| DstError::UnknownDrug(name.to_string()))
    }

    /// catalog restricted to drugs flagged available
    pub fn available(&self) -> DrugCatalog {
        DrugCatalog {
            records: self.records.iter().filter(|r| r.available).cloned().collect(),
        }
    }

    /// all indices (0-based) must refer to catalog rows
    pub fn check_indices(&self, indices: &[usize]) -> Result<(), DstError> {
        if indices.is_empty() {
            return Err(DstError::EmptySelection);
        }
        match indices.iter().find(|&&i| i >= self.records.len()) {
            Some(&i) => Err(DstError::InvalidSelection {
                number: i + 1,
                catalog_len: self.records.len(),
            }),
            None => Ok(()),
        }
    }

    /// Turns "1,3 5" (1-based) into `[0, 2, 4]`; "all" selects every available drug.
    /// Repeated numbers are kept once, in first-seen order.
    pub fn parse_selection(&self, selection: &str) -> Result<Vec<usize>, DstError> {
        let selection = selection.trim();
        if selection.eq_ignore_ascii_case("all") {
            let all: Vec<usize> = self
                .records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.available)
                .map(|(i, _)| i)
                .collect();
            self.check_indices(&all)?;
            return Ok(all);
        }
        let separators = Regex::new(r"[,\s]+")
            .map_err(|e| DstError::UnparsableSelection(e.to_string()))?;
        let mut indices = Vec::new();
        for token in separators.split(selection).filter(|t| !t.is_empty()) {
            let number: usize = token
                .parse()
                .map_err(|_| DstError::UnparsableSelection(token.to_string()))?;
            if number == 0 || number > self.records.len() {
                return Err(DstError::InvalidSelection {
                    number,
                    catalog_len: self.records.len(),
                });
            }
            if !indices.contains(&(number - 1)) {
                indices.push(number - 1);
            }
        }
        self.check_indices(&indices)?;
        Ok(indices)
    }

    /// numbered listing of the catalog
    pub fn pretty_print(&self) {
        let mut table = Table::new();
        table.add_row(row!["#", "Drug", "Diluent", "OrgMol_W(g/mol)", "Crit_Conc(mg/ml)"]);
        for (i, r) in self.records.iter().enumerate() {
            table.add_row(row![
                i + 1,
                r.name,
                r.diluent,
                r.original_mw_g_per_mol,
                r.critical_conc_mg_per_ml
            ]);
        }
        table.printstd();
    }
}
