//! # Protocol Configuration Module
//!
//! ## Purpose
//! Keeps the constants fixed by the MGIT DST protocol in one place: the affine
//! working-volume function of the tube count, the dilution-factor threshold
//! that switches on the intermediate dilution, and the plausibility limits used
//! for warnings. None of these are tunable per run; a laboratory changes them
//! by editing `protocol_config.json`.
//!
//! ## Configuration Format
//! ```json
//! {
//!   "ml_per_tube": 0.1,
//!   "dead_volume_ml": 0.2,
//!   "intermediate_threshold": 10.0,
//!   "min_pipette_volume_ml": 0.2,
//!   "intermediate_factor_step": 0.5,
//!   "intermediate_factor_floor": 1.1,
//!   "intermediate_factor_fallback": 2.0,
//!   "weigh_in_deviation_percent": 200.0,
//!   "max_plausible_potency": 10.0,
//!   "min_weigh_mass_mg": 2.0,
//!   "min_stock_volume_ml": 0.25,
//!   "max_tube_volume_ml": 5.0
//! }
//! ```
//! Missing keys take their default values.
//!
//! ## Usage
//! ```rust, ignore
//! use DSTcalc::protocol_config::ProtocolManager;
//! let manager = ProtocolManager::new();
//! let config = manager.config().clone();
//! ```
use crate::Preparation::errors::DstError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// per-tube volume of the superseded protocol revision (ml)
pub const LEGACY_ML_PER_TUBE: f64 = 0.12;
/// pipetting-loss margin of the superseded protocol revision (ml)
pub const LEGACY_DEAD_VOLUME_ML: f64 = 0.36;

/// Protocol constants.
///
/// # Fields
/// * `ml_per_tube` - working solution drawn per MGIT tube (a)
/// * `dead_volume_ml` - constant pipetting-loss margin (b)
/// * `intermediate_threshold` - stock/working dilution factor above which an intermediate dilution is inserted
/// * `min_pipette_volume_ml` - smallest stock draw accepted when choosing the intermediate factor
/// * `intermediate_factor_step` - decrement used while searching the intermediate factor
/// * `intermediate_factor_floor` - search stops when the factor falls to this value
/// * `intermediate_factor_fallback` - factor used when the search found nothing
/// * `weigh_in_deviation_percent` - weigh-in deviation from the estimate that triggers a warning
/// * `max_plausible_potency` - potency above which a warning is raised
/// * `min_weigh_mass_mg` - smallest powder mass worth weighing
/// * `min_stock_volume_ml` - smallest stock volume worth preparing
/// * `max_tube_volume_ml` - capacity of the tube a stock or direct working solution is made in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub ml_per_tube: f64,
    pub dead_volume_ml: f64,
    pub intermediate_threshold: f64,
    pub min_pipette_volume_ml: f64,
    pub intermediate_factor_step: f64,
    pub intermediate_factor_floor: f64,
    pub intermediate_factor_fallback: f64,
    pub weigh_in_deviation_percent: f64,
    pub max_plausible_potency: f64,
    pub min_weigh_mass_mg: f64,
    pub min_stock_volume_ml: f64,
    pub max_tube_volume_ml: f64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ml_per_tube: 0.1,
            dead_volume_ml: 0.2,
            intermediate_threshold: 10.0,
            min_pipette_volume_ml: 0.2,
            intermediate_factor_step: 0.5,
            intermediate_factor_floor: 1.1,
            intermediate_factor_fallback: 2.0,
            weigh_in_deviation_percent: 200.0,
            max_plausible_potency: 10.0,
            min_weigh_mass_mg: 2.0,
            min_stock_volume_ml: 0.25,
            max_tube_volume_ml: 5.0,
        }
    }
}

impl ProtocolConfig {
    /// Working-volume constants of the older protocol revision (0.12 ml per tube
    /// plus 0.36 ml). Deprecated; only for reproducing old worksheets.
    pub fn legacy() -> Self {
        Self {
            ml_per_tube: LEGACY_ML_PER_TUBE,
            dead_volume_ml: LEGACY_DEAD_VOLUME_ML,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), DstError> {
        let positive = [
            ("ml_per_tube", self.ml_per_tube),
            ("intermediate_threshold", self.intermediate_threshold),
            ("min_pipette_volume_ml", self.min_pipette_volume_ml),
            ("intermediate_factor_step", self.intermediate_factor_step),
            ("intermediate_factor_floor", self.intermediate_factor_floor),
            ("intermediate_factor_fallback", self.intermediate_factor_fallback),
            ("weigh_in_deviation_percent", self.weigh_in_deviation_percent),
            ("max_plausible_potency", self.max_plausible_potency),
            ("min_weigh_mass_mg", self.min_weigh_mass_mg),
            ("min_stock_volume_ml", self.min_stock_volume_ml),
            ("max_tube_volume_ml", self.max_tube_volume_ml),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(DstError::InvalidConfig(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if !(self.dead_volume_ml.is_finite() && self.dead_volume_ml >= 0.0) {
            return Err(DstError::InvalidConfig(format!(
                "dead_volume_ml must not be negative, got {}",
                self.dead_volume_ml
            )));
        }
        if self.intermediate_factor_fallback <= 1.0 {
            return Err(DstError::InvalidConfig(
                "intermediate_factor_fallback must dilute, i.e. be greater than 1".to_string(),
            ));
        }
        // an intermediate is only made from stocks above the threshold and must stay weaker than them
        if self.intermediate_factor_fallback > self.intermediate_threshold {
            return Err(DstError::InvalidConfig(format!(
                "intermediate_factor_fallback ({}) must not exceed intermediate_threshold ({})",
                self.intermediate_factor_fallback, self.intermediate_threshold
            )));
        }
        if self.min_stock_volume_ml >= self.max_tube_volume_ml {
            return Err(DstError::InvalidConfig(format!(
                "min_stock_volume_ml ({}) must be below max_tube_volume_ml ({})",
                self.min_stock_volume_ml, self.max_tube_volume_ml
            )));
        }
        Ok(())
    }
}

/// Loads, validates and persists the protocol configuration.
#[derive(Debug, Clone)]
pub struct ProtocolManager {
    config: ProtocolConfig,
    config_file: String,
}

impl ProtocolManager {
    /// Reads `protocol_config.json` from the current directory, defaults if absent or invalid.
    pub fn new() -> Self {
        Self::with_config_file("protocol_config.json")
    }

    pub fn with_config_file(config_file: &str) -> Self {
        let config = match Self::load_config(config_file) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "could not use protocol configuration '{}': {}; falling back to defaults",
                    config_file, e
                );
                ProtocolConfig::default()
            }
        };
        Self {
            config,
            config_file: config_file.to_string(),
        }
    }

    fn load_config(config_file: &str) -> Result<ProtocolConfig, DstError> {
        if Path::new(config_file).exists() {
            let content = fs::read_to_string(config_file)?;
            let config: ProtocolConfig = serde_json::from_str(&content)?;
            config.validate()?;
            info!("protocol configuration loaded from {}", config_file);
            Ok(config)
        } else {
            Ok(ProtocolConfig::default())
        }
    }

    pub fn save_config(&self) -> Result<(), DstError> {
        let content = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.config_file, content)?;
        info!("protocol configuration saved to {}", self.config_file);
        Ok(())
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// replaces the configuration after validating it; saves it to disk
    pub fn set_config(&mut self, config: ProtocolConfig) -> Result<(), DstError> {
        config.validate()?;
        self.config = config;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), DstError> {
        self.set_config(ProtocolConfig::default())
    }
}

impl Default for ProtocolManager {
    fn default() -> Self {
        Self::new()
    }
}
