use crate::Preparation::pipeline::PipelineStage;
use thiserror::Error;

/// error types of the preparation calculator, the drug catalog and the protocol configuration
#[derive(Debug, Error)]
pub enum DstError {
    /// request-level: selection refers to a row the catalog does not have
    #[error("Drug number {number} is not in the available selection (1-{catalog_len})")]
    InvalidSelection { number: usize, catalog_len: usize },
    #[error("'{0}' is not a valid number. Please enter only numbers separated by commas or spaces")]
    UnparsableSelection(String),
    #[error("No valid drugs selected")]
    EmptySelection,
    #[error("Drug '{0}' is not in the catalog")]
    UnknownDrug(String),
    #[error("Drug '{0}' is marked unavailable in the catalog")]
    UnavailableDrug(String),
    #[error("Duplicate drug name in catalog: {0}")]
    DuplicateDrug(String),
    #[error("Division by zero while calculating {0}")]
    DivisionByZero(&'static str),
    #[error("Invalid value for {field}: {value}")]
    InvalidInput { field: &'static str, value: f64 },
    #[error("Missing input: {0}")]
    MissingInput(&'static str),
    #[error("Panel position {position} is out of range (panel has {panel_len} drugs)")]
    NoSuchEntry { position: usize, panel_len: usize },
    #[error("Cannot {action} while the session is at stage {stage:?}")]
    StageOrder {
        action: &'static str,
        stage: PipelineStage,
    },
    #[error("Stage {stage:?} is incomplete for {drug}: missing {missing}")]
    IncompleteStage {
        stage: PipelineStage,
        drug: String,
        missing: &'static str,
    },
    #[error("Invalid protocol configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
