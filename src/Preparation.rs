/// Unit conversions: volumes are kept in ml and masses in mg inside the crate;
/// µl and g/µg only appear at the edges (operator input, report columns).
pub mod units;
/// Error type shared by the preparation chain, the drug catalog and the protocol configuration.
pub mod errors;
/// Non-fatal warnings (feasibility and plausibility), collected per panel entry
/// and merged back in selection order.
pub mod warnings;
/// Potency of a purchased batch: purchased over original molecular weight.
pub mod potency;
/// Stock solution stage
/// 1) estimated mass of powder to weigh out for the target stock volume;
/// 2) after the weigh-in, the diluent volume keeping the stock on target and the stock concentration;
/// 3) bench limits on the estimate (weighable mass, pipettable volume, tube capacity).
pub mod stock_stage;
/// One dilution step (draw from a source, top up with diluent). Working
/// concentration and working volume as functions of critical concentration and tube count.
pub mod dilution_stage;
/// Intermediate dilution inserted when the stock is too concentrated to pipette
/// the working solution from it directly. Reuses the dilution step twice.
pub mod intermediate_stage;
pub mod aliquots;
/// One row of the preparation table and the per-drug stage functions, for the
/// stock-solution and the direct-dilution pathway.
pub mod entry;
/// Panel orchestration: the one-shot [`pipeline::calculate_panel`] and the
/// step-by-step [`pipeline::PreparationSession`] state machine.
pub mod pipeline;
/// prettytable and JSON rendering of a finished run
pub mod report;
#[cfg(test)]
mod pipeline_tests;
