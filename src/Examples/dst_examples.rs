use crate::Preparation::entry::{PreparationRequest, StockParameters};
use crate::Preparation::errors::DstError;
use crate::Preparation::pipeline::{PipelineStage, PreparationSession, calculate_panel};
use crate::Preparation::units::mass_to_mg;
use crate::drug_catalog::DrugCatalog;
use crate::protocol_config::{ProtocolConfig, ProtocolManager};
use log::error;

pub fn dst_examples(task: usize) {
    let catalog = DrugCatalog::default_panel();
    match task {
        0 => {
            // whole panel in one call
            let config = ProtocolManager::new().config().clone();
            catalog.pretty_print();
            let requests = vec![
                // Amikacin
                PreparationRequest::new(0, 585.6, 5.0, 0.43, 12).with_aliquot_volume(1.0),
                // Isoniazid CC, purchased as a heavier salt
                PreparationRequest::new(8, 600.0, 5.0, 1.85, 12).with_aliquot_volume(0.5),
                // Moxifloxacin hydrochloride
                PreparationRequest::new(14, 437.89, 4.0, 0.09, 8),
                // Rifampicin, stock sized for four 1 ml aliquots
                PreparationRequest::new(19, 822.94, 0.0, 0.68, 12).with_aliquot_plan(4, 1.0),
                // Linezolid dissolved straight into the working solution
                PreparationRequest::direct(12, 337.35, 0.09, 8),
            ];
            match calculate_panel(&catalog, &requests, &config) {
                Ok(report) => report.pretty_print(),
                Err(e) => error!("{}", e),
            }
        }
        1 => {
            // bench workflow: estimate, weigh, then tubes
            if let Err(e) = bench_workflow(&catalog) {
                error!("{}", e);
            }
        }
        2 => {
            // stock far more concentrated than the working solution
            let (inh_low, delamanid) = match (
                catalog.index_of("Isoniazid low (INH)-l"),
                catalog.index_of("Delamanid (DMD)"),
            ) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => {
                    error!("{}", e);
                    return;
                }
            };
            let requests = vec![
                PreparationRequest::new(inh_low, 137.14 * 15.0, 5.0, 0.3, 20),
                PreparationRequest::new(delamanid, 534.48 * 12.5, 2.0, 0.13, 10),
            ];
            match calculate_panel(&catalog, &requests, &ProtocolConfig::default()) {
                Ok(report) => report.pretty_print(),
                Err(e) => error!("{}", e),
            }
        }
        3 => {
            // under-concentrated stock, too little stock, and a failing entry
            let mut no_mass = PreparationRequest::new(19, 822.94, 5.0, 0.0, 10);
            no_mass.actual_mass_mg = None;
            let requests = vec![
                PreparationRequest::new(0, 292.8, 5.0, 0.21, 30),
                PreparationRequest::new(8, 274.28, 5.0, 0.042, 10),
                no_mass,
            ];
            match calculate_panel(&catalog, &requests, &ProtocolConfig::legacy()) {
                Ok(report) => report.pretty_print(),
                Err(e) => error!("{}", e),
            }
        }
        4 => {
            // out-of-range selection rejects the whole request
            let mut session = PreparationSession::new(&catalog, ProtocolConfig::default());
            if let Err(e) = session.select_by_string("1, 3, 42") {
                error!("{}", e);
            }
        }
        _ => {
            println!("no such task: {}", task);
        }
    }
}

fn bench_workflow(catalog: &DrugCatalog) -> Result<(), DstError> {
    let mut session = PreparationSession::new(catalog, ProtocolConfig::default());
    session.select_by_string("9, 20")?;
    session.set_stock_parameters(0, &StockParameters::new(137.14, 5.0))?;
    session.set_stock_parameters(1, &StockParameters::new(822.94, 5.0))?;
    session.compute_estimates()?;
    for e in session.entries() {
        println!(
            "{}: weigh out about {:.3} mg",
            e.drug_name,
            e.estimated_mass_mg.unwrap_or(0.0)
        );
    }
    // balance reads in µg for the isoniazid
    session.record_weigh_in(0, mass_to_mg(450.0, "µg"))?;
    session.record_weigh_in(1, 0.80)?;
    session.compute_stock_stage()?;
    session.set_tube_count(0, 10, Some(1.0))?;
    session.set_tube_count(1, 10, Some(1.0))?;
    session.compute_working_stage()?;
    session.report()?.pretty_print();

    // rifampicin powder reweighed
    session.return_to(PipelineStage::AwaitWeighIn)?;
    session.record_weigh_in(1, 0.84)?;
    session.compute_stock_stage()?;
    session.set_tube_count(0, 10, Some(1.0))?;
    session.set_tube_count(1, 14, Some(1.0))?;
    session.compute_working_stage()?;
    println!("{}", session.report()?.to_json()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bench_workflow_runs() {
        let catalog = DrugCatalog::default_panel();
        assert!(bench_workflow(&catalog).is_ok());
    }
}
