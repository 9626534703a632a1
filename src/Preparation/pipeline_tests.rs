use crate::Preparation::dilution_stage::{working_concentration_ug_per_ml, working_volume_ml};
use crate::Preparation::entry::{
    EntryStatus, PreparationMode, PreparationRequest, StockParameters,
};
use crate::Preparation::errors::DstError;
use crate::Preparation::intermediate_stage::DilutionRoute;
use crate::Preparation::pipeline::{PipelineStage, PreparationSession, calculate_panel};
use crate::Preparation::potency::potency;
use crate::Preparation::stock_stage::{diluent_volume_ml, estimated_mass_mg};
use crate::Preparation::warnings::WarningKind;
use crate::drug_catalog::{DrugCatalog, DrugRecord};
use crate::protocol_config::ProtocolConfig;
use approx::assert_relative_eq;

// default panel rows used below
const AMIKACIN: usize = 0;
const BEDAQUILINE: usize = 1;
const INH_CC: usize = 8;
const RIFAMPICIN: usize = 19;

#[test]
fn test_isoniazid_salt_estimate() {
    // purchased MW 600 against 137.14
    let p = potency(600.0, 137.14).unwrap();
    assert_relative_eq!(p, 4.375, epsilon = 1e-3);
    assert_relative_eq!(estimated_mass_mg(1.0, 5.0, p), 1.8375, epsilon = 1e-3);
    assert_relative_eq!(estimated_mass_mg(0.1, 5.0, p), 0.18375, epsilon = 1e-4);

    let catalog = DrugCatalog::default_panel();
    let requests = vec![PreparationRequest::new(INH_CC, 600.0, 5.0, 1.84, 10)];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();
    let inh = &report.entries[0];
    assert_relative_eq!(inh.potency.unwrap(), 4.375, epsilon = 1e-3);
    assert_relative_eq!(inh.estimated_mass_mg.unwrap(), 1.8375, epsilon = 1e-3);
}

#[test]
fn test_working_concentration_for_unit_critical_concentration() {
    assert_eq!(working_concentration_ug_per_ml(1.0), 84.0);
    let catalog = DrugCatalog::default_panel();
    let requests = vec![PreparationRequest::new(AMIKACIN, 585.6, 5.0, 0.42, 6)];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();
    assert_eq!(report.entries[0].working_conc_ug_per_ml, Some(84.0));
}

#[test]
fn test_under_concentrated_stock_is_clamped_with_warning() {
    let catalog = DrugCatalog::default_panel();
    // potency 0.5: the stock is half the working concentration
    let requests = vec![PreparationRequest::new(AMIKACIN, 292.8, 5.0, 0.21, 10)];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();
    let amk = &report.entries[0];
    assert_relative_eq!(amk.stock_conc_ug_per_ml.unwrap(), 42.0, epsilon = 1e-9);
    assert_eq!(amk.topup_vol_ml, Some(0.0));
    assert_relative_eq!(amk.draw_vol_ml.unwrap(), amk.working_vol_ml.unwrap());
    assert_eq!(amk.status, EntryStatus::Computed);

    let kinds: Vec<WarningKind> = report.warnings.iter().map(|w| w.kind).collect();
    assert_eq!(
        kinds,
        vec![
            WarningKind::PurchasedBelowOriginal,
            WarningKind::LowWeighMass,
            WarningKind::NegativeTopUp
        ]
    );
    assert!(report.warnings.iter().all(|w| w.drug_name == "Amikacin (AMK)"));
    assert!(report.warnings[2].message.contains("Amikacin (AMK)"));
}

#[test]
fn test_draw_exceeding_stock_supply() {
    let catalog = DrugCatalog::default_panel();
    // potency 2, estimate 0.84 mg, far too little powder weighed: 0.25 ml of stock
    let requests = vec![PreparationRequest::new(INH_CC, 274.28, 5.0, 0.042, 10)];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();
    let inh = &report.entries[0];
    assert_relative_eq!(inh.diluent_vol_ml.unwrap(), 0.25, epsilon = 1e-9);
    assert_relative_eq!(inh.draw_vol_ml.unwrap(), 0.6, epsilon = 1e-9);
    assert_relative_eq!(inh.leftover_vol_ml.unwrap(), -0.35, epsilon = 1e-9);
    assert_eq!(inh.status, EntryStatus::Infeasible);
    assert_eq!(inh.aliquot_count, Some(0));
    let kinds: Vec<WarningKind> = report.warnings.iter().map(|w| w.kind).collect();
    assert_eq!(
        kinds,
        vec![WarningKind::LowWeighMass, WarningKind::DrawExceedsSupply]
    );
}

#[test]
fn test_mass_balance_for_feasible_entries() {
    let catalog = DrugCatalog::default_panel();
    let requests = vec![
        PreparationRequest::new(INH_CC, 274.28, 5.0, 0.9, 10),
        PreparationRequest::new(RIFAMPICIN, 900.0, 4.0, 1.5, 24),
        PreparationRequest::new(AMIKACIN, 1000.0, 2.0, 0.3, 3),
    ];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();
    for e in report.computed() {
        let (draw, topup, vol) = (
            e.draw_vol_ml.unwrap(),
            e.topup_vol_ml.unwrap(),
            e.working_vol_ml.unwrap(),
        );
        assert!(draw >= 0.0 && topup >= 0.0);
        assert_relative_eq!(draw + topup, vol, epsilon = 1e-9);
        assert!(e.stock_conc_ug_per_ml.unwrap() > 0.0);
        assert!(e.diluent_vol_ml.unwrap() > 0.0);
    }
}

#[test]
fn test_high_potency_goes_through_intermediate() {
    let catalog = DrugCatalog::default_panel();
    // potency 12.2, stock about 1025 ug/ml against 84 ug/ml working solution
    let requests = vec![PreparationRequest::new(INH_CC, 1673.108, 5.0, 5.124, 10)];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();
    let inh = &report.entries[0];
    let factor = match inh.route {
        Some(DilutionRoute::ViaIntermediate { factor }) => factor,
        other => panic!("expected an intermediate dilution, got {:?}", other),
    };
    // 12.2 stepped down by 0.5 until 1.2 ml / factor exceeds 0.2 ml
    assert_relative_eq!(factor, 5.7, epsilon = 1e-6);
    let inter = inh.intermediate.unwrap();
    assert_relative_eq!(inter.conc_ug_per_ml, 84.0 * factor, epsilon = 1e-9);
    assert_relative_eq!(inter.stock_draw_vol_ml, 1.2 / factor, epsilon = 1e-9);
    assert_relative_eq!(inh.draw_vol_ml.unwrap(), 1.2 / factor, epsilon = 1e-9);
    assert_relative_eq!(inh.leftover_vol_ml.unwrap(), 5.0 - 1.2 / factor, epsilon = 1e-9);
    assert_eq!(inh.status, EntryStatus::Computed);

    let kinds: Vec<WarningKind> = report.warnings.iter().map(|w| w.kind).collect();
    assert_eq!(kinds, vec![WarningKind::UnusualPotency]);
}

#[test]
fn test_invalid_index_rejects_the_request() {
    let catalog = DrugCatalog::default_panel();
    let requests = vec![
        PreparationRequest::new(AMIKACIN, 585.6, 5.0, 0.42, 10),
        PreparationRequest::new(21, 100.0, 5.0, 0.42, 10),
    ];
    assert!(matches!(
        calculate_panel(&catalog, &requests, &ProtocolConfig::default()),
        Err(DstError::InvalidSelection {
            number: 22,
            catalog_len: 21
        })
    ));
    let repeated = vec![
        PreparationRequest::new(AMIKACIN, 585.6, 5.0, 0.42, 10),
        PreparationRequest::new(AMIKACIN, 585.6, 5.0, 0.42, 10),
    ];
    assert!(matches!(
        calculate_panel(&catalog, &repeated, &ProtocolConfig::default()),
        Err(DstError::DuplicateDrug(_))
    ));
    assert!(matches!(
        calculate_panel(&catalog, &[], &ProtocolConfig::default()),
        Err(DstError::EmptySelection)
    ));
}

#[test]
fn test_failed_entry_does_not_stop_the_panel() {
    let catalog = DrugCatalog::default_panel();
    let mut missing_mass = PreparationRequest::new(RIFAMPICIN, 822.94, 5.0, 0.84, 10);
    missing_mass.actual_mass_mg = None;
    let requests = vec![
        PreparationRequest::new(AMIKACIN, 585.6, 5.0, 0.0, 10),
        missing_mass,
        PreparationRequest::new(INH_CC, 274.28, 5.0, 0.84, 10),
    ];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();
    assert!(report.entries[0].is_failed());
    assert_eq!(report.entries[0].failed_at(), Some(PipelineStage::ComputeStockStage));
    assert!(report.entries[0].diluent_vol_ml.is_none());
    assert!(matches!(
        &report.entries[1].status,
        EntryStatus::Failed(reason) if reason.contains("actual drug mass")
    ));
    assert_eq!(report.entries[2].status, EntryStatus::Computed);
    assert_relative_eq!(report.entries[2].draw_vol_ml.unwrap(), 0.6, epsilon = 1e-9);
}

#[test]
fn test_warnings_follow_selection_order() {
    let catalog = DrugCatalog::default_panel();
    let requests = vec![
        // warned at the estimate stage twice, clamped at the working stage
        PreparationRequest::new(AMIKACIN, 585.6 * 0.8, 5.0, 0.336, 10),
        // warned at the estimate stage
        PreparationRequest::new(INH_CC, 1645.68, 5.0, 5.04, 10),
    ];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();
    let drugs: Vec<&str> = report.warnings.iter().map(|w| w.drug_name.as_str()).collect();
    assert_eq!(
        drugs,
        vec![
            "Amikacin (AMK)",
            "Amikacin (AMK)",
            "Amikacin (AMK)",
            "Isoniazid CC (INH)-cc"
        ]
    );
}

#[test]
fn test_canonical_formulas_are_pinned() {
    let config = ProtocolConfig::default();
    assert_relative_eq!(working_volume_ml(10, &config), 1.2, epsilon = 1e-12);
    assert_relative_eq!(working_volume_ml(24, &config), 2.6, epsilon = 1e-12);
    // actual / estimated, not estimated / actual
    assert_relative_eq!(diluent_volume_ml(0.84, 0.42, 5.0).unwrap(), 10.0, epsilon = 1e-12);
    #[allow(deprecated)]
    let legacy = crate::Preparation::stock_stage::legacy_diluent_volume_ml(0.84, 0.42, 5.0).unwrap();
    assert_relative_eq!(legacy, 2.5, epsilon = 1e-12);
}

fn walk_to_weigh_in(session: &mut PreparationSession) {
    session.select_by_string("1, 9").unwrap();
    session
        .set_stock_parameters(0, &StockParameters::new(585.6, 5.0))
        .unwrap();
    session
        .set_stock_parameters(1, &StockParameters::new(274.28, 5.0))
        .unwrap();
    session.compute_estimates().unwrap();
}

#[test]
fn test_session_walks_all_stages() {
    let catalog = DrugCatalog::default_panel();
    let mut session = PreparationSession::new(&catalog, ProtocolConfig::default());
    assert_eq!(session.stage(), PipelineStage::SelectDrugs);
    walk_to_weigh_in(&mut session);
    assert_eq!(session.stage(), PipelineStage::AwaitWeighIn);
    assert_relative_eq!(session.entries()[0].estimated_mass_mg.unwrap(), 0.42, epsilon = 1e-12);
    assert_relative_eq!(session.entries()[1].estimated_mass_mg.unwrap(), 0.84, epsilon = 1e-12);

    session.record_weigh_in(0, 0.42).unwrap();
    session.record_weigh_in(1, 0.84).unwrap();
    session.compute_stock_stage().unwrap();
    assert_eq!(session.stage(), PipelineStage::EnterTubeCount);
    assert_relative_eq!(session.entries()[1].stock_conc_ug_per_ml.unwrap(), 168.0, epsilon = 1e-9);

    session.set_tube_count(0, 10, Some(1.0)).unwrap();
    session.set_tube_count(1, 10, Some(0.5)).unwrap();
    session.compute_working_stage().unwrap();
    assert_eq!(session.stage(), PipelineStage::Done);

    let report = session.report().unwrap();
    assert_eq!(report.entries.len(), 2);
    let inh = report.entry("Isoniazid CC (INH)-cc").unwrap();
    assert_relative_eq!(inh.draw_vol_ml.unwrap(), 0.6, epsilon = 1e-9);
    assert_relative_eq!(inh.topup_vol_ml.unwrap(), 0.6, epsilon = 1e-9);
    assert_relative_eq!(inh.leftover_vol_ml.unwrap(), 4.4, epsilon = 1e-9);
    assert_eq!(inh.aliquot_count, Some(8));
}

#[test]
fn test_session_enforces_stage_order() {
    let catalog = DrugCatalog::default_panel();
    let mut session = PreparationSession::new(&catalog, ProtocolConfig::default());
    assert!(matches!(
        session.compute_estimates(),
        Err(DstError::StageOrder {
            stage: PipelineStage::SelectDrugs,
            ..
        })
    ));
    assert!(matches!(
        session.select_by_string("1,99"),
        Err(DstError::InvalidSelection { number: 99, .. })
    ));
    assert_eq!(session.stage(), PipelineStage::SelectDrugs);

    session.select_drugs(&[AMIKACIN, INH_CC]).unwrap();
    session
        .set_stock_parameters(0, &StockParameters::new(585.6, 5.0))
        .unwrap();
    assert!(matches!(
        session.compute_estimates(),
        Err(DstError::IncompleteStage {
            stage: PipelineStage::EnterStockParameters,
            ..
        })
    ));
    assert!(matches!(
        session.set_stock_parameters(2, &StockParameters::new(1.0, 1.0)),
        Err(DstError::NoSuchEntry {
            position: 2,
            panel_len: 2
        })
    ));
    assert!(matches!(
        session.set_stock_parameters(1, &StockParameters::new(f64::NAN, 1.0)),
        Err(DstError::InvalidInput { .. })
    ));
    assert!(session.report().is_err());
    assert!(session.record_weigh_in(0, 1.0).is_err());
}

#[test]
fn test_session_failed_entry_is_skipped_by_later_stages() {
    let catalog = DrugCatalog::default_panel();
    let mut session = PreparationSession::new(&catalog, ProtocolConfig::default());
    session.select_drugs(&[AMIKACIN, INH_CC]).unwrap();
    session
        .set_stock_parameters(0, &StockParameters::new(0.0, 5.0))
        .unwrap();
    session
        .set_stock_parameters(1, &StockParameters::new(137.14, 5.0))
        .unwrap();
    session.compute_estimates().unwrap();
    assert!(session.entries()[0].is_failed());

    // the failed drug needs no weigh-in to move on
    session.record_weigh_in(1, 0.42).unwrap();
    session.compute_stock_stage().unwrap();
    session.set_tube_count(1, 4, None).unwrap();
    session.compute_working_stage().unwrap();
    let report = session.report().unwrap();
    assert!(report.entries[0].is_failed());
    assert_ne!(report.entries[1].status, EntryStatus::Pending);
}

fn weigh_in_warnings(session: &PreparationSession) -> usize {
    session
        .warnings()
        .iter()
        .filter(|w| w.kind == WarningKind::WeighInDeviation)
        .count()
}

#[test]
fn test_return_to_clears_downstream_values() {
    let catalog = DrugCatalog::default_panel();
    let mut session = PreparationSession::new(&catalog, ProtocolConfig::default());
    walk_to_weigh_in(&mut session);
    // 2.0 mg against 0.42 mg estimated raises a weigh-in warning
    session.record_weigh_in(0, 2.0).unwrap();
    session.record_weigh_in(1, 0.84).unwrap();
    session.compute_stock_stage().unwrap();
    assert_eq!(weigh_in_warnings(&session), 1);
    session.set_tube_count(0, 5, None).unwrap();
    session.set_tube_count(1, 5, None).unwrap();
    session.compute_working_stage().unwrap();

    session.return_to(PipelineStage::AwaitWeighIn).unwrap();
    assert_eq!(session.stage(), PipelineStage::AwaitWeighIn);
    assert_eq!(weigh_in_warnings(&session), 0);
    // estimate-stage warnings belong to inputs that were kept
    assert!(
        session
            .warnings()
            .iter()
            .all(|w| w.kind.raised_at() == PipelineStage::ComputeEstimate)
    );
    for e in session.entries() {
        assert!(e.actual_mass_mg.is_some());
        assert!(e.estimated_mass_mg.is_some());
        assert!(e.diluent_vol_ml.is_none());
        assert!(e.tube_count.is_none());
        assert!(e.draw_vol_ml.is_none());
        assert_eq!(e.status, EntryStatus::Pending);
    }

    session.record_weigh_in(0, 0.43).unwrap();
    session.compute_stock_stage().unwrap();
    assert_eq!(weigh_in_warnings(&session), 0);

    assert!(session.return_to(PipelineStage::ComputeEstimate).is_err());
    assert!(session.return_to(PipelineStage::Done).is_err());
    session.return_to(PipelineStage::SelectDrugs).unwrap();
    assert!(session.entries().is_empty());
    assert_eq!(session.stage(), PipelineStage::SelectDrugs);
}

#[test]
fn test_stock_at_working_strength_raises_no_dilution_warnings() {
    let catalog = DrugCatalog::default_panel();
    let config = ProtocolConfig::default();
    // potency 1 and the estimated mass weighed: stock equals the working solution
    for tubes in 1..=30 {
        let requests = vec![PreparationRequest::new(AMIKACIN, 585.6, 5.0, 0.42, tubes)];
        let report = calculate_panel(&catalog, &requests, &config).unwrap();
        let amk = &report.entries[0];
        let spurious: Vec<_> = report
            .warnings
            .iter()
            .filter(|w| {
                matches!(
                    w.kind,
                    WarningKind::NegativeTopUp | WarningKind::DrawExceedsSupply
                )
            })
            .collect();
        assert!(spurious.is_empty(), "{} tubes: {:?}", tubes, spurious);
        assert_eq!(amk.status, EntryStatus::Computed);
        assert!(amk.topup_vol_ml.unwrap() >= 0.0);
        assert_relative_eq!(
            amk.draw_vol_ml.unwrap(),
            working_volume_ml(tubes, &config),
            epsilon = 1e-9
        );
    }
}

#[test]
fn test_stock_too_small_for_the_intermediate_draw() {
    let catalog = DrugCatalog::default_panel();
    // potency 12.2, estimate 5.124 mg, 0.10248 mg weighed: 0.1 ml of stock
    let requests = vec![PreparationRequest::new(INH_CC, 1673.108, 5.0, 0.10248, 10)];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();
    let inh = &report.entries[0];
    assert_relative_eq!(inh.diluent_vol_ml.unwrap(), 0.1, epsilon = 1e-9);
    assert!(matches!(inh.route, Some(DilutionRoute::ViaIntermediate { .. })));
    let inter = inh.intermediate.unwrap();
    assert_relative_eq!(inter.factor, 5.7, epsilon = 1e-6);
    // 1.2 ml / 5.7 of stock needed, 0.1 ml available
    assert_relative_eq!(inter.stock_draw_vol_ml, 1.2 / 5.7, epsilon = 1e-9);
    assert_relative_eq!(inh.leftover_vol_ml.unwrap(), 0.1 - 1.2 / 5.7, epsilon = 1e-9);
    assert!(inh.leftover_vol_ml.unwrap() < 0.0);
    assert_eq!(inh.status, EntryStatus::Infeasible);
    assert_eq!(inh.aliquot_count, Some(0));

    let shortfall: Vec<_> = report
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::DrawExceedsSupply)
        .collect();
    assert_eq!(shortfall.len(), 1);
    assert!(shortfall[0].message.contains("stock solution"));
}

#[test]
fn test_fallback_factor_above_threshold_rejects_the_request() {
    let catalog = DrugCatalog::default_panel();
    let config = ProtocolConfig {
        intermediate_threshold: 1.5,
        ..ProtocolConfig::default()
    };
    let requests = vec![PreparationRequest::new(INH_CC, 137.14 * 1.4, 5.0, 0.588, 1)];
    assert!(matches!(
        calculate_panel(&catalog, &requests, &config),
        Err(DstError::InvalidConfig(_))
    ));
    let mut session = PreparationSession::new(&catalog, config);
    assert!(matches!(
        session.select_drugs(&[INH_CC]),
        Err(DstError::InvalidConfig(_))
    ));
}

#[test]
fn test_unavailable_drug_rejects_the_request() {
    let mut out_of_stock = DrugRecord::new("Rifabutin (RBT)", "DMSO", 847.02, 0.5);
    out_of_stock.available = false;
    let catalog = DrugCatalog::new(vec![
        DrugRecord::new("Linezolid (LZD)", "WATER", 337.35, 1.0),
        out_of_stock,
    ])
    .unwrap();
    let requests = vec![
        PreparationRequest::new(0, 337.35, 5.0, 0.42, 10),
        PreparationRequest::new(1, 847.02, 5.0, 0.21, 10),
    ];
    assert!(matches!(
        calculate_panel(&catalog, &requests, &ProtocolConfig::default()),
        Err(DstError::UnavailableDrug(name)) if name == "Rifabutin (RBT)"
    ));

    let mut session = PreparationSession::new(&catalog, ProtocolConfig::default());
    assert!(matches!(
        session.select_by_string("1 2"),
        Err(DstError::UnavailableDrug(_))
    ));
    assert_eq!(session.stage(), PipelineStage::SelectDrugs);
    session.select_by_string("all").unwrap();
    assert_eq!(session.entries().len(), 1);
    assert_eq!(session.entries()[0].drug_name, "Linezolid (LZD)");
}

#[test]
fn test_direct_dilution() {
    let catalog = DrugCatalog::default_panel();
    let requests = vec![
        // 0.2016 mg estimated for 1.2 ml of 168 ug/ml; half as much again weighed
        PreparationRequest::direct(RIFAMPICIN, 822.94, 0.3024, 10),
        // half the estimate weighed: only 0.6 ml of working solution
        PreparationRequest::direct(AMIKACIN, 585.6, 0.0504, 10),
    ];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();

    let rif = &report.entries[0];
    assert_eq!(rif.mode, PreparationMode::DirectDilution);
    assert_relative_eq!(rif.estimated_mass_mg.unwrap(), 0.2016, epsilon = 1e-12);
    assert_eq!(rif.working_conc_ug_per_ml, Some(168.0));
    assert_relative_eq!(rif.working_vol_ml.unwrap(), 1.2, epsilon = 1e-12);
    // actual / estimated * working volume
    assert_relative_eq!(rif.diluent_vol_ml.unwrap(), 1.8, epsilon = 1e-9);
    assert_relative_eq!(rif.leftover_vol_ml.unwrap(), 0.6, epsilon = 1e-9);
    assert!(rif.stock_conc_ug_per_ml.is_none());
    assert!(rif.draw_vol_ml.is_none() && rif.route.is_none() && rif.intermediate.is_none());
    assert_eq!(rif.status, EntryStatus::Computed);

    let amk = &report.entries[1];
    assert_relative_eq!(amk.diluent_vol_ml.unwrap(), 0.6, epsilon = 1e-9);
    assert_relative_eq!(amk.leftover_vol_ml.unwrap(), -0.6, epsilon = 1e-9);
    assert_eq!(amk.status, EntryStatus::Infeasible);

    let kinds: Vec<(&str, WarningKind)> = report
        .warnings
        .iter()
        .map(|w| (w.drug_name.as_str(), w.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("Rifampicin (RIF)", WarningKind::LowWeighMass),
            ("Amikacin (AMK)", WarningKind::LowWeighMass),
            ("Amikacin (AMK)", WarningKind::DrawExceedsSupply),
        ]
    );
    assert!(report.warnings[0].message.contains("working solution"));
}

#[test]
fn test_direct_dilution_needs_a_tube_count() {
    let catalog = DrugCatalog::default_panel();
    let mut no_tubes = PreparationRequest::direct(RIFAMPICIN, 822.94, 0.3, 10);
    no_tubes.tube_count = None;
    let requests = vec![no_tubes, PreparationRequest::direct(AMIKACIN, 585.6, 0.3, 0)];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();
    for e in &report.entries {
        assert!(e.is_failed());
        assert_eq!(e.failed_at(), Some(PipelineStage::ComputeEstimate));
    }
}

#[test]
fn test_stock_volume_from_aliquot_plan_and_practical_limits() {
    let catalog = DrugCatalog::default_panel();
    let requests = vec![
        // potency 4, 8 aliquots of 0.5 ml: 4 ml of 336 ug/ml stock
        PreparationRequest::new(INH_CC, 548.56, 0.0, 1.344, 10).with_aliquot_plan(8, 0.5),
        // 12 aliquots of 0.5 ml do not fit a 5 ml tube
        PreparationRequest::new(BEDAQUILINE, 555.5, 0.0, 0.504, 4).with_aliquot_plan(12, 0.5),
        // 0.2 ml of stock
        PreparationRequest::new(AMIKACIN, 585.6 * 4.0, 0.0, 0.0672, 1).with_aliquot_plan(2, 0.1),
    ];
    let report = calculate_panel(&catalog, &requests, &ProtocolConfig::default()).unwrap();

    let inh = &report.entries[0];
    assert_eq!(inh.stock_vol_ml, Some(4.0));
    assert_relative_eq!(inh.estimated_mass_mg.unwrap(), 1.344, epsilon = 1e-9);
    assert_relative_eq!(inh.stock_conc_ug_per_ml.unwrap(), 336.0, epsilon = 1e-9);
    assert_relative_eq!(inh.draw_vol_ml.unwrap(), 0.3, epsilon = 1e-9);
    assert_relative_eq!(inh.leftover_vol_ml.unwrap(), 3.7, epsilon = 1e-9);
    assert_eq!(inh.aliquot_count, Some(7));

    let kinds_of = |drug: &str| -> Vec<WarningKind> {
        report
            .warnings
            .iter()
            .filter(|w| w.drug_name == drug)
            .map(|w| w.kind)
            .collect()
    };
    assert_eq!(kinds_of("Isoniazid CC (INH)-cc"), vec![WarningKind::LowWeighMass]);
    assert_eq!(
        kinds_of("Bedaquiline (BDQ)"),
        vec![WarningKind::LowWeighMass, WarningKind::ExceedsTubeVolume]
    );
    assert_eq!(
        kinds_of("Amikacin (AMK)"),
        vec![WarningKind::LowWeighMass, WarningKind::SmallStockVolume]
    );
}

#[test]
fn test_session_with_direct_dilution() {
    let catalog = DrugCatalog::default_panel();
    let mut session = PreparationSession::new(&catalog, ProtocolConfig::default());
    session.select_by_string("20, 9").unwrap();
    session
        .set_stock_parameters(0, &StockParameters::direct(822.94, 10))
        .unwrap();
    session
        .set_stock_parameters(1, &StockParameters::from_aliquot_plan(548.56, 8, 0.5))
        .unwrap();
    session.compute_estimates().unwrap();
    assert_relative_eq!(session.entries()[0].working_vol_ml.unwrap(), 1.2, epsilon = 1e-12);
    assert_relative_eq!(session.entries()[0].estimated_mass_mg.unwrap(), 0.2016, epsilon = 1e-12);
    assert_relative_eq!(session.entries()[1].estimated_mass_mg.unwrap(), 1.344, epsilon = 1e-9);

    session.record_weigh_in(0, 0.3024).unwrap();
    session.record_weigh_in(1, 1.344).unwrap();
    session.compute_stock_stage().unwrap();
    assert!(matches!(
        session.set_tube_count(0, 12, None),
        Err(DstError::StageOrder { .. })
    ));
    session.set_tube_count(1, 10, Some(0.5)).unwrap();
    session.compute_working_stage().unwrap();

    let report = session.report().unwrap();
    let rif = report.entry("Rifampicin (RIF)").unwrap();
    assert_eq!(rif.tube_count, Some(10));
    assert_relative_eq!(rif.diluent_vol_ml.unwrap(), 1.8, epsilon = 1e-9);
    assert_eq!(rif.status, EntryStatus::Computed);
    let inh = report.entry("Isoniazid CC (INH)-cc").unwrap();
    assert_eq!(inh.aliquot_count, Some(7));

    // the direct dilution keeps its tube count and working volume on a re-weigh
    session.return_to(PipelineStage::AwaitWeighIn).unwrap();
    let rif = &session.entries()[0];
    assert_eq!(rif.tube_count, Some(10));
    assert!(rif.working_vol_ml.is_some());
    assert!(rif.diluent_vol_ml.is_none());
    assert!(session.entries()[1].tube_count.is_none());

    // the tube count is a stock parameter here, kept for editing
    session.return_to(PipelineStage::EnterStockParameters).unwrap();
    assert_eq!(session.entries()[0].tube_count, Some(10));
    assert!(session.entries()[0].working_vol_ml.is_none());
    assert!(session.entries()[0].estimated_mass_mg.is_none());
    assert_eq!(session.entries()[0].mode, PreparationMode::DirectDilution);
}
