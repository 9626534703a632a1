//! Console tables and JSON for a finished preparation run.
use crate::Preparation::entry::{EntryStatus, PreparationEntry, PreparationMode};
use crate::Preparation::errors::DstError;
use crate::Preparation::intermediate_stage::DilutionRoute;
use crate::Preparation::pipeline::PanelReport;
use crate::Preparation::units::ml_to_ul;
use prettytable::{Table, row};
use serde_json::{Map, Value, json};

fn fmt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

fn status_label(status: &EntryStatus) -> String {
    match status {
        EntryStatus::Pending => "pending".to_string(),
        EntryStatus::Computed => "ok".to_string(),
        EntryStatus::Infeasible => "INFEASIBLE".to_string(),
        EntryStatus::Failed(reason) => format!("FAILED: {}", reason),
    }
}

impl PanelReport {
    pub fn entry(&self, drug_name: &str) -> Option<&PreparationEntry> {
        self.entries.iter().find(|e| e.drug_name == drug_name)
    }

    /// entries that reached the end of the chain, feasible or not
    pub fn computed(&self) -> impl Iterator<Item = &PreparationEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, EntryStatus::Computed | EntryStatus::Infeasible))
    }

    pub fn stock_table(&self) -> Table {
        let mut table = Table::new();
        table.add_row(row![
            "Drug",
            "Diluent",
            "Crit_Conc(mg/ml)",
            "PurMol_W(g/mol)",
            "Potency",
            "Est_DrugW(mg)",
            "Act_DrugW(mg)",
            "Diluent_Vol(ml)",
            "Stock_Conc(ug/ml)"
        ]);
        for e in &self.entries {
            table.add_row(row![
                e.drug_name,
                e.diluent,
                e.critical_conc_mg_per_ml(),
                fmt(e.purchased_mw_g_per_mol, 2),
                fmt(e.potency, 4),
                fmt(e.estimated_mass_mg, 4),
                fmt(e.actual_mass_mg, 4),
                fmt(e.diluent_vol_ml, 4),
                fmt(e.stock_conc_ug_per_ml, 2)
            ]);
        }
        table
    }

    /// Draw and top-up volumes are shown in µl as well, they are pipetted. A
    /// direct dilution has no draw; its diluent is in the stock table.
    pub fn working_table(&self) -> Table {
        let mut table = Table::new();
        table.add_row(row![
            "Drug",
            "MGIT_Tubes",
            "WSol_Conc(ug/ml)",
            "WSol_Vol(ml)",
            "Draw(ml)",
            "Draw(ul)",
            "Diluent(ml)",
            "Diluent(ul)",
            "Stock_Left(ml)",
            "Aliquots",
            "Route",
            "Status"
        ]);
        for e in &self.entries {
            let route = match (e.mode, e.route) {
                (PreparationMode::DirectDilution, _) => "direct".to_string(),
                (_, Some(DilutionRoute::DirectDraw)) => "stock".to_string(),
                (_, Some(DilutionRoute::ViaIntermediate { factor })) => format!("intermediate x{}", factor),
                (_, None) => "-".to_string(),
            };
            table.add_row(row![
                e.drug_name,
                e.tube_count.map_or("-".to_string(), |n| n.to_string()),
                fmt(e.working_conc_ug_per_ml, 2),
                fmt(e.working_vol_ml, 3),
                fmt(e.draw_vol_ml, 4),
                fmt(e.draw_vol_ml.map(ml_to_ul), 1),
                fmt(e.topup_vol_ml, 4),
                fmt(e.topup_vol_ml.map(ml_to_ul), 1),
                fmt(e.leftover_vol_ml, 4),
                e.aliquot_count.map_or("-".to_string(), |n| n.to_string()),
                route,
                status_label(&e.status)
            ]);
        }
        table
    }

    /// `None` when no drug needed an intermediate dilution
    pub fn intermediate_table(&self) -> Option<Table> {
        let rows: Vec<_> = self
            .entries
            .iter()
            .filter_map(|e| e.intermediate.map(|i| (e.drug_name.as_str(), i)))
            .collect();
        if rows.is_empty() {
            return None;
        }
        let mut table = Table::new();
        table.add_row(row![
            "Drug",
            "Factor",
            "Inter_Conc(ug/ml)",
            "Inter_Vol(ml)",
            "Stock_Draw(ml)",
            "Stock_Draw(ul)",
            "Diluent(ml)",
            "Inter_Left(ml)"
        ]);
        for (name, i) in rows {
            table.add_row(row![
                name,
                i.factor,
                format!("{:.2}", i.conc_ug_per_ml),
                format!("{:.4}", i.vol_ml),
                format!("{:.4}", i.stock_draw_vol_ml),
                format!("{:.1}", ml_to_ul(i.stock_draw_vol_ml)),
                format!("{:.4}", i.diluent_vol_ml),
                format!("{:.4}", i.leftover_vol_ml)
            ]);
        }
        Some(table)
    }

    pub fn warnings_table(&self) -> Table {
        let mut table = Table::new();
        table.add_row(row!["Drug", "Warning"]);
        for w in &self.warnings {
            table.add_row(row![w.drug_name, w.message]);
        }
        table
    }

    pub fn pretty_print(&self) {
        println!("\nStock solutions");
        self.stock_table().printstd();
        if let Some(table) = self.intermediate_table() {
            println!("\nIntermediate solutions");
            table.printstd();
        }
        println!("\nWorking solutions");
        self.working_table().printstd();
        if !self.warnings.is_empty() {
            println!("\nWarnings");
            self.warnings_table().printstd();
        }
    }

    /// `{"table": {<drug name>: {<field>: value}}, "warnings": [{drug_name, message, kind}]}`
    pub fn to_json_value(&self) -> Result<Value, DstError> {
        let mut table = Map::new();
        for entry in &self.entries {
            table.insert(entry.drug_name.clone(), serde_json::to_value(entry)?);
        }
        Ok(json!({
            "table": table,
            "warnings": serde_json::to_value(&self.warnings)?,
        }))
    }

    pub fn to_json(&self) -> Result<String, DstError> {
        Ok(serde_json::to_string_pretty(&self.to_json_value()?)?)
    }
}
