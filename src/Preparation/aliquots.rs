/// Number of storage aliquots of `ml_per_aliquot` that the leftover stock fills.
/// Zero when nothing is left or no aliquot volume was requested.
pub fn aliquot_count(leftover_stock_ml: f64, ml_per_aliquot: Option<f64>) -> u32 {
    match ml_per_aliquot {
        Some(per_aliquot) if per_aliquot > 0.0 && leftover_stock_ml > 0.0 => {
            (leftover_stock_ml / per_aliquot).floor() as u32
        }
        _ => 0,
    }
}

/// stock volume that fills `num_aliquots` storage aliquots
pub fn aliquot_plan_volume_ml(num_aliquots: u32, ml_per_aliquot: f64) -> f64 {
    num_aliquots as f64 * ml_per_aliquot
}
