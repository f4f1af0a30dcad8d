//! Colour table and band statistics derived from the histogram.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{ColumnType, ColumnUsage, ColumnValues, RasterAttributeTable};
use crate::error::Result;
use crate::raster::BandStatistics;

const COLOUR_COLUMNS: [(&str, ColumnUsage); 4] = [
    ("Red", ColumnUsage::Red),
    ("Green", ColumnUsage::Green),
    ("Blue", ColumnUsage::Blue),
    ("Alpha", ColumnUsage::Alpha),
];

/// Gives every segment a random opaque colour. Row 0 is transparent black.
///
/// Colour channels that already exist are left untouched; the same seed
/// always produces the same colours.
pub fn write_random_colour_table(rat: &mut RasterAttributeTable, seed: u64) -> Result<()> {
    let rows = rat.row_count();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut channels: [Vec<i64>; 3] = Default::default();
    for channel in &mut channels {
        channel.reserve(rows);
    }
    for row in 0..rows {
        for channel in &mut channels {
            channel.push(if row == 0 {
                0
            } else {
                rng.random_range(0..=255)
            });
        }
    }
    let alpha: Vec<i64> = (0..rows).map(|row| if row == 0 { 0 } else { 255 }).collect();

    let [red, green, blue] = channels;
    for ((name, usage), values) in COLOUR_COLUMNS.into_iter().zip([red, green, blue, alpha]) {
        if rat.column_of_usage(usage).is_some() {
            continue;
        }
        rat.ensure_column(name, ColumnType::Integer, usage)?;
        rat.set_values(name, 0, ColumnValues::Integer(values))?;
    }
    Ok(())
}

/// Min, max, mean and population standard deviation of the label values,
/// weighting each id `>= 1` by its pixel count. `None` when no id has pixels.
pub fn estimate_stats_from_histogram(histogram: &[f64]) -> Option<BandStatistics> {
    let mut total = 0.0;
    let mut weighted = 0.0;
    let mut min = None;
    let mut max = 0.0;
    for (id, &count) in histogram.iter().enumerate().skip(1) {
        if count <= 0.0 {
            continue;
        }
        let value = id as f64;
        min.get_or_insert(value);
        max = value;
        total += count;
        weighted += count * value;
    }
    let min = min?;
    let mean = weighted / total;

    let variance = histogram
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, count)| **count > 0.0)
        .map(|(id, &count)| count * (id as f64 - mean).powi(2))
        .sum::<f64>()
        / total;

    Some(BandStatistics {
        min,
        max,
        mean,
        std_dev: variance.sqrt(),
    })
}
