/// CSV export of captured stable readings
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

use crate::models::Reading;
use crate::utils::{file_stamp, format_rfc3339};

const HEADER: [&str; 4] = ["timestamp", "scale", "weight", "raw_data"];

/// Write readings to a timestamped CSV file in `dir`
///
/// One row per reading, in the order given. The file is named
/// `scale_data_YYYYMMDD_HHMMSS.csv` after the capture time and the directory
/// is created if it does not exist yet.
///
/// # Arguments
/// * `readings` - Aggregated readings from all sessions
/// * `dir` - Output directory
///
/// # Returns
/// Ok(Some(path)) for the written file, Ok(None) when there was nothing to
/// write, or error if the file could not be written
pub fn save_readings(
    readings: &[Reading],
    dir: &Path,
) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    if readings.is_empty() {
        return Ok(None);
    }

    fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "scale_data_{}.csv",
        file_stamp(&OffsetDateTime::now_utc())
    ));

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(HEADER)?;
    for reading in readings {
        writer.write_record([
            format_rfc3339(&reading.timestamp),
            reading.source_name.clone(),
            reading.weight.to_string(),
            reading.raw_frame.clone(),
        ])?;
    }
    writer.flush()?;

    info!("Saved {} reading(s) to {}", readings.len(), path.display());
    Ok(Some(path))
}
